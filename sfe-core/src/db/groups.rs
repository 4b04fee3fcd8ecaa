//! Filter group queries
//!
//! A filter group names a kind of transformation (`article=>dc11`) and fixes
//! the input and output type descriptors every filter of the group uses.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    /// Database id (`None` until inserted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub symbolic: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub input_type: String,
    pub output_type: String,
}

impl FilterGroup {
    pub fn new(
        symbolic: impl Into<String>,
        display_name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            symbolic: symbolic.into(),
            display_name: display_name.into(),
            description: String::new(),
            input_type: input_type.into(),
            output_type: output_type.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: Some(row.get("filter_group_id")),
            symbolic: row.get("symbolic"),
            display_name: row.get("display_name"),
            description: row.get("description"),
            input_type: row.get("input_type"),
            output_type: row.get("output_type"),
        }
    }
}

/// Insert a group, returning its id
pub async fn insert_group(pool: &SqlitePool, group: &FilterGroup) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO filter_groups (symbolic, display_name, description, input_type, output_type)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&group.symbolic)
    .bind(&group.display_name)
    .bind(&group.description)
    .bind(&group.input_type)
    .bind(&group.output_type)
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    info!("Inserted filter group '{}' (id {})", group.symbolic, id);
    Ok(id)
}

pub async fn get_group_by_id(pool: &SqlitePool, id: i64) -> Result<Option<FilterGroup>> {
    let row = sqlx::query("SELECT * FROM filter_groups WHERE filter_group_id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(FilterGroup::from_row))
}

pub async fn get_group_by_symbolic(pool: &SqlitePool, symbolic: &str) -> Result<Option<FilterGroup>> {
    let row = sqlx::query("SELECT * FROM filter_groups WHERE symbolic = ?")
        .bind(symbolic)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(FilterGroup::from_row))
}

/// All groups ordered by symbolic name
pub async fn list_groups(pool: &SqlitePool) -> Result<Vec<FilterGroup>> {
    let rows = sqlx::query("SELECT * FROM filter_groups ORDER BY symbolic")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(FilterGroup::from_row).collect())
}

/// Update a group by id
pub async fn update_group(pool: &SqlitePool, group: &FilterGroup) -> Result<()> {
    let id = group
        .id
        .ok_or_else(|| Error::InvalidInput(format!("Group '{}' has no id", group.symbolic)))?;

    let result = sqlx::query(
        r#"
        UPDATE filter_groups
        SET symbolic = ?, display_name = ?, description = ?, input_type = ?, output_type = ?
        WHERE filter_group_id = ?
        "#,
    )
    .bind(&group.symbolic)
    .bind(&group.display_name)
    .bind(&group.description)
    .bind(&group.input_type)
    .bind(&group.output_type)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Filter group {}", id)));
    }
    Ok(())
}

/// Number of stored filters in the group
pub async fn count_group_references(pool: &SqlitePool, group_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM filters WHERE filter_group_id = ?")
        .bind(group_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete a group; refused while any filter references it
pub async fn delete_group(pool: &SqlitePool, symbolic: &str) -> Result<()> {
    let group = get_group_by_symbolic(pool, symbolic)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Filter group '{}'", symbolic)))?;
    let group_id = group.id.unwrap_or_default();

    let references = count_group_references(pool, group_id).await?;
    if references > 0 {
        return Err(Error::GroupInUse {
            symbolic: symbolic.to_string(),
            references,
        });
    }

    sqlx::query("DELETE FROM filter_groups WHERE filter_group_id = ?")
        .bind(group_id)
        .execute(pool)
        .await?;
    info!("Deleted filter group '{}'", symbolic);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    fn sample_group() -> FilterGroup {
        FilterGroup::new(
            "article=>dc11",
            "Article to Dublin Core",
            "class::classes.article.Article",
            "class::lib.pkp.plugins.metadata.dc11.Dc11Description",
        )
        .with_description("Export article metadata")
    }

    #[tokio::test]
    async fn test_group_crud() {
        let pool = init_memory_database().await.unwrap();

        let id = insert_group(&pool, &sample_group()).await.unwrap();
        let mut group = get_group_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(group.symbolic, "article=>dc11");
        assert_eq!(group.description, "Export article metadata");

        group.display_name = "Renamed".to_string();
        update_group(&pool, &group).await.unwrap();
        let reloaded = get_group_by_symbolic(&pool, "article=>dc11")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.display_name, "Renamed");

        assert_eq!(list_groups(&pool).await.unwrap().len(), 1);
        delete_group(&pool, "article=>dc11").await.unwrap();
        assert!(get_group_by_id(&pool, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_symbolic_is_unique() {
        let pool = init_memory_database().await.unwrap();
        insert_group(&pool, &sample_group()).await.unwrap();
        assert!(matches!(
            insert_group(&pool, &sample_group()).await,
            Err(Error::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_group() {
        let pool = init_memory_database().await.unwrap();
        assert!(matches!(
            delete_group(&pool, "nope").await,
            Err(Error::NotFound(_))
        ));
    }
}
