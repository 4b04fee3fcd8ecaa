//! Filter and filter setting queries

use crate::error::Result;
use crate::filter::Settings;
use crate::value::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};

/// One row of the `filters` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRow {
    pub filter_id: i64,
    pub filter_group_id: i64,
    pub context_id: Option<i64>,
    pub display_name: String,
    pub class_name: String,
    pub is_template: bool,
    pub parent_filter_id: Option<i64>,
    /// Position under the parent (0 for top-level filters)
    pub seq: i64,
}

impl FilterRow {
    fn from_row(row: &SqliteRow) -> Self {
        Self {
            filter_id: row.get("filter_id"),
            filter_group_id: row.get("filter_group_id"),
            context_id: row.get("context_id"),
            display_name: row.get("display_name"),
            class_name: row.get("class_name"),
            is_template: row.get::<i64, _>("is_template") != 0,
            parent_filter_id: row.get("parent_filter_id"),
            seq: row.get("seq"),
        }
    }
}

/// Insert a filter row; `filter_id` is ignored and the new id returned
pub async fn insert_filter_row<'e, E>(executor: E, row: &FilterRow) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO filters
            (filter_group_id, context_id, display_name, class_name, is_template, parent_filter_id, seq)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.filter_group_id)
    .bind(row.context_id)
    .bind(&row.display_name)
    .bind(&row.class_name)
    .bind(row.is_template as i64)
    .bind(row.parent_filter_id)
    .bind(row.seq)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Rewrite a filter row; returns false if no such row
pub async fn update_filter_row<'e, E>(executor: E, row: &FilterRow) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE filters
        SET filter_group_id = ?, context_id = ?, display_name = ?, class_name = ?,
            is_template = ?, parent_filter_id = ?, seq = ?
        WHERE filter_id = ?
        "#,
    )
    .bind(row.filter_group_id)
    .bind(row.context_id)
    .bind(&row.display_name)
    .bind(&row.class_name)
    .bind(row.is_template as i64)
    .bind(row.parent_filter_id)
    .bind(row.seq)
    .bind(row.filter_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_filter_row<'e, E>(executor: E, filter_id: i64) -> Result<Option<FilterRow>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM filters WHERE filter_id = ?")
        .bind(filter_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(FilterRow::from_row))
}

/// Ids of the direct sub-filters, ordered by sequence
pub async fn child_filter_ids<'e, E>(executor: E, parent_id: i64) -> Result<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids = sqlx::query_scalar(
        "SELECT filter_id FROM filters WHERE parent_filter_id = ? ORDER BY seq, filter_id",
    )
    .bind(parent_id)
    .fetch_all(executor)
    .await?;
    Ok(ids)
}

/// Delete one filter row (its settings go with it)
pub async fn delete_filter_row(conn: &mut SqliteConnection, filter_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM filter_settings WHERE filter_id = ?")
        .bind(filter_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM filters WHERE filter_id = ?")
        .bind(filter_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Selection criteria for top-level filters
///
/// `None` fields do not restrict the result.
#[derive(Debug, Clone, Default)]
pub struct FilterQuery<'a> {
    pub group_symbolic: Option<&'a str>,
    pub class_name: Option<&'a str>,
    pub context_id: Option<i64>,
    pub is_template: Option<bool>,
}

/// Ids of top-level filters matching `query`, oldest first
pub async fn find_filter_ids(pool: &SqlitePool, query: &FilterQuery<'_>) -> Result<Vec<i64>> {
    let is_template = query.is_template.map(i64::from);
    let ids = sqlx::query_scalar(
        r#"
        SELECT f.filter_id
        FROM filters f
        JOIN filter_groups g ON g.filter_group_id = f.filter_group_id
        WHERE f.parent_filter_id IS NULL
          AND (? IS NULL OR g.symbolic = ?)
          AND (? IS NULL OR f.class_name = ?)
          AND (? IS NULL OR f.context_id = ?)
          AND (? IS NULL OR f.is_template = ?)
        ORDER BY f.filter_id
        "#,
    )
    .bind(query.group_symbolic)
    .bind(query.group_symbolic)
    .bind(query.class_name)
    .bind(query.class_name)
    .bind(query.context_id)
    .bind(query.context_id)
    .bind(is_template)
    .bind(is_template)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Ids of non-template top-level filters whose group types match the
/// patterns (SQL `LIKE`, case-insensitive)
pub async fn find_filter_ids_by_types(
    pool: &SqlitePool,
    input_pattern: &str,
    output_pattern: &str,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT f.filter_id
        FROM filters f
        JOIN filter_groups g ON g.filter_group_id = f.filter_group_id
        WHERE f.parent_filter_id IS NULL
          AND f.is_template = 0
          AND LOWER(g.input_type) LIKE LOWER(?)
          AND LOWER(g.output_type) LIKE LOWER(?)
        ORDER BY f.filter_id
        "#,
    )
    .bind(input_pattern)
    .bind(output_pattern)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Read every stored setting of a filter
///
/// Values are stored as JSON text; see [`Value`] for the encoding.
pub async fn load_settings(pool: &SqlitePool, filter_id: i64) -> Result<Settings> {
    let rows = sqlx::query(
        r#"
        SELECT setting_name, locale, setting_value
        FROM filter_settings
        WHERE filter_id = ?
        ORDER BY setting_name, locale
        "#,
    )
    .bind(filter_id)
    .fetch_all(pool)
    .await?;

    let mut settings = Settings::new();
    for row in rows {
        let name: String = row.get("setting_name");
        let locale: Option<String> = row.get("locale");
        let value: Value = serde_json::from_str(&row.get::<String, _>("setting_value"))?;
        match locale {
            Some(locale) => settings.set_localized(name, locale, value),
            None => settings.set(name, value),
        }
    }
    Ok(settings)
}

/// Replace every stored setting of a filter
pub async fn replace_settings(pool: &SqlitePool, filter_id: i64, settings: &Settings) -> Result<()> {
    let mut tx = pool.begin().await?;
    write_settings(&mut *tx, filter_id, settings).await?;
    tx.commit().await?;
    Ok(())
}

/// [`replace_settings`] on a connection the caller controls (usually an
/// open transaction)
pub async fn write_settings(
    conn: &mut SqliteConnection,
    filter_id: i64,
    settings: &Settings,
) -> Result<()> {
    sqlx::query("DELETE FROM filter_settings WHERE filter_id = ?")
        .bind(filter_id)
        .execute(&mut *conn)
        .await?;

    let plain = settings.iter().map(|(name, value)| (name, None, value));
    let localized = settings
        .iter_localized()
        .map(|(name, locale, value)| (name, Some(locale), value));

    for (name, locale, value) in plain.chain(localized) {
        sqlx::query(
            r#"
            INSERT INTO filter_settings (filter_id, setting_name, locale, setting_value)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(filter_id)
        .bind(name)
        .bind(locale)
        .bind(serde_json::to_string(value)?)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_database, insert_group, FilterGroup};
    use crate::value::Object;

    async fn setup() -> (SqlitePool, i64) {
        let pool = init_memory_database().await.unwrap();
        let group_id = insert_group(
            &pool,
            &FilterGroup::new("s=>s", "strings", "primitive::string", "primitive::string"),
        )
        .await
        .unwrap();
        (pool, group_id)
    }

    fn row(group_id: i64, parent: Option<i64>, seq: i64) -> FilterRow {
        FilterRow {
            filter_id: 0,
            filter_group_id: group_id,
            context_id: None,
            display_name: format!("filter {}", seq),
            class_name: "identity".to_string(),
            is_template: false,
            parent_filter_id: parent,
            seq,
        }
    }

    #[tokio::test]
    async fn test_children_ordered_by_seq() {
        let (pool, group_id) = setup().await;
        let parent = insert_filter_row(&pool, &row(group_id, None, 0)).await.unwrap();
        let second = insert_filter_row(&pool, &row(group_id, Some(parent), 2)).await.unwrap();
        let first = insert_filter_row(&pool, &row(group_id, Some(parent), 1)).await.unwrap();

        assert_eq!(child_filter_ids(&pool, parent).await.unwrap(), vec![first, second]);
        let stored = get_filter_row(&pool, second).await.unwrap().unwrap();
        assert_eq!(stored.parent_filter_id, Some(parent));
        assert_eq!(stored.seq, 2);
    }

    #[tokio::test]
    async fn test_settings_json_round_trip() {
        let (pool, group_id) = setup().await;
        let id = insert_filter_row(&pool, &row(group_id, None, 0)).await.unwrap();

        let mut settings = Settings::new();
        settings.set("count", Value::Integer(3));
        settings.set("ratio", Value::Float(3.0));
        settings.set("flag", Value::Boolean(false));
        settings.set("names", Value::Array(vec![Value::from("a"), Value::from("b")]));
        settings.set(
            "record",
            Value::Object(Object::new("lib.pkp.classes.Author").with_field("name", "Ada")),
        );
        settings.set_localized("label", "en_US", Value::from("Label"));
        settings.set_localized("label", "fr_CA", Value::from("Étiquette"));

        replace_settings(&pool, id, &settings).await.unwrap();
        let loaded = load_settings(&pool, id).await.unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.get("ratio"), Some(&Value::Float(3.0)));
    }

    #[tokio::test]
    async fn test_find_filter_ids_by_types_is_case_insensitive() {
        let (pool, group_id) = setup().await;
        let top = insert_filter_row(&pool, &row(group_id, None, 0)).await.unwrap();
        insert_filter_row(&pool, &row(group_id, Some(top), 1)).await.unwrap();
        let mut template = row(group_id, None, 0);
        template.is_template = true;
        insert_filter_row(&pool, &template).await.unwrap();

        let ids = find_filter_ids_by_types(&pool, "PRIMITIVE::%", "%string")
            .await
            .unwrap();
        assert_eq!(ids, vec![top]);
    }

    #[tokio::test]
    async fn test_find_filter_ids_with_query() {
        let (pool, group_id) = setup().await;
        let plain = insert_filter_row(&pool, &row(group_id, None, 0)).await.unwrap();
        let mut template = row(group_id, None, 0);
        template.is_template = true;
        let template = insert_filter_row(&pool, &template).await.unwrap();

        let all = find_filter_ids(
            &pool,
            &FilterQuery {
                group_symbolic: Some("s=>s"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(all, vec![plain, template]);

        let templates = find_filter_ids(
            &pool,
            &FilterQuery {
                is_template: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(templates, vec![template]);

        let other_class = find_filter_ids(
            &pool,
            &FilterQuery {
                class_name: Some("sequencer"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(other_class.is_empty());
    }
}
