//! Building filters from configuration and installing them
//!
//! Installation is idempotent: a filter tree that is equivalent (same class,
//! display name, template flag, settings and sub-filters) to one already
//! stored for the same group is not stored a second time; the stored filter
//! is returned instead.

use super::{apply_settings, PersistableFilterRegistry};
use crate::config::InstallFile;
use crate::db::{self, FilterGroup};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterError, FilterId, Settings};
use futures::future::BoxFuture;
use std::path::Path;
use tracing::info;

/// Description of a filter to configure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    pub class_name: String,
    /// Symbolic name of the filter group
    pub group: String,
    /// Defaults to the group's display name
    pub display_name: Option<String>,
    pub is_template: bool,
    pub context_id: Option<i64>,
    /// Position under the parent composite (sub-filters only)
    pub sequence: Option<u32>,
    pub settings: Settings,
    pub sub_filters: Vec<FilterSpec>,
}

impl FilterSpec {
    pub fn new(class_name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            group: group.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.settings.set(name, value.into());
        self
    }

    pub fn with_sub_filter(mut self, sub_filter: FilterSpec) -> Self {
        self.sub_filters.push(sub_filter);
        self
    }

    pub fn template(mut self) -> Self {
        self.is_template = true;
        self
    }
}

/// What an installation file added or found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub groups: Vec<i64>,
    pub filters: Vec<FilterId>,
}

impl PersistableFilterRegistry {
    /// Build a filter tree from `spec`, optionally persisting it
    ///
    /// Sub-filters are built and added first, then the settings are applied
    /// (so aliases can reach the sub-filters). Non-template filters must have
    /// every required setting of every filter in the tree.
    ///
    /// With `persist`, an equivalent stored filter (same context included) is
    /// returned if one exists; otherwise the new tree is inserted.
    pub async fn configure_and_optionally_persist(
        &self,
        spec: &FilterSpec,
        persist: bool,
    ) -> Result<Filter> {
        let mut filter = self.build(spec).await?;
        if !spec.is_template {
            check_required_settings(&filter)?;
        }

        if !persist {
            return Ok(filter);
        }

        let stored = self
            .filters_by_group_and_class(
                &spec.group,
                &spec.class_name,
                spec.context_id,
                spec.is_template,
            )
            .await?;
        if let Some(existing) = stored.into_iter().find(|f| f.is_equivalent(&filter)) {
            info!(
                "Filter '{}' already installed (id {:?})",
                existing.display_name(),
                existing.id()
            );
            return Ok(existing);
        }

        self.insert_filter(&mut filter).await?;
        Ok(filter)
    }

    fn build<'a>(&'a self, spec: &'a FilterSpec) -> BoxFuture<'a, Result<Filter>> {
        Box::pin(async move {
            let group = db::get_group_by_symbolic(&self.pool, &spec.group)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Filter group '{}'", spec.group)))?;
            let input = self.parse_type(&group.input_type)?;
            let output = self.parse_type(&group.output_type)?;

            let mut filter = self.factory.construct(&spec.class_name, input, output)?;
            {
                let core = filter.core_mut();
                core.set_display_name(
                    spec.display_name
                        .clone()
                        .unwrap_or_else(|| group.display_name.clone()),
                );
                core.set_group(Some(group.symbolic.clone()));
                core.set_template(spec.is_template);
                core.set_context_id(spec.context_id);
                core.set_sequence(spec.sequence);
            }
            filter.set_environment(self.environment.clone());

            for sub_spec in &spec.sub_filters {
                let child = self.build(sub_spec).await?;
                if filter.add_child(child)?.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "Duplicate sub-filter sequence {:?} in '{}'",
                        sub_spec.sequence,
                        filter.display_name()
                    )));
                }
            }

            apply_settings(&mut filter, &spec.settings)?;
            Ok(filter)
        })
    }

    /// Build and persist a filter described in an installation file
    pub async fn install_config(&self, spec: &FilterSpec) -> Result<Filter> {
        self.configure_and_optionally_persist(spec, true).await
    }

    /// Insert missing groups and bring changed ones up to date
    pub async fn install_groups(&self, groups: &[FilterGroup]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(groups.len());
        for group in groups {
            let id = match self.get_group(&group.symbolic).await? {
                Some(existing) => {
                    let id = existing.id.unwrap_or_default();
                    let wanted = FilterGroup {
                        id: Some(id),
                        ..group.clone()
                    };
                    if wanted != existing {
                        self.update_group(&wanted).await?;
                        info!("Updated filter group '{}'", group.symbolic);
                    }
                    id
                }
                None => self.insert_group(group).await?,
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// Install every group and filter of a TOML installation file
    pub async fn install_file(&self, path: &Path) -> Result<InstallReport> {
        let file = InstallFile::load(path)?;
        let groups = self.install_groups(&file.groups).await?;

        let mut filters = Vec::with_capacity(file.filters.len());
        for config in &file.filters {
            let filter = self.install_config(&config.to_spec()).await?;
            if let Some(id) = filter.id() {
                filters.push(id);
            }
        }

        info!(
            "Installed {} group(s) and {} filter(s) from {}",
            groups.len(),
            filters.len(),
            path.display()
        );
        Ok(InstallReport { groups, filters })
    }
}

fn check_required_settings(filter: &Filter) -> Result<()> {
    if let Some(key) = filter.missing_settings().into_iter().next() {
        return Err(FilterError::MissingSetting {
            filter: filter.display_name().to_string(),
            key,
        }
        .into());
    }
    if let Some(children) = filter.children() {
        for child in children.values() {
            check_required_settings(child)?;
        }
    }
    Ok(())
}
