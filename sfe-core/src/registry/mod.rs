//! Persistable filter registry
//!
//! Stores filter trees in SQLite and rebuilds them on demand. A stored filter
//! is a row in `filters` (class identifier, group, template flag, parent and
//! sequence) plus its rows in `filter_settings`; sub-filters are rows whose
//! `parent_filter_id` points at the composite.
//!
//! Loading instantiates the class through the [`FilterFactory`] using the
//! group's type descriptors, applies the stored settings, and recurses into
//! the sub-filters in sequence order. A filter that turns out to be its own
//! ancestor aborts the load with [`Error::ConfigurationCycle`].

use crate::db::{self, FilterGroup, FilterQuery, FilterRow};
use crate::environment::{Environment, RuntimeRequirements};
use crate::error::{Error, Result};
use crate::factory::FilterFactory;
use crate::filter::{Filter, FilterError, FilterId, Settings, SETTINGS_MAPPING_KEY};
use crate::types::{TypeDescriptor, TypeDescriptorRegistry};
use futures::future::BoxFuture;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

mod install;
mod lookup;

pub use install::{FilterSpec, InstallReport};
pub use lookup::SampleDirection;

use lookup::{GlobKey, SampleKey};

/// SQLite-backed store of filter configurations
pub struct PersistableFilterRegistry {
    pool: SqlitePool,
    factory: FilterFactory,
    types: TypeDescriptorRegistry,
    environment: Arc<Environment>,
    glob_cache: RwLock<HashMap<GlobKey, Vec<FilterId>>>,
    sample_cache: RwLock<HashMap<SampleKey, Vec<FilterId>>>,
}

impl PersistableFilterRegistry {
    /// Registry over `pool` with the built-in filter classes and type namespaces
    pub fn new(pool: SqlitePool, environment: Environment) -> Self {
        Self::with_factory(
            pool,
            FilterFactory::with_builtins(),
            TypeDescriptorRegistry::default(),
            environment,
        )
    }

    pub fn with_factory(
        pool: SqlitePool,
        factory: FilterFactory,
        types: TypeDescriptorRegistry,
        environment: Environment,
    ) -> Self {
        Self {
            pool,
            factory,
            types,
            environment: Arc::new(environment),
            glob_cache: RwLock::new(HashMap::new()),
            sample_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn factory(&self) -> &FilterFactory {
        &self.factory
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Parse a descriptor with this registry's namespaces
    pub fn parse_type(&self, descriptor: &str) -> Result<TypeDescriptor> {
        Ok(self.types.parse(descriptor)?)
    }

    /// Drop every cached lookup result
    pub async fn invalidate_caches(&self) {
        self.glob_cache.write().await.clear();
        self.sample_cache.write().await.clear();
        debug!("Filter lookup caches cleared");
    }

    // ------------------------------------------------------------------
    // Filter groups
    // ------------------------------------------------------------------

    /// Store a new group; both descriptors must parse
    pub async fn insert_group(&self, group: &FilterGroup) -> Result<i64> {
        self.parse_type(&group.input_type)?;
        self.parse_type(&group.output_type)?;
        let id = db::insert_group(&self.pool, group).await?;
        self.invalidate_caches().await;
        Ok(id)
    }

    pub async fn update_group(&self, group: &FilterGroup) -> Result<()> {
        self.parse_type(&group.input_type)?;
        self.parse_type(&group.output_type)?;
        db::update_group(&self.pool, group).await?;
        self.invalidate_caches().await;
        Ok(())
    }

    pub async fn get_group(&self, symbolic: &str) -> Result<Option<FilterGroup>> {
        db::get_group_by_symbolic(&self.pool, symbolic).await
    }

    pub async fn list_groups(&self) -> Result<Vec<FilterGroup>> {
        db::list_groups(&self.pool).await
    }

    /// Delete a group no stored filter references
    pub async fn delete_group(&self, symbolic: &str) -> Result<()> {
        db::delete_group(&self.pool, symbolic).await?;
        self.invalidate_caches().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Persist a new filter and its whole sub-filter tree
    ///
    /// Ids (and parent ids for sub-filters) are written back into the tree.
    /// Every filter in the tree must name a group whose descriptors equal
    /// its own input/output types. The tree is checked before anything is
    /// written and stored in one transaction, so a failed insert stores
    /// nothing.
    pub async fn insert_filter(&self, filter: &mut Filter) -> Result<FilterId> {
        let mut pending = PendingFilter::from_filter(filter, 0)?;
        self.resolve_groups(&mut pending).await?;

        let mut tx = self.pool.begin().await?;
        let id = db::insert_filter_row(&mut *tx, &pending.row).await?;
        db::write_settings(&mut *tx, id, &pending.settings).await?;
        let child_ids = write_children(&mut *tx, &pending, id).await?;
        tx.commit().await?;

        filter.core_mut().set_id(Some(id));
        assign_child_ids(filter, &mut child_ids.into_iter());
        self.invalidate_caches().await;
        info!("Inserted filter '{}' (id {})", filter.display_name(), id);
        Ok(id)
    }

    /// Rewrite a stored filter; its stored sub-filters are replaced by the
    /// current ones
    ///
    /// All or nothing: on error the stored tree is left as it was.
    pub async fn update_filter(&self, filter: &mut Filter) -> Result<()> {
        let id = filter.id().ok_or_else(|| {
            Error::InvalidInput(format!("Filter '{}' has not been stored", filter.display_name()))
        })?;
        let mut pending = PendingFilter::from_filter(filter, id)?;
        self.resolve_groups(&mut pending).await?;

        let mut tx = self.pool.begin().await?;
        if !db::update_filter_row(&mut *tx, &pending.row).await? {
            return Err(Error::NotFound(format!("Filter {}", id)));
        }
        db::write_settings(&mut *tx, id, &pending.settings).await?;
        for child_id in db::child_filter_ids(&mut *tx, id).await? {
            delete_subtree(&mut *tx, child_id).await?;
        }
        let child_ids = write_children(&mut *tx, &pending, id).await?;
        tx.commit().await?;

        assign_child_ids(filter, &mut child_ids.into_iter());
        self.invalidate_caches().await;
        info!("Updated filter '{}' (id {})", filter.display_name(), id);
        Ok(())
    }

    /// Delete a filter with its sub-filters and settings
    pub async fn delete_filter(&self, id: FilterId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if db::get_filter_row(&mut *tx, id).await?.is_none() {
            return Err(Error::NotFound(format!("Filter {}", id)));
        }
        let removed = delete_subtree(&mut *tx, id).await?;
        tx.commit().await?;

        self.invalidate_caches().await;
        info!("Deleted filter {} ({} row(s))", id, removed);
        Ok(())
    }

    /// Look up the group of every filter in `pending` and check its types
    async fn resolve_groups(&self, pending: &mut PendingFilter) -> Result<()> {
        let mut names = BTreeSet::new();
        pending.group_names(&mut names);

        let mut groups = HashMap::new();
        for symbolic in names {
            let group = db::get_group_by_symbolic(&self.pool, &symbolic)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Filter group '{}'", symbolic)))?;
            let input = self.parse_type(&group.input_type)?.raw();
            let output = self.parse_type(&group.output_type)?.raw();
            groups.insert(symbolic, (group, input, output));
        }
        pending.resolve(&groups)
    }

    /// Rebuild a stored filter tree
    pub async fn load(&self, id: FilterId) -> Result<Filter> {
        let mut loading = HashSet::new();
        self.load_recursive(id, &mut loading).await
    }

    fn load_recursive<'a>(
        &'a self,
        id: FilterId,
        loading: &'a mut HashSet<FilterId>,
    ) -> BoxFuture<'a, Result<Filter>> {
        Box::pin(async move {
            if !loading.insert(id) {
                warn!("Filter {} is its own ancestor; refusing to load", id);
                return Err(Error::ConfigurationCycle(id));
            }

            let row = db::get_filter_row(&self.pool, id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Filter {}", id)))?;
            let group = db::get_group_by_id(&self.pool, row.filter_group_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Filter group {}", row.filter_group_id)))?;
            let settings = db::load_settings(&self.pool, id).await?;
            let mut filter = self.instantiate(&row, &group)?;

            for child_id in db::child_filter_ids(&self.pool, id).await? {
                let child = self.load_recursive(child_id, &mut *loading).await?;
                let sequence = child.sequence();
                if filter.add_child(child)?.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "Filter {} has two sub-filters at sequence {:?}",
                        id, sequence
                    )));
                }
            }

            apply_settings(&mut filter, &settings)?;
            loading.remove(&id);
            Ok(filter)
        })
    }

    fn instantiate(&self, row: &FilterRow, group: &FilterGroup) -> Result<Filter> {
        let input = self.parse_type(&group.input_type)?;
        let output = self.parse_type(&group.output_type)?;
        let mut filter = self.factory.construct(&row.class_name, input, output)?;

        let core = filter.core_mut();
        core.set_id(Some(row.filter_id));
        core.set_display_name(row.display_name.clone());
        core.set_template(row.is_template);
        core.set_parent_id(row.parent_filter_id);
        core.set_context_id(row.context_id);
        core.set_group(Some(group.symbolic.clone()));
        if row.parent_filter_id.is_some() {
            core.set_sequence(u32::try_from(row.seq).ok());
        }
        filter.set_environment(self.environment.clone());
        Ok(filter)
    }

    async fn load_all(&self, ids: &[FilterId]) -> Result<Vec<Filter>> {
        let mut filters = Vec::with_capacity(ids.len());
        for id in ids {
            filters.push(self.load(*id).await?);
        }
        Ok(filters)
    }

    /// Top-level filters of a group
    ///
    /// `context_id` of `None` does not restrict by context.
    pub async fn filters_by_group(
        &self,
        symbolic: &str,
        context_id: Option<i64>,
        templates: bool,
    ) -> Result<Vec<Filter>> {
        let query = FilterQuery {
            group_symbolic: Some(symbolic),
            context_id,
            is_template: Some(templates),
            ..Default::default()
        };
        let ids = db::find_filter_ids(&self.pool, &query).await?;
        self.load_all(&ids).await
    }

    /// Top-level filters of a class
    pub async fn filters_by_class(
        &self,
        class_name: &str,
        context_id: Option<i64>,
        templates: bool,
    ) -> Result<Vec<Filter>> {
        let query = FilterQuery {
            class_name: Some(class_name),
            context_id,
            is_template: Some(templates),
            ..Default::default()
        };
        let ids = db::find_filter_ids(&self.pool, &query).await?;
        self.load_all(&ids).await
    }

    pub async fn filters_by_group_and_class(
        &self,
        symbolic: &str,
        class_name: &str,
        context_id: Option<i64>,
        templates: bool,
    ) -> Result<Vec<Filter>> {
        let query = FilterQuery {
            group_symbolic: Some(symbolic),
            class_name: Some(class_name),
            context_id,
            is_template: Some(templates),
        };
        let ids = db::find_filter_ids(&self.pool, &query).await?;
        self.load_all(&ids).await
    }

    /// The (first) template filter of a group
    pub async fn template_for_group(&self, symbolic: &str) -> Result<Option<Filter>> {
        let query = FilterQuery {
            group_symbolic: Some(symbolic),
            is_template: Some(true),
            ..Default::default()
        };
        let ids = db::find_filter_ids(&self.pool, &query).await?;
        match ids.first() {
            Some(id) => Ok(Some(self.load(*id).await?)),
            None => Ok(None),
        }
    }
}

/// A filter tree checked for storage but not yet written
struct PendingFilter {
    row: FilterRow,
    group: String,
    input_type: String,
    output_type: String,
    settings: Settings,
    children: Vec<PendingFilter>,
}

/// Resolved group, input descriptor, output descriptor
type ResolvedGroup = (FilterGroup, String, String);

impl PendingFilter {
    /// Rows of `filter` and its sub-filters; group ids are filled in by
    /// [`PendingFilter::resolve`]
    fn from_filter(filter: &Filter, filter_id: FilterId) -> Result<Self> {
        let core = filter.core();
        let group = core.group().ok_or_else(|| {
            Error::InvalidInput(format!("Filter '{}' has no filter group", core.display_name()))
        })?;
        let children = match filter.children() {
            Some(children) => children
                .values()
                .map(|child| Self::from_filter(child, 0))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            row: FilterRow {
                filter_id,
                filter_group_id: 0,
                context_id: core.context_id(),
                display_name: core.display_name().to_string(),
                class_name: core.class_name().to_string(),
                is_template: core.is_template(),
                parent_filter_id: core.parent_id(),
                seq: core.sequence().map_or(0, i64::from),
            },
            group: group.to_string(),
            input_type: core.input_type().raw(),
            output_type: core.output_type().raw(),
            settings: filter.persisted_settings(),
            children,
        })
    }

    fn group_names(&self, names: &mut BTreeSet<String>) {
        names.insert(self.group.clone());
        for child in &self.children {
            child.group_names(names);
        }
    }

    fn resolve(&mut self, groups: &HashMap<String, ResolvedGroup>) -> Result<()> {
        let (group, input, output) = groups
            .get(&self.group)
            .ok_or_else(|| Error::NotFound(format!("Filter group '{}'", self.group)))?;
        if *input != self.input_type || *output != self.output_type {
            return Err(Error::InvalidInput(format!(
                "Filter '{}' ({} => {}) does not fit group '{}' ({} => {})",
                self.row.display_name,
                self.input_type,
                self.output_type,
                self.group,
                group.input_type,
                group.output_type
            )));
        }
        self.row.filter_group_id = group.id.unwrap_or_default();
        for child in &mut self.children {
            child.resolve(groups)?;
        }
        Ok(())
    }
}

/// Insert the sub-filters of `parent` (stored as `parent_id`); ids are
/// returned in pre-order
async fn write_children(
    conn: &mut SqliteConnection,
    parent: &PendingFilter,
    parent_id: FilterId,
) -> Result<Vec<FilterId>> {
    let mut ids = Vec::new();
    let mut stack: Vec<(&PendingFilter, FilterId)> = parent
        .children
        .iter()
        .rev()
        .map(|child| (child, parent_id))
        .collect();

    while let Some((pending, parent_id)) = stack.pop() {
        let row = FilterRow {
            parent_filter_id: Some(parent_id),
            ..pending.row.clone()
        };
        let id = db::insert_filter_row(&mut *conn, &row).await?;
        db::write_settings(&mut *conn, id, &pending.settings).await?;
        ids.push(id);
        stack.extend(pending.children.iter().rev().map(|child| (child, id)));
    }
    Ok(ids)
}

/// Hand the ids from [`write_children`] back to the in-memory tree
fn assign_child_ids(filter: &mut Filter, ids: &mut std::vec::IntoIter<FilterId>) {
    let parent_id = filter.id();
    if let Filter::Composite(composite) = filter {
        for child in composite.children_mut().values_mut() {
            let core = child.core_mut();
            core.set_parent_id(parent_id);
            core.set_id(ids.next());
            assign_child_ids(child, ids);
        }
    }
}

/// Remove a stored subtree; rows that loop back are visited once
async fn delete_subtree(conn: &mut SqliteConnection, root: FilterId) -> Result<usize> {
    let mut pending = vec![root];
    let mut seen = HashSet::new();
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        pending.extend(db::child_filter_ids(&mut *conn, id).await?);
    }
    for id in &seen {
        db::delete_filter_row(&mut *conn, *id).await?;
    }
    Ok(seen.len())
}

/// Apply stored settings to a freshly instantiated filter
///
/// Reserved runtime requirement settings configure the capability gate;
/// everything else goes through the filter's setting resolution. The alias
/// table goes first so that aliases among the other settings resolve.
pub(crate) fn apply_settings(filter: &mut Filter, settings: &Settings) -> Result<()> {
    if let Some(mapping) = settings.get(SETTINGS_MAPPING_KEY) {
        filter.set_data(SETTINGS_MAPPING_KEY, mapping.clone())?;
    }
    for (name, value) in settings.iter() {
        if name == SETTINGS_MAPPING_KEY {
            continue;
        }
        if RuntimeRequirements::is_requirement_setting(name) {
            filter
                .core_mut()
                .requirements_mut()
                .apply_setting(name, value)
                .map_err(|reason| FilterError::InvalidSetting {
                    key: name.clone(),
                    reason,
                })?;
        } else {
            filter.set_data(name, value.clone())?;
        }
    }
    for (name, locale, value) in settings.iter_localized() {
        filter.set_localized_data(name, locale, value.clone())?;
    }
    Ok(())
}
