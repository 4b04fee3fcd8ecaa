//! Filters
//!
//! A filter is a typed transformation unit: it declares an input and an
//! output [`TypeDescriptor`], and [`Filter::execute`] refuses to run or to
//! hand back anything that violates those contracts.
//!
//! # Execution gates
//!
//! 1. **Capability gate** - the filter's runtime requirements (and those of
//!    every sub-filter) must be met by its [`Environment`].
//! 2. **Input validation** - the input must match the input descriptor.
//! 3. **Output validation** - the transformed value must match the output
//!    descriptor.
//!
//! Every failure is recorded on the filter's error list *and* returned to the
//! caller. Composite filters pull their children's errors into their own
//! list so a pipeline reports everything that went wrong in one place.
//!
//! # Leaf vs composite
//!
//! [`Filter`] is a tagged variant: leaves delegate to a [`Transformer`],
//! composites own ordered children (see [`CompositeFilter`]). Tree walking
//! code matches on the variant instead of probing types at runtime.

use crate::environment::{Environment, RuntimeRequirements};
use crate::types::TypeDescriptor;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub mod builtin;
mod composite;
mod leaf;
mod multiplexer;
mod sequencer;
mod settings;

pub use composite::{
    CompositeFilter, CompositeKind, MULTIPLEXER_CLASS, SEQUENCER_CLASS, SETTINGS_MAPPING_KEY,
    TOLERATE_FAILURES_KEY,
};
pub use leaf::{FnTransformer, LeafFilter, TransformContext, Transformer};
pub use settings::{SettingSpec, Settings};

/// Identifier assigned to a filter once persisted
pub type FilterId = i64;

/// Filter configuration and execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Requirements of filter '{filter}' not met: {}", .unmet.join(", "))]
    CapabilityUnmet { filter: String, unmet: Vec<String> },

    #[error("Filter '{filter}' does not support input of type '{type_name}'")]
    UnsupportedInput { filter: String, type_name: String },

    /// `rejected` carries the invalid output when the caller asked for it
    #[error("Filter '{filter}' produced unsupported output of type '{type_name}'")]
    UnsupportedOutput {
        filter: String,
        type_name: String,
        rejected: Option<Box<Value>>,
    },

    #[error("Filter '{filter}' produced no result")]
    NoResult { filter: String },

    #[error("Branch {sequence} of multiplexer '{filter}' failed")]
    BranchFailure { filter: String, sequence: u32 },

    #[error("Malformed setting key '{0}'")]
    MalformedSettingKey(String),

    #[error("No sub-filter with sequence {sequence} for setting '{key}'")]
    UnknownSequence { key: String, sequence: u32 },

    #[error("Setting '{0}' is already being propagated (mapping cycle)")]
    SettingCycle(String),

    #[error("Invalid value for setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Required setting '{key}' missing on filter '{filter}'")]
    MissingSetting { filter: String, key: String },

    #[error("Filter '{0}' cannot have sub-filters")]
    NotComposite(String),
}

/// State shared by every filter variant
#[derive(Debug, Clone)]
pub struct FilterCore {
    id: Option<FilterId>,
    class_name: String,
    display_name: String,
    input_type: TypeDescriptor,
    output_type: TypeDescriptor,
    sequence: Option<u32>,
    errors: Vec<String>,
    last_valid_input: Option<Value>,
    last_valid_output: Option<Value>,
    requirements: RuntimeRequirements,
    environment: Arc<Environment>,
    compatible: Option<bool>,
    settings: Settings,
    is_template: bool,
    parent_id: Option<FilterId>,
    group: Option<String>,
    context_id: Option<i64>,
}

impl FilterCore {
    /// Input/output types are fixed here for the lifetime of the filter
    pub fn new(
        class_name: impl Into<String>,
        display_name: impl Into<String>,
        input_type: TypeDescriptor,
        output_type: TypeDescriptor,
    ) -> Self {
        Self {
            id: None,
            class_name: class_name.into(),
            display_name: display_name.into(),
            input_type,
            output_type,
            sequence: None,
            errors: Vec::new(),
            last_valid_input: None,
            last_valid_output: None,
            requirements: RuntimeRequirements::default(),
            environment: Arc::new(Environment::default()),
            compatible: None,
            settings: Settings::new(),
            is_template: false,
            parent_id: None,
            group: None,
            context_id: None,
        }
    }

    pub fn id(&self) -> Option<FilterId> {
        self.id
    }

    pub fn set_id(&mut self, id: Option<FilterId>) {
        self.id = id;
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub(crate) fn set_class_name(&mut self, class_name: impl Into<String>) {
        self.class_name = class_name.into();
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    pub fn input_type(&self) -> &TypeDescriptor {
        &self.input_type
    }

    pub fn output_type(&self) -> &TypeDescriptor {
        &self.output_type
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: Option<u32>) {
        self.sequence = sequence;
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn last_valid_input(&self) -> Option<&Value> {
        self.last_valid_input.as_ref()
    }

    pub fn last_valid_output(&self) -> Option<&Value> {
        self.last_valid_output.as_ref()
    }

    pub fn requirements(&self) -> &RuntimeRequirements {
        &self.requirements
    }

    pub fn set_requirements(&mut self, requirements: RuntimeRequirements) {
        self.requirements = requirements;
        self.compatible = None;
    }

    pub(crate) fn requirements_mut(&mut self) -> &mut RuntimeRequirements {
        self.compatible = None;
        &mut self.requirements
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_template(&self) -> bool {
        self.is_template
    }

    pub fn set_template(&mut self, is_template: bool) {
        self.is_template = is_template;
    }

    pub fn parent_id(&self) -> Option<FilterId> {
        self.parent_id
    }

    pub fn set_parent_id(&mut self, parent_id: Option<FilterId>) {
        self.parent_id = parent_id;
    }

    /// Symbolic name of the filter group this filter belongs to
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn set_group(&mut self, group: Option<String>) {
        self.group = group;
    }

    pub fn context_id(&self) -> Option<i64> {
        self.context_id
    }

    pub fn set_context_id(&mut self, context_id: Option<i64>) {
        self.context_id = context_id;
    }

    /// Own requirements against the environment, evaluated once
    fn own_compatible(&mut self) -> bool {
        if let Some(compatible) = self.compatible {
            return compatible;
        }
        let compatible = self.requirements.is_compatible(&self.environment);
        if !compatible {
            warn!(
                "Filter '{}' is not compatible with the environment: {}",
                self.display_name,
                self.requirements.unmet(&self.environment).join(", ")
            );
        }
        self.compatible = Some(compatible);
        compatible
    }
}

/// A leaf or composite filter
#[derive(Debug)]
pub enum Filter {
    Leaf(LeafFilter),
    Composite(CompositeFilter),
}

impl Filter {
    /// Leaf filter backed by a transformer
    pub fn leaf(core: FilterCore, transformer: impl Transformer + 'static) -> Self {
        Filter::Leaf(LeafFilter::new(core, Box::new(transformer)))
    }

    /// Ad hoc leaf filter from a closure
    pub fn from_fn<F>(
        display_name: impl Into<String>,
        input_type: TypeDescriptor,
        output_type: TypeDescriptor,
        transform: F,
    ) -> Self
    where
        F: FnMut(Value, &mut TransformContext<'_>) -> Option<Value> + Send + 'static,
    {
        let core = FilterCore::new("closure", display_name, input_type, output_type);
        Filter::leaf(core, FnTransformer::new(transform))
    }

    /// Empty sequencer
    pub fn sequencer(
        display_name: impl Into<String>,
        input_type: TypeDescriptor,
        output_type: TypeDescriptor,
    ) -> Self {
        let core = FilterCore::new(SEQUENCER_CLASS, display_name, input_type, output_type);
        Filter::Composite(CompositeFilter::new(core, CompositeKind::Sequencer))
    }

    /// Empty multiplexer
    pub fn multiplexer(
        display_name: impl Into<String>,
        input_type: TypeDescriptor,
        output_type: TypeDescriptor,
        tolerate_failures: bool,
    ) -> Self {
        let core = FilterCore::new(MULTIPLEXER_CLASS, display_name, input_type, output_type);
        Filter::Composite(CompositeFilter::new(
            core,
            CompositeKind::Multiplexer { tolerate_failures },
        ))
    }

    pub fn core(&self) -> &FilterCore {
        match self {
            Filter::Leaf(leaf) => &leaf.core,
            Filter::Composite(composite) => composite.core(),
        }
    }

    pub fn core_mut(&mut self) -> &mut FilterCore {
        match self {
            Filter::Leaf(leaf) => &mut leaf.core,
            Filter::Composite(composite) => composite.core_mut(),
        }
    }

    pub fn id(&self) -> Option<FilterId> {
        self.core().id()
    }

    pub fn class_name(&self) -> &str {
        self.core().class_name()
    }

    pub fn display_name(&self) -> &str {
        self.core().display_name()
    }

    pub fn sequence(&self) -> Option<u32> {
        self.core().sequence()
    }

    pub fn input_type(&self) -> &TypeDescriptor {
        self.core().input_type()
    }

    pub fn output_type(&self) -> &TypeDescriptor {
        self.core().output_type()
    }

    pub fn errors(&self) -> &[String] {
        self.core().errors()
    }

    pub fn last_valid_input(&self) -> Option<&Value> {
        self.core().last_valid_input()
    }

    pub fn last_valid_output(&self) -> Option<&Value> {
        self.core().last_valid_output()
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Filter::Composite(_))
    }

    pub fn as_composite(&self) -> Option<&CompositeFilter> {
        match self {
            Filter::Composite(composite) => Some(composite),
            Filter::Leaf(_) => None,
        }
    }

    pub fn as_composite_mut(&mut self) -> Option<&mut CompositeFilter> {
        match self {
            Filter::Composite(composite) => Some(composite),
            Filter::Leaf(_) => None,
        }
    }

    /// Sub-filters by sequence (empty for leaves)
    pub fn children(&self) -> Option<&BTreeMap<u32, Filter>> {
        self.as_composite().map(CompositeFilter::children)
    }

    /// Add a sub-filter; `Ok(None)` means the sequence was already taken
    pub fn add_child(&mut self, child: Filter) -> Result<Option<u32>, FilterError> {
        match self {
            Filter::Composite(composite) => Ok(composite.add_child(child)),
            Filter::Leaf(leaf) => Err(FilterError::NotComposite(
                leaf.core.display_name().to_string(),
            )),
        }
    }

    /// Settings the filter class declares (composites declare none)
    pub fn setting_specs(&self) -> Vec<SettingSpec> {
        match self {
            Filter::Leaf(leaf) => leaf.transformer().setting_specs(),
            Filter::Composite(_) => Vec::new(),
        }
    }

    /// Replace the environment of this filter and every sub-filter
    pub fn set_environment(&mut self, environment: Arc<Environment>) {
        {
            let core = self.core_mut();
            core.environment = environment.clone();
            core.compatible = None;
        }
        if let Filter::Composite(composite) = self {
            for child in composite.children_mut().values_mut() {
                child.set_environment(environment.clone());
            }
        }
    }

    /// Capability gate: own requirements and, for composites, every child's
    pub fn is_compatible_with_environment(&mut self) -> bool {
        match self {
            Filter::Leaf(leaf) => leaf.core.own_compatible(),
            Filter::Composite(composite) => {
                // evaluate every child so each caches its own result
                let children_ok = composite
                    .children_mut()
                    .values_mut()
                    .fold(true, |ok, child| child.is_compatible_with_environment() && ok);
                composite.core_mut().own_compatible() && children_ok
            }
        }
    }

    /// Unmet requirements of this filter and its sub-filters
    pub fn unmet_requirements(&self) -> Vec<String> {
        let core = self.core();
        let mut unmet = core.requirements.unmet(&core.environment);
        if let Filter::Composite(composite) = self {
            for child in composite.children().values() {
                for reason in child.unmet_requirements() {
                    unmet.push(format!("{}: {}", child.display_name(), reason));
                }
            }
        }
        unmet
    }

    /// Type compatibility of an input and, optionally, an output sample
    ///
    /// Without an output only the input is checked, which answers "can a
    /// pipeline start with this value".
    pub fn supports(&self, input: &Value, output: Option<&Value>) -> bool {
        let core = self.core();
        if !core.input_type.matches(input) {
            return false;
        }
        output.map_or(true, |output| core.output_type.matches(output))
    }

    /// Run the filter; invalid output is discarded
    pub fn execute(&mut self, input: Value) -> Result<Value, FilterError> {
        self.run(input, false)
    }

    /// Run the filter; an invalid output is attached to the returned
    /// [`FilterError::UnsupportedOutput`] for inspection
    pub fn execute_with_errors(&mut self, input: Value) -> Result<Value, FilterError> {
        self.run(input, true)
    }

    fn run(&mut self, input: Value, return_errors: bool) -> Result<Value, FilterError> {
        self.clear_errors();
        {
            let core = self.core_mut();
            core.last_valid_input = None;
            core.last_valid_output = None;
        }

        if !self.is_compatible_with_environment() {
            let error = FilterError::CapabilityUnmet {
                filter: self.display_name().to_string(),
                unmet: self.unmet_requirements(),
            };
            return Err(self.fail(error));
        }

        if !self.supports(&input, None) {
            let error = FilterError::UnsupportedInput {
                filter: self.display_name().to_string(),
                type_name: input.type_name().to_string(),
            };
            return Err(self.fail(error));
        }

        let retained = input.clone();
        let output = match self.transform(input) {
            Some(output) => output,
            None => {
                let error = FilterError::NoResult {
                    filter: self.display_name().to_string(),
                };
                return Err(self.fail(error));
            }
        };

        if !self.supports(&retained, Some(&output)) {
            let type_name = output.type_name().to_string();
            let error = FilterError::UnsupportedOutput {
                filter: self.display_name().to_string(),
                type_name,
                rejected: return_errors.then(|| Box::new(output)),
            };
            return Err(self.fail(error));
        }

        let core = self.core_mut();
        core.last_valid_input = Some(retained);
        core.last_valid_output = Some(output.clone());
        Ok(output)
    }

    fn transform(&mut self, input: Value) -> Option<Value> {
        match self {
            Filter::Leaf(leaf) => leaf.transform(input),
            Filter::Composite(composite) => composite.transform(input),
        }
    }

    fn fail(&mut self, error: FilterError) -> FilterError {
        debug!("Filter '{}' failed: {}", self.display_name(), error);
        self.core_mut().errors.push(error.to_string());
        error
    }

    /// Clear the error list of this filter and every sub-filter
    pub fn clear_errors(&mut self) {
        self.core_mut().errors.clear();
        if let Filter::Composite(composite) = self {
            for child in composite.children_mut().values_mut() {
                child.clear_errors();
            }
        }
    }

    /// Read a setting (for composites: alias, `seq<N>_<name>` or internal key)
    pub fn get_data(&self, key: &str) -> Result<Option<Value>, FilterError> {
        match self {
            Filter::Leaf(leaf) => Ok(leaf.core.settings.get(key).cloned()),
            Filter::Composite(composite) => composite.get_data(key, None),
        }
    }

    /// Write a setting (for composites: alias, `seq<N>_<name>` or internal key)
    pub fn set_data(&mut self, key: &str, value: impl Into<Value>) -> Result<(), FilterError> {
        match self {
            Filter::Leaf(leaf) => {
                leaf.core.settings.set(key, value.into());
                Ok(())
            }
            Filter::Composite(composite) => composite.set_data(key, value.into(), None),
        }
    }

    pub fn get_localized_data(
        &self,
        key: &str,
        locale: &str,
    ) -> Result<Option<Value>, FilterError> {
        match self {
            Filter::Leaf(leaf) => Ok(leaf.core.settings.get_localized(key, locale).cloned()),
            Filter::Composite(composite) => composite.get_data(key, Some(locale)),
        }
    }

    pub fn set_localized_data(
        &mut self,
        key: &str,
        locale: &str,
        value: impl Into<Value>,
    ) -> Result<(), FilterError> {
        match self {
            Filter::Leaf(leaf) => {
                leaf.core.settings.set_localized(key, locale, value.into());
                Ok(())
            }
            Filter::Composite(composite) => composite.set_data(key, value.into(), Some(locale)),
        }
    }

    /// Settings as they are persisted, runtime requirements included
    pub fn persisted_settings(&self) -> Settings {
        let mut settings = match self {
            Filter::Leaf(leaf) => leaf.core.settings.clone(),
            Filter::Composite(composite) => composite.own_settings(),
        };
        for (name, value) in self.core().requirements.to_settings() {
            settings.set(name, value);
        }
        settings
    }

    /// Required settings the filter class declares but are not set
    pub fn missing_settings(&self) -> Vec<String> {
        let settings = self.core().settings();
        self.setting_specs()
            .into_iter()
            .filter(|spec| spec.required && !settings.contains(&spec.name))
            .map(|spec| spec.name)
            .collect()
    }

    /// Same class, name, template flag, context, settings and (recursively)
    /// children
    pub fn is_equivalent(&self, other: &Filter) -> bool {
        if self.class_name() != other.class_name()
            || self.display_name() != other.display_name()
            || self.core().is_template() != other.core().is_template()
            || self.core().context_id() != other.core().context_id()
            || self.persisted_settings() != other.persisted_settings()
        {
            return false;
        }
        match (self.children(), other.children()) {
            (None, None) => true,
            (Some(mine), Some(theirs)) => {
                mine.len() == theirs.len()
                    && mine.iter().zip(theirs.iter()).all(|((sa, a), (sb, b))| {
                        sa == sb && a.is_equivalent(b)
                    })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Version;

    fn td(s: &str) -> TypeDescriptor {
        TypeDescriptor::parse(s).unwrap()
    }

    fn length_filter() -> Filter {
        Filter::from_fn(
            "length",
            td("primitive::string"),
            td("primitive::integer"),
            |input, _ctx| input.as_str().map(|s| Value::Integer(s.len() as i64)),
        )
    }

    #[test]
    fn test_execute_success_records_last_valid() {
        let mut filter = length_filter();
        let output = filter.execute(Value::from("abcd")).unwrap();
        assert_eq!(output, Value::Integer(4));
        assert_eq!(filter.last_valid_input(), Some(&Value::from("abcd")));
        assert_eq!(filter.last_valid_output(), Some(&Value::Integer(4)));
        assert!(filter.errors().is_empty());
    }

    #[test]
    fn test_execute_rejects_unsupported_input() {
        let mut filter = length_filter();
        let err = filter.execute(Value::Float(1.0)).unwrap_err();
        assert_eq!(
            err,
            FilterError::UnsupportedInput {
                filter: "length".to_string(),
                type_name: "float".to_string(),
            }
        );
        assert_eq!(filter.errors().len(), 1);
        assert!(filter.errors()[0].contains("float"));
        assert!(filter.last_valid_input().is_none());
    }

    #[test]
    fn test_execute_validates_output_type() {
        let mut filter = Filter::from_fn(
            "liar",
            td("primitive::string"),
            td("primitive::integer"),
            |input, _ctx| Some(input),
        );

        let err = filter.execute(Value::from("x")).unwrap_err();
        assert!(matches!(
            err,
            FilterError::UnsupportedOutput { ref type_name, rejected: None, .. } if type_name == "string"
        ));
        assert!(filter.last_valid_output().is_none());

        let err = filter.execute_with_errors(Value::from("x")).unwrap_err();
        match err {
            FilterError::UnsupportedOutput { rejected, .. } => {
                assert_eq!(rejected.map(|v| *v), Some(Value::from("x")));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_execute_no_result() {
        let mut filter = Filter::from_fn(
            "nothing",
            td("primitive::string"),
            td("primitive::string"),
            |_input, ctx| {
                ctx.add_error("upstream unavailable");
                None
            },
        );
        let err = filter.execute(Value::from("x")).unwrap_err();
        assert!(matches!(err, FilterError::NoResult { .. }));
        assert_eq!(filter.errors().len(), 2);
        assert_eq!(filter.errors()[0], "upstream unavailable");
    }

    #[test]
    fn test_errors_reset_between_runs() {
        let mut filter = length_filter();
        assert!(filter.execute(Value::Integer(1)).is_err());
        assert_eq!(filter.errors().len(), 1);
        assert!(filter.execute(Value::from("ok")).is_ok());
        assert!(filter.errors().is_empty());
    }

    #[test]
    fn test_capability_gate_blocks_transform() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut filter = Filter::from_fn(
            "needs-xsl",
            td("primitive::string"),
            td("primitive::string"),
            move |input, _ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(input)
            },
        );
        filter
            .core_mut()
            .set_requirements(RuntimeRequirements::default().with_feature("xsl"));

        let err = filter.execute(Value::from("x")).unwrap_err();
        match err {
            FilterError::CapabilityUnmet { unmet, .. } => {
                assert!(unmet[0].contains("xsl"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        filter.set_environment(Arc::new(
            Environment::new(Version::new(vec![1])).with_feature("xsl"),
        ));
        assert!(filter.execute(Value::from("x")).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_supports_without_output_checks_input_only() {
        let filter = length_filter();
        assert!(filter.supports(&Value::from("a"), None));
        assert!(filter.supports(&Value::from("a"), Some(&Value::Integer(1))));
        assert!(!filter.supports(&Value::from("a"), Some(&Value::from("b"))));
        assert!(!filter.supports(&Value::Integer(1), None));
    }

    #[test]
    fn test_leaf_settings() {
        let mut filter = length_filter();
        filter.set_data("mode", "strict").unwrap();
        filter.set_localized_data("label", "en_US", "Length").unwrap();
        assert_eq!(filter.get_data("mode").unwrap(), Some(Value::from("strict")));
        assert_eq!(
            filter.get_localized_data("label", "en_US").unwrap(),
            Some(Value::from("Length"))
        );
        assert_eq!(filter.get_data("absent").unwrap(), None);
    }

    #[test]
    fn test_leaf_cannot_adopt_children() {
        let mut filter = length_filter();
        assert!(matches!(
            filter.add_child(length_filter()),
            Err(FilterError::NotComposite(_))
        ));
    }

    #[test]
    fn test_persisted_settings_include_requirements() {
        let mut filter = length_filter();
        filter.set_data("mode", "strict").unwrap();
        filter.core_mut().set_requirements(
            RuntimeRequirements::default().with_min_version(Version::new(vec![3, 0])),
        );
        let settings = filter.persisted_settings();
        assert_eq!(settings.get("mode"), Some(&Value::from("strict")));
        assert_eq!(
            settings.get(crate::environment::SETTING_MIN_VERSION),
            Some(&Value::from("3.0"))
        );
    }
}
