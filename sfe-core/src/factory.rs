//! Filter class factory
//!
//! Stored filters only carry a class identifier; the factory turns that
//! identifier back into a live filter for the group's input/output types.
//! Every class the registry can load must be registered here.

use crate::error::{Error, Result};
use crate::filter::builtin::{FieldExtract, Identity, StringCase, Stringify};
use crate::filter::{Filter, FilterCore, Transformer, MULTIPLEXER_CLASS, SEQUENCER_CLASS};
use crate::types::TypeDescriptor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a filter of one class for the given input/output types
pub type FilterConstructor = Arc<dyn Fn(TypeDescriptor, TypeDescriptor) -> Filter + Send + Sync>;

pub const IDENTITY_CLASS: &str = "identity";
pub const STRINGIFY_CLASS: &str = "stringify";
pub const STRING_CASE_CLASS: &str = "string_case";
pub const FIELD_EXTRACT_CLASS: &str = "field_extract";

#[derive(Clone, Default)]
pub struct FilterFactory {
    constructors: HashMap<String, FilterConstructor>,
}

impl fmt::Debug for FilterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterFactory")
            .field("classes", &self.class_names())
            .finish()
    }
}

impl FilterFactory {
    /// Factory without any class
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with the composite classes and the built-in transformers
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(SEQUENCER_CLASS, |input, output| {
            Filter::sequencer(SEQUENCER_CLASS, input, output)
        });
        factory.register(MULTIPLEXER_CLASS, |input, output| {
            Filter::multiplexer(MULTIPLEXER_CLASS, input, output, false)
        });
        factory.register_transformer(IDENTITY_CLASS, || Identity);
        factory.register_transformer(STRINGIFY_CLASS, || Stringify);
        factory.register_transformer(STRING_CASE_CLASS, || StringCase);
        factory.register_transformer(FIELD_EXTRACT_CLASS, || FieldExtract);
        factory
    }

    /// Register (or replace) a class
    pub fn register<F>(&mut self, class_name: impl Into<String>, constructor: F)
    where
        F: Fn(TypeDescriptor, TypeDescriptor) -> Filter + Send + Sync + 'static,
    {
        self.constructors.insert(class_name.into(), Arc::new(constructor));
    }

    /// Register a leaf class backed by a fresh transformer per instance
    pub fn register_transformer<T, F>(&mut self, class_name: &str, make: F)
    where
        T: Transformer + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let class = class_name.to_string();
        self.register(class_name, move |input, output| {
            let core = FilterCore::new(class.clone(), class.clone(), input, output);
            Filter::leaf(core, make())
        });
    }

    /// Instantiate a class; the result carries `class_name` as its class
    pub fn construct(
        &self,
        class_name: &str,
        input: TypeDescriptor,
        output: TypeDescriptor,
    ) -> Result<Filter> {
        let constructor = self
            .constructors
            .get(class_name)
            .ok_or_else(|| Error::UnknownFilterClass(class_name.to_string()))?;
        let mut filter = constructor(input, output);
        filter.core_mut().set_class_name(class_name);
        Ok(filter)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.constructors.contains_key(class_name)
    }

    /// Registered classes, sorted
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn td(s: &str) -> TypeDescriptor {
        TypeDescriptor::parse(s).unwrap()
    }

    #[test]
    fn test_builtins_registered() {
        let factory = FilterFactory::with_builtins();
        assert_eq!(
            factory.class_names(),
            vec![
                "field_extract",
                "identity",
                "multiplexer",
                "sequencer",
                "string_case",
                "stringify"
            ]
        );
    }

    #[test]
    fn test_construct_leaf() {
        let factory = FilterFactory::with_builtins();
        let mut filter = factory
            .construct(STRINGIFY_CLASS, td("primitive::integer"), td("primitive::string"))
            .unwrap();
        assert_eq!(filter.class_name(), STRINGIFY_CLASS);
        assert_eq!(filter.execute(Value::Integer(3)).unwrap(), Value::from("3"));
    }

    #[test]
    fn test_construct_composite() {
        let factory = FilterFactory::with_builtins();
        let filter = factory
            .construct(MULTIPLEXER_CLASS, td("primitive::string"), td("primitive::string[]"))
            .unwrap();
        assert!(filter.is_composite());
        assert!(!filter.as_composite().unwrap().tolerate_failures());
    }

    #[test]
    fn test_unknown_class() {
        let factory = FilterFactory::new();
        let err = factory
            .construct("nope", td("primitive::string"), td("primitive::string"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFilterClass(ref c) if c == "nope"));
    }
}
