//! Namespace → matcher constructor table

use super::{
    split_cardinality, ClassMatcher, Namespace, ParseError, PrimitiveMatcher, TypeDescriptor,
    TypeMatcher, NAMESPACE_SEPARATOR,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a matcher from the type name part of a descriptor
pub type MatcherConstructor = fn(&str) -> Result<Box<dyn TypeMatcher>, ParseError>;

static DEFAULT_REGISTRY: Lazy<TypeDescriptorRegistry> = Lazy::new(TypeDescriptorRegistry::default);

pub(super) fn default_registry() -> &'static TypeDescriptorRegistry {
    &DEFAULT_REGISTRY
}

/// Maps namespace tokens to matcher constructors
#[derive(Clone)]
pub struct TypeDescriptorRegistry {
    constructors: HashMap<String, MatcherConstructor>,
}

impl fmt::Debug for TypeDescriptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptorRegistry")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

impl Default for TypeDescriptorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Namespace::Primitive.as_str(), PrimitiveMatcher::construct);
        registry.register(Namespace::Class.as_str(), ClassMatcher::construct);
        registry
    }
}

impl TypeDescriptorRegistry {
    /// Registry without any namespace
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) the constructor for a namespace token
    pub fn register(&mut self, namespace: impl Into<String>, constructor: MatcherConstructor) {
        self.constructors.insert(namespace.into(), constructor);
    }

    pub fn supports_namespace(&self, namespace: &str) -> bool {
        self.constructors.contains_key(namespace)
    }

    pub fn namespaces(&self) -> Vec<&str> {
        let mut namespaces: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        namespaces.sort_unstable();
        namespaces
    }

    /// Turn a descriptor string into a live matcher
    pub fn parse(&self, descriptor: &str) -> Result<TypeDescriptor, ParseError> {
        let parts: Vec<&str> = descriptor.split(NAMESPACE_SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(ParseError::WrongPartCount(descriptor.to_string()));
        }
        let (token, payload) = (parts[0].trim(), parts[1].trim());

        let constructor = self
            .constructors
            .get(token)
            .ok_or_else(|| ParseError::UnknownNamespace(token.to_string()))?;

        let (type_name, cardinality) = split_cardinality(descriptor, payload)?;
        if type_name.is_empty() {
            return Err(ParseError::EmptyTypeName(descriptor.to_string()));
        }

        let matcher: Arc<dyn TypeMatcher> = Arc::from(constructor(&type_name)?);
        Ok(TypeDescriptor::from_parts(
            Namespace::from_token(token),
            type_name,
            cardinality,
            matcher,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[derive(Debug)]
    struct AnyMatcher;

    impl TypeMatcher for AnyMatcher {
        fn check_type(&self, _value: &Value) -> bool {
            true
        }
    }

    fn any_matcher(_type_name: &str) -> Result<Box<dyn TypeMatcher>, ParseError> {
        Ok(Box::new(AnyMatcher))
    }

    #[test]
    fn test_default_namespaces() {
        let registry = TypeDescriptorRegistry::default();
        assert_eq!(registry.namespaces(), vec!["class", "primitive"]);
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let registry = TypeDescriptorRegistry::empty();
        assert!(matches!(
            registry.parse("primitive::string"),
            Err(ParseError::UnknownNamespace(_))
        ));
    }

    #[test]
    fn test_custom_namespace() {
        let mut registry = TypeDescriptorRegistry::default();
        registry.register("mixed", any_matcher);

        let descriptor = registry.parse("mixed::anything").unwrap();
        assert_eq!(descriptor.namespace(), &Namespace::Other("mixed".to_string()));
        assert!(descriptor.matches(&Value::Null));
        assert_eq!(descriptor.raw(), "mixed::anything");
    }

    #[test]
    fn test_empty_type_name() {
        let registry = TypeDescriptorRegistry::default();
        assert!(matches!(
            registry.parse("primitive::"),
            Err(ParseError::EmptyTypeName(_))
        ));
    }
}
