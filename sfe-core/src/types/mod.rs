//! Type descriptors
//!
//! A type descriptor is a textual contract such as `primitive::string`,
//! `class::lib.pkp.classes.submission.Submission` or `primitive::integer[3]`.
//! Parsing turns the text into a live matcher that answers whether a runtime
//! [`Value`] satisfies the contract.
//!
//! # Format
//!
//! ```text
//! <namespace>::<type name>[<cardinality>]
//! ```
//!
//! - exactly one `::` delimiter
//! - the namespace selects a matcher constructor from the
//!   [`TypeDescriptorRegistry`]
//! - optional cardinality: `[]` for an array of any length, `[n]` for an
//!   array of exactly `n` elements

use crate::value::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

mod class;
mod primitive;
mod registry;

pub use class::ClassMatcher;
pub use primitive::{PrimitiveKind, PrimitiveMatcher};
pub use registry::{MatcherConstructor, TypeDescriptorRegistry};

/// Namespace delimiter between the namespace token and the type name
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Errors raised while parsing a descriptor string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Descriptor '{0}' must have the form 'namespace::type'")]
    WrongPartCount(String),

    #[error("Unknown type descriptor namespace '{0}'")]
    UnknownNamespace(String),

    #[error("Unsupported primitive type '{0}'")]
    UnknownPrimitive(String),

    #[error("Descriptor '{0}' has an empty type name")]
    EmptyTypeName(String),

    #[error("Invalid cardinality in descriptor '{0}'")]
    InvalidCardinality(String),
}

/// Descriptor namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Primitive,
    Class,
    Other(String),
}

impl Namespace {
    pub fn from_token(token: &str) -> Self {
        match token {
            "primitive" => Namespace::Primitive,
            "class" => Namespace::Class,
            other => Namespace::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Namespace::Primitive => "primitive",
            Namespace::Class => "class",
            Namespace::Other(token) => token,
        }
    }
}

/// How many values a descriptor expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// A single value
    Scalar,
    /// An array of any length
    Array,
    /// An array of exactly this many elements
    Exactly(usize),
}

impl Cardinality {
    fn suffix(&self) -> String {
        match self {
            Cardinality::Scalar => String::new(),
            Cardinality::Array => "[]".to_string(),
            Cardinality::Exactly(n) => format!("[{}]", n),
        }
    }
}

/// Namespace-specific check of a single (non-array) value
pub trait TypeMatcher: Send + Sync + fmt::Debug {
    fn check_type(&self, value: &Value) -> bool;
}

/// Parsed, immutable type descriptor
#[derive(Clone)]
pub struct TypeDescriptor {
    namespace: Namespace,
    type_name: String,
    cardinality: Cardinality,
    matcher: Arc<dyn TypeMatcher>,
}

impl TypeDescriptor {
    /// Parse with the default registry (`primitive` and `class` namespaces)
    pub fn parse(descriptor: &str) -> Result<Self, ParseError> {
        registry::default_registry().parse(descriptor)
    }

    pub(crate) fn from_parts(
        namespace: Namespace,
        type_name: String,
        cardinality: Cardinality,
        matcher: Arc<dyn TypeMatcher>,
    ) -> Self {
        Self {
            namespace,
            type_name,
            cardinality,
            matcher,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Type name without namespace or cardinality
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Normalized descriptor string
    pub fn raw(&self) -> String {
        format!(
            "{}{}{}{}",
            self.namespace.as_str(),
            NAMESPACE_SEPARATOR,
            self.type_name,
            self.cardinality.suffix()
        )
    }

    /// Does the value satisfy this descriptor?
    pub fn matches(&self, value: &Value) -> bool {
        match self.cardinality {
            Cardinality::Scalar => self.matcher.check_type(value),
            Cardinality::Array => value
                .as_array()
                .map_or(false, |items| items.iter().all(|v| self.matcher.check_type(v))),
            Cardinality::Exactly(n) => value.as_array().map_or(false, |items| {
                items.len() == n && items.iter().all(|v| self.matcher.check_type(v))
            }),
        }
    }
}

/// Split `type[card]` into the type name and its cardinality
pub(crate) fn split_cardinality(
    descriptor: &str,
    payload: &str,
) -> Result<(String, Cardinality), ParseError> {
    if !payload.ends_with(']') {
        if payload.contains('[') {
            return Err(ParseError::InvalidCardinality(descriptor.to_string()));
        }
        return Ok((payload.to_string(), Cardinality::Scalar));
    }

    let open = payload
        .rfind('[')
        .ok_or_else(|| ParseError::InvalidCardinality(descriptor.to_string()))?;
    let inner = &payload[open + 1..payload.len() - 1];
    let cardinality = if inner.is_empty() {
        Cardinality::Array
    } else {
        inner
            .parse::<usize>()
            .map(Cardinality::Exactly)
            .map_err(|_| ParseError::InvalidCardinality(descriptor.to_string()))?
    };

    let type_name = &payload[..open];
    if type_name.contains('[') || type_name.contains(']') {
        return Err(ParseError::InvalidCardinality(descriptor.to_string()));
    }
    Ok((type_name.to_string(), cardinality))
}

impl FromStr for TypeDescriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeDescriptor::parse(s)
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.raw() == other.raw()
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeDescriptor").field(&self.raw()).finish()
    }
}
