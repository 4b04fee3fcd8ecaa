//! `primitive::` namespace

use super::{ParseError, TypeMatcher};
use crate::value::Value;

/// Scalar kinds supported by the primitive namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl PrimitiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(PrimitiveKind::String),
            "integer" => Some(PrimitiveKind::Integer),
            "float" => Some(PrimitiveKind::Float),
            "boolean" => Some(PrimitiveKind::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Boolean => "boolean",
        }
    }
}

/// Matches scalars of exactly one kind
#[derive(Debug, Clone)]
pub struct PrimitiveMatcher {
    kind: PrimitiveKind,
}

impl PrimitiveMatcher {
    pub fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    /// Matcher constructor registered for the `primitive` namespace
    pub fn construct(type_name: &str) -> Result<Box<dyn TypeMatcher>, ParseError> {
        PrimitiveKind::from_name(type_name)
            .map(|kind| Box::new(PrimitiveMatcher::new(kind)) as Box<dyn TypeMatcher>)
            .ok_or_else(|| ParseError::UnknownPrimitive(type_name.to_string()))
    }
}

impl TypeMatcher for PrimitiveMatcher {
    fn check_type(&self, value: &Value) -> bool {
        value.is_scalar() && value.type_name() == self.kind.as_str()
    }
}
