//! # SFE Core Library
//!
//! Typed filter engine shared by the SFE tools:
//! - Type descriptors (`primitive::string`, `class::lib.pkp.classes.Foo[]`)
//! - Filters, sequencers and multiplexers with validated input/output contracts
//! - Capability/runtime gate for filters with environment requirements
//! - SQLite-backed filter registry with cycle-safe tree reconstruction
//! - Bootstrap configuration and filter installation files

pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod factory;
pub mod filter;
pub mod registry;
pub mod types;
pub mod value;

pub use environment::{Environment, RuntimeRequirements, Version};
pub use error::{Error, Result};
pub use factory::FilterFactory;
pub use filter::{CompositeFilter, Filter, FilterError, LeafFilter, Transformer};
pub use registry::PersistableFilterRegistry;
pub use types::{ParseError, TypeDescriptor, TypeDescriptorRegistry};
pub use value::{Object, Value};
