//! Database schema and row access

pub mod filters;
pub mod groups;
pub mod init;

pub use filters::*;
pub use groups::*;
pub use init::*;
