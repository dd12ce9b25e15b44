//! Data Models
//!
//! This module contains the pure data types shared across StateSpace:
//!
//! - `PropertyPath` - segment-based addressing with a dotted boundary form
//! - `RegistrationSpec` - the `"real.path as alias.path"` grammar
//! - value helpers classifying and assembling plain `serde_json::Value`s

pub mod path;
pub mod value;

pub use path::{PathError, PropertyPath, RegistrationSpec};
