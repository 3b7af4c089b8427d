//! Provisioner API models
//!
//! Types exchanged between the provisioner and the API layer that drives it.

pub mod source;
pub mod status;
pub mod unit;

pub use source::DeploySource;
pub use status::{Status, TransitionError};
pub use unit::Unit;
