//! Shipyard provisioner library
//!
//! Builds app images from source and runs app containers across a cluster of
//! container runtime nodes.

pub mod cluster;
pub mod container;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod image;
pub mod logs;
pub mod models;
pub mod provisioner;
pub mod repository;
pub mod router;
pub mod runtime;
pub mod settings;
pub mod store;
pub mod utils;

pub use errors::{ProvisionError, Result};
pub use provisioner::{Collaborators, Provisioner};
