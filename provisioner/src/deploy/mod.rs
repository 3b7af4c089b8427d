//! Deployment pipeline
//!
//! Deploys and unit starts are expressed as ordered, reversible actions run
//! by [`pipeline::Pipeline`].

pub mod actions;
pub mod commands;
pub mod pipeline;
