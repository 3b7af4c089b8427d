//! Provisioner integration tests

mod common;
mod test_cluster;
mod test_container;
mod test_deploy;
mod test_provisioner;
