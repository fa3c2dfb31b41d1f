//! vmsmith
//!
//! Builds macOS VM templates by driving the `anka` command-line tool:
//! create a VM from an installer (or clone an existing one), reconcile its
//! resources and properties with the desired state, then suspend or stop it
//! and optionally push it to a registry.

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod installer;
pub mod logging;
pub mod post;
pub mod reconcile;
pub mod steps;
pub mod ui;
