//! # kc-cli
//!
//! Operator command line over `kc-directory`.
//!
//! This crate provides the `kcmm` commands for:
//! - Listing clusters and probing their health
//! - Searching users, clients and realm roles across clusters
//! - Listing and priming client roles
//! - Assigning realm and client roles to users and groups
//! - Exporting and importing selected entities
//! - Obtaining and inspecting tokens
//! - Comparing realm roles between clusters

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use cli::Cli;
pub use config::CliConfig;
pub use error::{CliError, CliResult};
