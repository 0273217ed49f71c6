//! Bootstraps Multipass on a developer workstation
//!
//! The installer core ([`install`], [`reconcile`]) detects the VM tool,
//! fetches and runs its installer, registers a login-time relaunch and
//! drives the daemon service to running. [`menu`] and [`multipass`] sit on
//! top and manage instances through the `multipass` command line.

pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod install;
pub mod menu;
pub mod multipass;
pub mod reconcile;

pub use error::{InstallerError, Result};
