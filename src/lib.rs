//! purs-install - install the PureScript compiler
//!
//! Places a working `purs` binary in a directory: restored from a local
//! cache, downloaded as a prebuilt release, or built from source with
//! stack when nothing prebuilt fits this machine.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod install;
pub mod ui;

pub use error::{InstallError, InstallResult};
