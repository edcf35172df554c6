//! Repackages the Claude Desktop Windows release as a native Linux package.
//!
//! A run probes the host, installs missing build tools, downloads (or
//! reuses) the vendor installer, unpacks it, extracts icons, swaps the
//! Windows-only native module for a stub and builds a distribution package.
//!
//! # Architecture
//!
//! ```text
//! preflight ──► deps ──► fetch ──► unpack ──┬──► icons ──┐
//!                                           └──► patch ──┴──► assemble
//! ```
//!
//! External tools are never spawned directly by a stage. Each one is a
//! [`process::Step`] that declares its identity (elevated or real user) and
//! its severity, and runs through a [`process::Runner`]. Network access goes
//! through [`fetch::Transport`].

pub mod assemble;
pub mod config;
pub mod deps;
pub mod distro;
pub mod error;
pub mod fetch;
pub mod filesystem;
pub mod icons;
pub mod patch;
pub mod pipeline;
pub mod preflight;
pub mod privilege;
pub mod process;
pub mod unpack;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use distro::Distro;
pub use error::PipelineError;
pub use pipeline::{Pipeline, RunSummary, Stage};
pub use privilege::{Identity, PrivilegeContext};
pub use workspace::Workspace;
