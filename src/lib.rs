#![warn(clippy::pedantic)]
#![warn(unused_crate_dependencies)]
// `windows-sys`/`libc` are each only pulled in by one `cfg`-gated platform
// module; the other platform's build never references them.
#![allow(unused_crate_dependencies)]

//! `gestvenv`: creates, inspects, repairs and destroys isolated Python
//! virtual environments, delegating package installation to whichever of
//! `pip`, `uv`, `poetry` or `pdm` the Backend Selector picks.
//!
//! The public entry point is [`manager::EnvironmentManager`]; every other
//! module is a collaborator it wires together.

pub mod backend;
pub mod cache;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod platform_adapter;
pub mod pyproject;
pub mod registry;

pub use error::GestvenvError;
pub use manager::EnvironmentManager;
