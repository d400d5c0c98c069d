//! modgate: an HTTP gateway assembled from pluggable feature modules.
//!
//! Modules register with a [`module_registry::ModuleRegistry`]; at startup
//! [`module_mount::mount_all`] resolves environment overrides, initializes and
//! mounts each enabled module under its prefix, and isolates failures.

// Module system
pub mod module_mount;
pub mod module_registry;
pub mod module_resolve;
pub mod modules;

// HTTP surface
pub mod api_errors;
pub mod info;
pub mod server;

// Shared services
pub mod email;
pub mod rate_limiter;

// Configuration, errors, logging
pub mod app_config;
pub mod envinit;
pub mod errors;
pub mod paths;
pub mod telemetry;

pub mod cli;

pub use module_mount::{mount_all, MountReport};
pub use module_registry::{FeatureModule, ModuleError, ModuleRegistry, RegistryError};
pub use server::Server;
