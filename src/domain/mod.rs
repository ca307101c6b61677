//! Domain layer containing core business logic.
//!
//! This module contains:
//! - The typed option schema and the slskd option tree
//! - Merging user settings onto defaults
//! - Settings artifact generation and secret injection
//! - Service, firewall and reverse-proxy descriptors
//! - Log setup and log rotation

pub mod artifact;
pub mod descriptor;
mod error;
pub mod logger;
pub mod merge;
pub mod network;
pub mod options;
pub mod rotation;
pub mod schema;
pub mod secret;
mod share;
pub mod value;

pub use error::{
    ConfigurationError, InjectStage, ProvisionError, SchemaError, SecretError, SerializationError,
};
pub use merge::{ConfigMerger, MergedConfig, Overlay};
pub use share::ShareDir;
