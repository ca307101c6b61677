//! Service layer orchestrating one activation.

mod activation;

pub use activation::{inject, ActivationError, ActivationService, Stage};
