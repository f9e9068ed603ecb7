//! Bundle Module - per (user, machine) model persistence
//!
//! The four artifacts (columns, scaler, model, threshold) load together or
//! not at all.

pub mod storage;
pub mod types;
pub mod validate;

#[cfg(test)]
mod tests;

pub use storage::{load_bundle_dir, ArtifactStore};
pub use types::{ModelBundle, ModelKey, TrainingReport};
pub use validate::BundleError;
