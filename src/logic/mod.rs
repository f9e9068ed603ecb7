//! Logic Module - Training and scoring pipeline
//!
//! - `dataset/` - bounded loading, cleaning, downsampling
//! - `features/` - schema resolution, scaling, windowing
//! - `model/` - reconstruction model, training loop, threshold, scorer
//! - `bundle/` - per-(user, machine) artifact store
//! - `events` / `job` - progress channel and job state machine

pub mod bundle;
pub mod config;
pub mod dataset;
pub mod error;
pub mod events;
pub mod features;
pub mod job;
pub mod model;
pub mod pipeline;
