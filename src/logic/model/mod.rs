//! Model Module - Reconstruction model, training and scoring
//!
//! The autoencoder sits behind the `Reconstructor` trait so the trainer and
//! scorer never depend on the concrete architecture.

pub mod autoencoder;
pub mod inference;
pub mod threshold;
pub mod trainer;

pub use inference::{score_frame, score_reading, ReadingScore, ScoreReport};
pub use threshold::calibrate;
pub use trainer::{
    reconstruction_errors, train_model, EpochReport, PriorSource, StartDecision, StartMode, TrainingObserver,
};
