//! Features Module - column identity, scaling and windowing
//!
//! Turns a cleaned telemetry frame into model input:
//! schema resolution → column layout → standardization → windows.

pub mod layout;
pub mod scaler;
pub mod schema;
pub mod window;


// Re-export common types
pub use layout::SensorColumnSet;
pub use scaler::{fit_or_reuse, ScalerDecision, ScalerState};
pub use schema::{resolve_schema, ResolutionStrategy, ResolvedSchema, SchemaInput};
pub use window::{build_windows, covering_windows};
