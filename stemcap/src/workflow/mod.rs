//! Capture workflow
//!
//! - [`track_pipeline`]: the per-track state machine
//! - [`session`]: songs, login, cancellation and cleanup around it

pub mod session;
pub mod track_pipeline;

pub use session::{Session, SessionReport};
pub use track_pipeline::{PipelineContext, Stage, TrackPipeline, TrackResult};
