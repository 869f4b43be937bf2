//! stemcap library interface
//!
//! Per-stem capture from the karaoke site's custom backing track mixer.
//! Exposed as a library so the pipeline can be driven by integration tests
//! against an in-memory browser.

pub mod browser;
pub mod cli;
pub mod error;
pub mod progress;
pub mod selectors;
pub mod services;
pub mod stats;
pub mod timings;
pub mod workflow;

pub use crate::error::{BrowserError, BrowserResult};
pub use crate::timings::Timings;
pub use crate::workflow::{Session, SessionReport, TrackPipeline};
