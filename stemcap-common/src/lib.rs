//! # stemcap common library
//!
//! Shared code for the stem capture tool:
//! - Error type
//! - Data model (songs, tracks, per-track jobs, download outcomes)
//! - Song list configuration and download root resolution
//! - Human-readable time and size formatting

pub mod config;
pub mod error;
pub mod human_time;
pub mod models;

pub use error::{Error, Result};
pub use models::{
    DownloadOutcome, FailureKind, JobKey, Song, TimeoutPhase, Track, TrackJob, TrackStatus,
};
