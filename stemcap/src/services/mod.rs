//! Service modules for the capture pipeline
//!
//! Leaf components driven by `workflow::TrackPipeline`, plus the site
//! collaborators (authentication, track discovery).

pub mod auth;
pub mod download_actuator;
pub mod download_monitor;
pub mod fs_scan;
pub mod mixer;
pub mod name_cleaner;
pub mod solo_validator;
pub mod track_discovery;

pub use auth::{Authenticator, Credentials, SiteAuthenticator};
pub use download_actuator::{ClickReport, DownloadActuator, Located};
pub use download_monitor::{DownloadMonitor, MonitorHandle, MonitorPhase};
pub use fs_scan::{FileInfo, FileSnapshot, FsScanner};
pub use mixer::MixerControl;
pub use name_cleaner::{NameCleaner, RenameError};
pub use solo_validator::{MixCheck, SoloCheck, SoloValidator};
pub use track_discovery::{PageTrackDiscoverer, TrackDiscoverer};
