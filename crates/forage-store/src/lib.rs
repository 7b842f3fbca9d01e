//! Persistence for Forage: the install manifest and the install log.
//!
//! Both live under the data directory (`~/.forage` by default).

pub mod log;
pub mod manifest;
pub mod record;

pub use log::{InstallLog, LogAction, LogEntry, INSTALL_LOG_FILE};
pub use manifest::{FileManifestStore, Manifest, ManifestStore, MANIFEST_FILE};
pub use record::InstalledTool;
