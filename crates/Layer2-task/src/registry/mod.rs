//! Registry manager
//!
//! Discovers task directories, resolves their descriptors into entries and
//! owns the resulting [`Task`](crate::Task) instances.

mod catalog;
mod discovery;
mod manager;
mod manifest;

pub use catalog::TaskCatalog;
pub use discovery::discover;
pub use manager::{LoadFailure, LoadReport, TaskRegistry};
pub use manifest::{EntrySpec, TaskManifest, MANIFEST_FILE};
