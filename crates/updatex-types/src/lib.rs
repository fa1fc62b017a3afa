//! Shared data types for the update pipeline.
//!
//! Everything here is plain data: no I/O and no runtime. The pipeline
//! crate and the event bus both depend on these definitions.

mod error;
mod event;
mod installer;
mod manifest;
mod platform;

pub use error::{ErrorKind, UpdateError, UpdateResult};
pub use event::{UpdateEvent, UpdateState};
pub use installer::InstallerEvent;
pub use manifest::{UpdateManifest, UpdateMetadata};
pub use platform::Platform;
