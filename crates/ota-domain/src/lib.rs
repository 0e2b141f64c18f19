#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod manifest;
pub mod model;
pub mod selection;

pub use manifest::{Manifest, ManifestError};
pub use model::{Asset, HashType, UnknownVariant, Update, UpdateStatus};
pub use selection::{NewestCompatible, PinnedUpdate, SelectionPolicy};
