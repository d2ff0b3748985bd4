//! Local image store and the image-reference rules it shares with the
//! resolvers.
//!
//! ```text
//! <images_dir>/
//! ├── index.json            (id → names, size, timestamps)
//! ├── tmp/                  (archive staging, cleaned per import)
//! └── sha256/
//!     └── <id>/             (unpacked docker archive or OCI layout)
//! ```

pub(crate) mod import;
pub mod reference;
pub mod store;

pub use import::ImportSource;
pub use reference::ImageReference;
pub use store::{ImageBackend, ImageStore, Removal, StoredImage};
