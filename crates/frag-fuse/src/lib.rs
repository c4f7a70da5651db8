//! frag-fuse: fragment directories read back as single files
//!
//! - `fragdir`: reconstruction reads over a directory of fragment files
//! - `driver`: read-only FUSE passthrough (feature: fuse, Linux + macOS)

pub mod driver;
pub mod fragdir;

// Re-export the mount API when the fuse feature is enabled
#[cfg(feature = "fuse")]
pub use driver::{mount, MountConfig};

pub use fragdir::{is_fragment_dir, FragmentedFile};
