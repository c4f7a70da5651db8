//! frag-core: shared types, configuration, errors, and the worker ring
//!
//! - `config`: `frag.toml` schema with defaults and validation
//! - `error`: the fatal error taxonomy shared by every crate
//! - `ring`: fixed worker ring with ordered claim/emit hand-off
//! - `types`: fragment hashes and fragment file naming

pub mod config;
pub mod error;
pub mod ring;
pub mod types;

pub use config::FragConfig;
pub use error::{FragError, FragResult};
pub use ring::{Ring, RingJob};
pub use types::{fragment_file_name, parse_fragment_file_name, FragmentHash, HASH_LEN};
