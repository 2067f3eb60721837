//! # sb-core
//!
//! Shared types, error handling and the input-source trait for the six-b skim.
//!
//! Everything here is independent of the on-disk format: the Parquet reader
//! lives in `sb-io`, the per-event pipeline in `sb-skim`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{EventSource, MemorySource, trigger_or_of};
pub use types::{
    Calibration, Direction, EventInfo, GenB, GenJet, GenParticle, Jet, NanoEvent, P4, RecoJet,
    Variation,
};
