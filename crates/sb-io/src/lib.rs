//! # sb-io
//!
//! Parquet input and output for the six-b skim:
//!
//! - [`ParquetChain`]: an [`sb_core::EventSource`] over a list of NanoAOD-like
//!   Parquet files.
//! - [`ParquetSink`]: an [`sb_skim::RecordSink`] writing the skim output.
//! - [`read_file_list`]: text file lists.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file_list;
pub mod nano;
pub mod sink;

pub use file_list::{parse_file_list, read_file_list};
pub use nano::ParquetChain;
pub use sink::{META_KEY_SCHEMA_VERSION, ParquetSink, SKIM_SCHEMA_V1, arrow_schema};
