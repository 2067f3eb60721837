//! # sb-skim
//!
//! Per-event pipeline of the six-b skim: systematic resolution, trigger and
//! validity gating, simulation-only jet calibration, the three-stage jet
//! selection and the output record.
//!
//! [`Skimmer`] ties the pieces together over any [`sb_core::EventSource`] and
//! [`RecordSink`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod calibration;
pub mod config;
pub mod event_loop;
pub mod jec;
pub mod jer;
pub mod lumi;
pub mod output;
pub mod selection;
pub mod systematics;
pub mod trigger;

pub use assembler::StandardBranches;
pub use calibration::{CalibrationPipeline, EnergyScaleShift, ResolutionSmearing};
pub use config::{JobConfig, read_job_config};
pub use event_loop::{JobSetup, LoopState, SampleKind, SkimSummary, Skimmer};
pub use jec::JecUncertaintySource;
pub use jer::{JerSmearer, ResolutionTable, ScaleFactorTable};
pub use lumi::{LumiMask, ValidityGate};
pub use output::{
    BranchDecl, BranchKind, BranchValue, MemorySink, OutputRecord, OutputSchema, RecordSink,
    SchemaBuilder,
};
pub use selection::{CascadeOutcome, PreselectionCuts, SelectionServices, SixBFunctions, run_cascade};
pub use systematics::{Category, Mode, SystematicSpec, Systematics};
pub use trigger::{TriggerDefinition, TriggerEntry};
