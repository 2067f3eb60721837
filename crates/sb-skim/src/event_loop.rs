//! Event-loop driver.
//!
//! One skim job is a small state machine:
//!
//! ```text
//! Init -> Reading -> Gating -> Processing -> Recording -> Reading ... -> Done
//!                      |                                     ^
//!                      +------------- rejected --------------+
//! ```
//!
//! `Init` resolves triggers, the validity gate, (for simulation) the
//! calibration pipeline and the output schema. Failures there abort the job
//! before any event is read.

use std::sync::Arc;

use sb_core::{Error, EventInfo, EventSource, Result};

use crate::assembler::StandardBranches;
use crate::calibration::{CalibrationPipeline, EnergyScaleShift, ResolutionSmearing};
use crate::config::JobConfig;
use crate::jec::JecUncertaintySource;
use crate::jer::JerSmearer;
use crate::lumi::ValidityGate;
use crate::output::{OutputRecord, OutputSchema, RecordSink, SchemaBuilder};
use crate::selection::{CascadeOutcome, SelectionServices, run_cascade};
use crate::systematics::Systematics;
use crate::trigger::TriggerDefinition;

/// Iterations between progress messages.
pub const PROGRESS_EVERY: u64 = 10_000;

/// What kind of sample is being skimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Real collision data: validity mask applied, never calibrated.
    Data,
    /// Simulation; `signal` enables generator-truth matching.
    Simulation {
        /// Signal sample.
        signal: bool,
    },
}

impl SampleKind {
    /// Build from command-line flags. Data is never treated as signal.
    pub fn from_flags(is_data: bool, is_signal: bool) -> Self {
        if is_data {
            if is_signal {
                tracing::warn!("--is-signal ignored for data");
            }
            SampleKind::Data
        } else {
            SampleKind::Simulation { signal: is_signal }
        }
    }

    /// Real data.
    pub fn is_data(self) -> bool {
        matches!(self, SampleKind::Data)
    }

    /// Signal simulation.
    pub fn is_signal(self) -> bool {
        matches!(self, SampleKind::Simulation { signal: true })
    }
}

/// Everything fixed before the loop starts.
#[derive(Debug, Clone)]
pub struct JobSetup {
    /// Parsed configuration file.
    pub config: JobConfig,
    /// Resolved calibration variations.
    pub systematics: Systematics,
    /// Data or simulation.
    pub sample: SampleKind,
    /// RNG seed for the smearing.
    pub seed: u64,
    /// Maximum number of events read; negative means no limit.
    pub max_events: i64,
    /// Also write candidate masses.
    pub save_p4: bool,
}

impl JobSetup {
    /// Nominal simulation job with default settings.
    pub fn simulation(config: JobConfig, signal: bool) -> Self {
        Self {
            config,
            systematics: Systematics::nominal(),
            sample: SampleKind::Simulation { signal },
            seed: 12345,
            max_events: -1,
            save_p4: false,
        }
    }
}

/// Loop position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Resolving the job.
    Init,
    /// Fetching the next record.
    Reading,
    /// Consulting the validity gate.
    Gating,
    /// Truth matching, calibration and selection.
    Processing,
    /// Filling and committing the output record.
    Recording,
    /// Input exhausted or cap reached.
    Done,
}

/// Job counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkimSummary {
    /// Records read from the source.
    pub n_read: u64,
    /// Records dropped by the validity gate.
    pub n_rejected_lumi: u64,
    /// Records committed to the sink.
    pub n_written: u64,
}

struct Pending {
    info: EventInfo,
    pass_trigger: bool,
    outcome: CascadeOutcome,
}

struct Runtime {
    gate: ValidityGate,
    calibration: Option<CalibrationPipeline>,
    record: OutputRecord,
    pending: Option<Pending>,
    summary: SkimSummary,
}

/// Drives one skim job.
pub struct Skimmer<S: SelectionServices> {
    job: JobSetup,
    services: S,
    branches: StandardBranches,
    shifter: Option<Box<dyn EnergyScaleShift>>,
    smearing: Option<Box<dyn ResolutionSmearing>>,
}

impl<S: SelectionServices> Skimmer<S> {
    /// Create a driver. Calibration inputs are loaded from the config at `Init`.
    pub fn new(job: JobSetup, services: S) -> Self {
        let branches = StandardBranches::new(job.save_p4);
        Self { job, services, branches, shifter: None, smearing: None }
    }

    /// Use `shifter` instead of loading `parameters.jec_file`.
    pub fn with_energy_scale(mut self, shifter: Box<dyn EnergyScaleShift>) -> Self {
        self.shifter = Some(shifter);
        self
    }

    /// Use `smearing` instead of loading the JER tables.
    pub fn with_smearing(mut self, smearing: Box<dyn ResolutionSmearing>) -> Self {
        self.smearing = Some(smearing);
        self
    }

    /// Job settings.
    pub fn job(&self) -> &JobSetup {
        &self.job
    }

    /// Run the job to completion.
    pub fn run(mut self, source: &mut dyn EventSource, sink: &mut dyn RecordSink) -> Result<SkimSummary> {
        let mut state = LoopState::Init;
        let mut rt = self.init(source, sink)?;
        state = self.next_after(state);

        while state != LoopState::Done {
            state = self.step(state, &mut rt, source, sink)?;
        }

        let n_persisted = sink.finish()?;
        let summary = rt.summary;
        tracing::info!(
            n_read = summary.n_read,
            n_rejected_lumi = summary.n_rejected_lumi,
            n_written = summary.n_written,
            n_persisted,
            "skim finished"
        );
        Ok(summary)
    }

    fn next_after(&self, state: LoopState) -> LoopState {
        match state {
            LoopState::Init | LoopState::Recording => LoopState::Reading,
            LoopState::Reading => LoopState::Gating,
            LoopState::Gating => LoopState::Processing,
            LoopState::Processing => LoopState::Recording,
            LoopState::Done => LoopState::Done,
        }
    }

    fn init(&mut self, source: &mut dyn EventSource, sink: &mut dyn RecordSink) -> Result<Runtime> {
        let cfg = &self.job.config;

        let triggers = TriggerDefinition::resolve(&cfg.triggers.make_or_of, cfg.triggers.apply_trigger)?;
        let branch_names = triggers.branch_names();
        tracing::info!(n_triggers = branch_names.len(), "trigger OR: {}", branch_names.join(" || "));
        source.set_triggers(&branch_names);

        let gate = ValidityGate::for_sample(self.job.sample.is_data(), cfg.data.lumimask.as_deref())?;

        let calibration = if self.job.sample.is_data() {
            tracing::info!("data sample: jet calibration disabled");
            None
        } else {
            Some(self.build_calibration()?)
        };

        let schema = self.declare_schema()?;
        sink.begin(&schema)?;
        let record = OutputRecord::new(schema);

        tracing::info!(
            sample = ?self.job.sample,
            systematics = %self.job.systematics,
            seed = self.job.seed,
            max_events = self.job.max_events,
            "skim initialised"
        );
        Ok(Runtime { gate, calibration, record, pending: None, summary: SkimSummary::default() })
    }

    fn declare_schema(&self) -> Result<Arc<OutputSchema>> {
        let mut builder = SchemaBuilder::new();
        self.branches.declare(&mut builder)?;
        Ok(builder.freeze())
    }

    fn build_calibration(&mut self) -> Result<CalibrationPipeline> {
        let params = &self.job.config.parameters;
        let systematics = &self.job.systematics;

        let shifter = match systematics.jes_shift() {
            Some((source, _)) => match self.shifter.take() {
                Some(s) => Some(s),
                None => {
                    let path = params.jec_file.as_deref().ok_or_else(|| {
                        Error::config("parameters.jec_file", "", "required for a JES shift")
                    })?;
                    let jec = JecUncertaintySource::from_file(path, source)?;
                    tracing::info!(source, path = %path.display(), "JES uncertainty loaded");
                    Some(Box::new(jec) as Box<dyn EnergyScaleShift>)
                }
            },
            None => None,
        };

        let smearing: Box<dyn ResolutionSmearing> = match self.smearing.take() {
            Some(s) => s,
            None => {
                let sf = params.jer_scale_factor_file.as_deref().ok_or_else(|| {
                    Error::config("parameters.jer_scale_factor_file", "", "required for simulation")
                })?;
                let res = params.jer_resolution_file.as_deref().ok_or_else(|| {
                    Error::config("parameters.jer_resolution_file", "", "required for simulation")
                })?;
                Box::new(JerSmearer::from_files(sf, res)?)
            }
        };

        Ok(CalibrationPipeline::new(systematics, shifter, smearing, self.job.seed))
    }

    fn step(
        &self,
        state: LoopState,
        rt: &mut Runtime,
        source: &mut dyn EventSource,
        sink: &mut dyn RecordSink,
    ) -> Result<LoopState> {
        let next = match state {
            LoopState::Reading => {
                let capped = self.job.max_events >= 0 && rt.summary.n_read >= self.job.max_events as u64;
                if capped || !source.advance()? {
                    return Ok(LoopState::Done);
                }
                if rt.summary.n_read % PROGRESS_EVERY == 0 {
                    tracing::info!(n_read = rt.summary.n_read, "processing");
                }
                rt.summary.n_read += 1;
                self.next_after(state)
            }
            LoopState::Gating => {
                let event = source.event();
                if rt.gate.is_valid(event.run, event.luminosity_block) {
                    self.next_after(state)
                } else {
                    tracing::trace!(run = event.run, lumi = event.luminosity_block, "outside lumi mask");
                    rt.summary.n_rejected_lumi += 1;
                    LoopState::Reading
                }
            }
            LoopState::Processing => {
                rt.pending = Some(self.process(source, rt.calibration.as_mut())?);
                self.next_after(state)
            }
            LoopState::Recording => {
                let pending = rt
                    .pending
                    .take()
                    .ok_or_else(|| Error::Output("no processed event to record".into()))?;
                rt.record.clear();
                self.branches.fill(&mut rt.record, &pending.info, pending.pass_trigger, &pending.outcome)?;
                sink.commit(&rt.record)?;
                rt.summary.n_written += 1;
                self.next_after(state)
            }
            LoopState::Init | LoopState::Done => LoopState::Done,
        };
        Ok(next)
    }

    fn process(&self, source: &dyn EventSource, calibration: Option<&mut CalibrationPipeline>) -> Result<Pending> {
        let event = source.event();
        let signal = self.job.sample.is_signal();

        let mut info = EventInfo::default();
        self.services.copy_event_info(event, &mut info);
        if signal {
            self.services.select_gen_particles(event, &mut info);
            self.services.match_genbs_to_genjets(event, &mut info);
            self.services.match_genbs_genjets_to_reco(event, &mut info);
        }

        let outcome = run_cascade(&self.services, event, &info, signal, calibration)?;
        Ok(Pending { info, pass_trigger: source.trigger_or(), outcome })
    }
}
