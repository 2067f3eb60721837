//! Simulation-only jet calibration: optional energy-scale shift, then
//! resolution smearing.
//!
//! The order is fixed. Real data never reaches this module: the event loop
//! only builds a [`CalibrationPipeline`] for simulated samples.

use rand::SeedableRng;
use rand::rngs::StdRng;

use sb_core::{Direction, Jet, NanoEvent, Variation};

use crate::systematics::Systematics;

/// Directional energy-scale shift for one uncertainty source.
pub trait EnergyScaleShift {
    /// Uncertainty source this shifter was built for.
    fn source(&self) -> &str;

    /// Return shifted copies of `jets`, in the same order.
    fn shift(&self, jets: &[Jet], direction: Direction) -> Vec<Jet>;
}

/// Stochastic resolution smearing.
pub trait ResolutionSmearing {
    /// Return smeared copies of `jets`, in the same order.
    ///
    /// `jer` selects the standard-resolution variation, `bjer` the one used for
    /// the b-regressed pt. All randomness comes from `rng`.
    fn smear(
        &self,
        event: &NanoEvent,
        jets: &[Jet],
        jer: Variation,
        bjer: Variation,
        rng: &mut StdRng,
    ) -> Vec<Jet>;
}

/// Calibration steps resolved for a simulated sample.
pub struct CalibrationPipeline {
    shift: Option<(Box<dyn EnergyScaleShift>, Direction)>,
    smear: Box<dyn ResolutionSmearing>,
    jer: Variation,
    bjer: Variation,
    rng: StdRng,
}

impl CalibrationPipeline {
    /// Assemble the pipeline.
    ///
    /// `shifter` is only kept when `systematics` requests a JES shift.
    pub fn new(
        systematics: &Systematics,
        shifter: Option<Box<dyn EnergyScaleShift>>,
        smear: Box<dyn ResolutionSmearing>,
        seed: u64,
    ) -> Self {
        let shift = match (systematics.jes_shift(), shifter) {
            (Some((_, direction)), Some(s)) => Some((s, direction)),
            (Some((name, _)), None) => {
                tracing::warn!(source = name, "JES shift requested without a shifter; skipping");
                None
            }
            (None, _) => None,
        };
        Self {
            shift,
            smear,
            jer: systematics.jer_variation(),
            bjer: systematics.bjer_variation(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Whether the energy-scale step runs.
    pub fn shifts_energy_scale(&self) -> bool {
        self.shift.is_some()
    }

    /// Calibrate `jets`. The input collection is left untouched.
    pub fn apply(&mut self, event: &NanoEvent, jets: &[Jet]) -> Vec<Jet> {
        let shifted;
        let jets = match &self.shift {
            Some((shifter, direction)) => {
                shifted = shifter.shift(jets, *direction);
                shifted.as_slice()
            }
            None => jets,
        };
        self.smear.smear(event, jets, self.jer, self.bjer, &mut self.rng)
    }
}
