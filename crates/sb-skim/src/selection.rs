//! Jet selection cascade and generator-truth bookkeeping.
//!
//! Stages: all reconstructed jets → preselected jets → six-b candidates. Each
//! stage filters the previous one, so both collection sizes and truth-match
//! counts are non-increasing along the cascade.

use serde::Deserialize;

use sb_core::{Error, EventInfo, GenB, Jet, NanoEvent, Result};

use crate::calibration::CalibrationPipeline;

const PDG_B: i32 = 5;
const PDG_HIGGS: i32 = 25;
/// Maximum gen-b / gen-jet distance for a match.
const GEN_MATCH_DR: f64 = 0.4;

/// Baseline jet quality and kinematic cuts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreselectionCuts {
    /// Minimum jet pt [GeV].
    #[serde(default = "default_pt_min")]
    pub pt_min: f64,
    /// Maximum |eta|.
    #[serde(default = "default_eta_max")]
    pub eta_max: f64,
    /// Minimum jet-id word.
    #[serde(default = "default_jet_id_min")]
    pub jet_id_min: i32,
    /// Minimum pile-up-id word, applied below `pu_id_pt_max`.
    #[serde(default = "default_pu_id_min")]
    pub pu_id_min: i32,
    /// Pile-up id is only required for jets softer than this [GeV].
    #[serde(default = "default_pu_id_pt_max")]
    pub pu_id_pt_max: f64,
}

fn default_pt_min() -> f64 {
    20.0
}

fn default_eta_max() -> f64 {
    2.5
}

fn default_jet_id_min() -> i32 {
    6
}

fn default_pu_id_min() -> i32 {
    6
}

fn default_pu_id_pt_max() -> f64 {
    50.0
}

impl Default for PreselectionCuts {
    fn default() -> Self {
        Self {
            pt_min: default_pt_min(),
            eta_max: default_eta_max(),
            jet_id_min: default_jet_id_min(),
            pu_id_min: default_pu_id_min(),
            pu_id_pt_max: default_pu_id_pt_max(),
        }
    }
}

impl PreselectionCuts {
    /// Whether `jet` passes.
    pub fn accepts(&self, jet: &Jet) -> bool {
        jet.p4.pt > self.pt_min
            && jet.p4.eta.abs() < self.eta_max
            && jet.jet_id >= self.jet_id_min
            && (jet.p4.pt >= self.pu_id_pt_max || jet.pu_id >= self.pu_id_min)
    }
}

/// Truth-matching and selection capabilities used by the cascade.
pub trait SelectionServices {
    /// Copy global scalars of `event` into `ei`.
    fn copy_event_info(&self, event: &NanoEvent, ei: &mut EventInfo);

    /// Find the generator b quarks of the signal decay.
    fn select_gen_particles(&self, event: &NanoEvent, ei: &mut EventInfo);

    /// Associate each generator b quark with a generator jet.
    fn match_genbs_to_genjets(&self, event: &NanoEvent, ei: &mut EventInfo);

    /// Associate matched generator jets with reconstructed jets.
    fn match_genbs_genjets_to_reco(&self, event: &NanoEvent, ei: &mut EventInfo);

    /// Every reconstructed jet, in input order.
    fn get_all_jets(&self, event: &NanoEvent) -> Vec<Jet>;

    /// Number of jets in `jets` matched to a generator b quark.
    fn n_gjmatched_in_jetcoll(&self, ei: &EventInfo, jets: &[Jet]) -> usize;

    /// Baseline selection. Must return a subset of `jets`; [`run_cascade`]
    /// fails otherwise.
    fn preselect_jets(&self, event: &NanoEvent, jets: &[Jet]) -> Vec<Jet>;

    /// Signal-region selection. Must return a subset of `jets`; [`run_cascade`]
    /// fails otherwise.
    fn select_sixb_jets(&self, event: &NanoEvent, jets: &[Jet]) -> Vec<Jet>;
}

/// Default selection for the X → YH → 3 × bb̄ (six-b) final state.
#[derive(Debug, Clone, PartialEq)]
pub struct SixBFunctions {
    cuts: PreselectionCuts,
    n_max: usize,
}

impl SixBFunctions {
    /// Create with the given preselection and the number of jets to keep.
    pub fn new(cuts: PreselectionCuts, n_max: usize) -> Self {
        Self { cuts, n_max }
    }

    /// Preselection cuts in use.
    pub fn cuts(&self) -> &PreselectionCuts {
        &self.cuts
    }
}

impl Default for SixBFunctions {
    fn default() -> Self {
        Self::new(PreselectionCuts::default(), 6)
    }
}

impl SelectionServices for SixBFunctions {
    fn copy_event_info(&self, event: &NanoEvent, ei: &mut EventInfo) {
        ei.run = event.run;
        ei.luminosity_block = event.luminosity_block;
        ei.event = event.event;
        ei.n_pv = event.n_pv;
        ei.rho = event.rho;
        ei.met_pt = event.met_pt;
    }

    fn select_gen_particles(&self, event: &NanoEvent, ei: &mut EventInfo) {
        let mut higgs: Vec<usize> = Vec::new();
        ei.gen_bs.clear();
        for (idx, part) in event.gen_particles.iter().enumerate() {
            if part.pdg_id.abs() != PDG_B {
                continue;
            }
            let Some(mother) = part.mother_idx else { continue };
            let from_higgs =
                event.gen_particles.get(mother).is_some_and(|m| m.pdg_id == PDG_HIGGS);
            if !from_higgs {
                continue;
            }
            let signal_id = match higgs.iter().position(|&h| h == mother) {
                Some(pos) => pos,
                None => {
                    higgs.push(mother);
                    higgs.len() - 1
                }
            };
            ei.gen_bs.push(GenB {
                particle_idx: idx,
                p4: part.p4,
                signal_id,
                gen_jet_idx: None,
                reco_jet_idx: None,
            });
        }
    }

    fn match_genbs_to_genjets(&self, event: &NanoEvent, ei: &mut EventInfo) {
        let mut used = vec![false; event.gen_jets.len()];
        for b in &mut ei.gen_bs {
            let best = event
                .gen_jets
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .map(|(i, gj)| (i, gj.p4.delta_r(&b.p4)))
                .filter(|(_, dr)| *dr < GEN_MATCH_DR)
                .min_by(|x, y| x.1.total_cmp(&y.1));
            b.gen_jet_idx = best.map(|(i, _)| {
                used[i] = true;
                i
            });
        }
    }

    fn match_genbs_genjets_to_reco(&self, event: &NanoEvent, ei: &mut EventInfo) {
        for b in &mut ei.gen_bs {
            b.reco_jet_idx = b
                .gen_jet_idx
                .and_then(|gj| event.jets.iter().position(|j| j.gen_jet_idx == Some(gj)));
        }
    }

    fn get_all_jets(&self, event: &NanoEvent) -> Vec<Jet> {
        event.jets.iter().enumerate().map(|(i, reco)| Jet::from_reco(i, reco)).collect()
    }

    fn n_gjmatched_in_jetcoll(&self, ei: &EventInfo, jets: &[Jet]) -> usize {
        let matched: Vec<usize> = ei.matched_reco_indices().collect();
        jets.iter().filter(|j| matched.contains(&j.index)).count()
    }

    fn preselect_jets(&self, _event: &NanoEvent, jets: &[Jet]) -> Vec<Jet> {
        jets.iter().filter(|j| self.cuts.accepts(j)).cloned().collect()
    }

    fn select_sixb_jets(&self, _event: &NanoEvent, jets: &[Jet]) -> Vec<Jet> {
        let mut ranked = jets.to_vec();
        // stable: ties keep preselection order
        ranked.sort_by(|a, b| b.btag.total_cmp(&a.btag));
        ranked.truncate(self.n_max);
        ranked
    }
}

/// Collections and truth-match counters of one event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CascadeOutcome {
    /// Every reconstructed jet (calibrated for simulation).
    pub all: Vec<Jet>,
    /// Preselected jets.
    pub presel: Vec<Jet>,
    /// Six-b candidates.
    pub sixb: Vec<Jet>,
    /// Matches among all jets, counted before calibration.
    pub nfound_all: usize,
    /// Matches among preselected jets.
    pub nfound_presel: usize,
    /// Matches among six-b candidates.
    pub nfound_sixb: usize,
}

impl CascadeOutcome {
    /// Whether the nesting invariants hold.
    pub fn is_monotonic(&self) -> bool {
        self.sixb.len() <= self.presel.len()
            && self.presel.len() <= self.all.len()
            && self.nfound_sixb <= self.nfound_presel
            && self.nfound_presel <= self.nfound_all
    }
}

/// Run the cascade on one event.
///
/// `ei` must already hold the truth matching for signal samples. For
/// simulation `calibration` is applied between the "all" count and the
/// preselection, so the "all" count sees uncalibrated kinematics.
///
/// Fails with [`Error::Selection`] when a stage grows its input collection
/// or its match count.
pub fn run_cascade(
    services: &dyn SelectionServices,
    event: &NanoEvent,
    ei: &EventInfo,
    is_signal: bool,
    calibration: Option<&mut CalibrationPipeline>,
) -> Result<CascadeOutcome> {
    let count = |jets: &[Jet]| if is_signal { services.n_gjmatched_in_jetcoll(ei, jets) } else { 0 };

    let raw = services.get_all_jets(event);
    let nfound_all = count(&raw);

    let all = match calibration {
        Some(pipeline) => pipeline.apply(event, &raw),
        None => raw,
    };

    let presel = services.preselect_jets(event, &all);
    let nfound_presel = count(&presel);

    let sixb = services.select_sixb_jets(event, &presel);
    let nfound_sixb = count(&sixb);

    let outcome = CascadeOutcome { all, presel, sixb, nfound_all, nfound_presel, nfound_sixb };
    if !outcome.is_monotonic() {
        let sizes = [outcome.all.len(), outcome.presel.len(), outcome.sixb.len()];
        let counts = [outcome.nfound_all, outcome.nfound_presel, outcome.nfound_sixb];
        tracing::error!(run = event.run, event = event.event, ?sizes, ?counts, "selection cascade expanded a collection");
        return Err(Error::Selection(format!(
            "event {}: stage sizes {sizes:?} / match counts {counts:?} are not non-increasing",
            event.event
        )));
    }
    Ok(outcome)
}
