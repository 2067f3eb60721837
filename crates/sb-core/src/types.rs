//! Common data types for the six-b skim

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Four-momentum in collider coordinates (pt, eta, phi, mass).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct P4 {
    /// Transverse momentum [GeV].
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle in (-pi, pi].
    pub phi: f64,
    /// Invariant mass [GeV].
    pub mass: f64,
}

impl P4 {
    /// Create a new four-momentum.
    pub fn new(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        Self { pt, eta, phi, mass }
    }

    /// Azimuthal distance folded into [0, pi].
    pub fn delta_phi(&self, other: &P4) -> f64 {
        let dphi = (self.phi - other.phi).rem_euclid(2.0 * PI);
        if dphi > PI { 2.0 * PI - dphi } else { dphi }
    }

    /// Angular distance `sqrt(deta^2 + dphi^2)`.
    pub fn delta_r(&self, other: &P4) -> f64 {
        let deta = self.eta - other.eta;
        let dphi = self.delta_phi(other);
        (deta * deta + dphi * dphi).sqrt()
    }

    /// Copy with pt and mass scaled by `factor` (direction unchanged).
    pub fn scaled(&self, factor: f64) -> Self {
        Self { pt: self.pt * factor, mass: self.mass * factor, ..*self }
    }
}

/// Direction of a systematic shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// +1 sigma.
    Up,
    /// -1 sigma.
    Down,
}

impl Direction {
    /// `+1.0` for up, `-1.0` for down.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Resolution-smearing variation (JER / b-regression JER).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variation {
    /// Central scale factor.
    Nominal,
    /// Scale factor shifted up.
    Up,
    /// Scale factor shifted down.
    Down,
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variation::Nominal => f.write_str("nominal"),
            Variation::Up => f.write_str("up"),
            Variation::Down => f.write_str("down"),
        }
    }
}

/// Which calibration steps have touched a jet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    /// Energy-scale shift: uncertainty source and direction.
    pub jes: Option<(String, Direction)>,
    /// Resolution smearing variation of the standard pt.
    pub jer: Option<Variation>,
    /// Resolution smearing variation of the b-regressed pt.
    pub bjer: Option<Variation>,
}

/// One reconstructed jet as stored in the input record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecoJet {
    /// Kinematics.
    pub p4: P4,
    /// b-tagging discriminant.
    pub btag: f64,
    /// b-energy regression correction factor.
    pub b_reg_corr: f64,
    /// b-energy regression resolution.
    pub b_reg_res: f64,
    /// Jet identification bits.
    pub jet_id: i32,
    /// Pile-up identification bits.
    pub pu_id: i32,
    /// Index of the matched generator jet, if any.
    pub gen_jet_idx: Option<usize>,
    /// Hadron flavour from truth (0 for data).
    pub hadron_flavour: i32,
}

/// A jet flowing through the calibration and selection stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jet {
    /// Position in the event's reco-jet list. Stable across calibration.
    pub index: usize,
    /// Current kinematics.
    pub p4: P4,
    /// b-tagging discriminant.
    pub btag: f64,
    /// b-energy regression correction factor.
    pub b_reg_corr: f64,
    /// b-energy regression resolution.
    pub b_reg_res: f64,
    /// Regressed transverse momentum.
    pub pt_regressed: f64,
    /// Jet identification bits.
    pub jet_id: i32,
    /// Pile-up identification bits.
    pub pu_id: i32,
    /// Index of the matched generator jet, if any.
    pub gen_jet_idx: Option<usize>,
    /// Hadron flavour.
    pub hadron_flavour: i32,
    /// Calibration provenance.
    pub calibration: Calibration,
}

impl Jet {
    /// Build an uncalibrated jet from the `index`-th input jet.
    pub fn from_reco(index: usize, reco: &RecoJet) -> Self {
        Self {
            index,
            p4: reco.p4,
            btag: reco.btag,
            b_reg_corr: reco.b_reg_corr,
            b_reg_res: reco.b_reg_res,
            pt_regressed: reco.p4.pt * reco.b_reg_corr,
            jet_id: reco.jet_id,
            pu_id: reco.pu_id,
            gen_jet_idx: reco.gen_jet_idx,
            hadron_flavour: reco.hadron_flavour,
            calibration: Calibration::default(),
        }
    }
}

/// Generator-level jet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GenJet {
    /// Kinematics.
    pub p4: P4,
}

/// Generator-level particle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GenParticle {
    /// Kinematics.
    pub p4: P4,
    /// PDG particle id.
    pub pdg_id: i32,
    /// Index of the mother particle, if any.
    pub mother_idx: Option<usize>,
}

/// One raw event as yielded by an [`EventSource`](crate::EventSource).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NanoEvent {
    /// Run number.
    pub run: u32,
    /// Luminosity block.
    pub luminosity_block: u32,
    /// Event number.
    pub event: u64,
    /// Number of reconstructed primary vertices.
    pub n_pv: i32,
    /// Median energy density.
    pub rho: f64,
    /// Missing transverse momentum.
    pub met_pt: f64,
    /// Trigger decisions keyed by branch name.
    pub triggers: BTreeMap<String, bool>,
    /// Reconstructed jets.
    pub jets: Vec<RecoJet>,
    /// Generator jets (empty for data).
    pub gen_jets: Vec<GenJet>,
    /// Generator particles (empty for data).
    pub gen_particles: Vec<GenParticle>,
}

/// A generator b quark selected as a signal decay product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenB {
    /// Index into the event's generator particles.
    pub particle_idx: usize,
    /// Kinematics.
    pub p4: P4,
    /// Position of the parent Higgs (0..3) in the decay chain.
    pub signal_id: usize,
    /// Matched generator jet.
    pub gen_jet_idx: Option<usize>,
    /// Matched reconstructed jet.
    pub reco_jet_idx: Option<usize>,
}

/// Per-event auxiliary record. Created fresh every iteration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventInfo {
    /// Run number.
    pub run: u32,
    /// Luminosity block.
    pub luminosity_block: u32,
    /// Event number.
    pub event: u64,
    /// Number of primary vertices.
    pub n_pv: i32,
    /// Median energy density.
    pub rho: f64,
    /// Missing transverse momentum.
    pub met_pt: f64,
    /// Generator b quarks (signal samples only).
    pub gen_bs: Vec<GenB>,
}

impl EventInfo {
    /// Reco-jet indices matched (through gen jets) to a generator b quark.
    pub fn matched_reco_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.gen_bs.iter().filter_map(|b| b.reco_jet_idx)
    }

    /// Signal id of the gen b matched to reco jet `index`, if any.
    pub fn signal_id_of(&self, index: usize) -> Option<usize> {
        self.gen_bs.iter().find(|b| b.reco_jet_idx == Some(index)).map(|b| b.signal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn delta_r_wraps_phi() {
        let a = P4::new(30.0, 0.0, 3.0, 0.0);
        let b = P4::new(30.0, 0.0, -3.0, 0.0);
        assert_relative_eq!(a.delta_r(&b), 2.0 * PI - 6.0, epsilon = 1e-12);
    }

    #[test]
    fn delta_phi_handles_large_and_non_finite_phi() {
        let a = P4::new(30.0, 0.0, 0.5 + 1000.0 * PI, 0.0);
        let b = P4::new(30.0, 0.0, 0.0, 0.0);
        let dphi = a.delta_phi(&b);
        assert!((0.0..=PI).contains(&dphi));
        assert_relative_eq!(dphi, 0.5, epsilon = 1e-9);
        assert_relative_eq!(b.delta_phi(&a), 0.5, epsilon = 1e-9);

        let bad = P4::new(30.0, 0.0, f64::INFINITY, 0.0);
        assert!(bad.delta_phi(&b).is_nan());
        assert!(bad.delta_r(&b).is_nan());
    }

    #[test]
    fn jet_from_reco_sets_regressed_pt() {
        let reco = RecoJet { p4: P4::new(50.0, 1.0, 0.5, 8.0), b_reg_corr: 1.1, ..Default::default() };
        let jet = Jet::from_reco(3, &reco);
        assert_eq!(jet.index, 3);
        assert_relative_eq!(jet.pt_regressed, 55.0, epsilon = 1e-12);
        assert_eq!(jet.calibration, Calibration::default());
    }

    #[test]
    fn scaled_keeps_direction() {
        let p = P4::new(40.0, -1.2, 0.3, 5.0).scaled(1.5);
        assert_eq!((p.pt, p.eta, p.phi, p.mass), (60.0, -1.2, 0.3, 7.5));
    }
}
