//! Branches written for every accepted event.

use sb_core::{Error, EventInfo, Result};

use crate::output::{OutputRecord, SchemaBuilder};
use crate::selection::CascadeOutcome;

/// Truth-match counter branches, one per cascade stage.
pub const NFOUND_ALL: &str = "nfound_all";
/// See [`NFOUND_ALL`].
pub const NFOUND_PRESEL: &str = "nfound_presel";
/// See [`NFOUND_ALL`].
pub const NFOUND_SIXB: &str = "nfound_sixb";

/// Signal id written for six-b candidates without a truth match.
pub const NO_SIGNAL_ID: f64 = -1.0;

const INT_BRANCHES: [&str; 8] =
    ["Run", "LumiSec", "Event", "n_pv", "n_jet", "n_presel_jet", "n_sixb_jet", "n_genb"];
const FLOAT_BRANCHES: [&str; 2] = ["rho", "met_pt"];
const SIXB_VECTORS: [&str; 6] =
    ["sixb_pt", "sixb_eta", "sixb_phi", "sixb_btag", "sixb_ptRegressed", "sixb_signalId"];

/// Event-level scalars and six-b candidate vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardBranches {
    save_p4: bool,
}

impl StandardBranches {
    /// With `save_p4` the candidate mass vector is written too.
    pub fn new(save_p4: bool) -> Self {
        Self { save_p4 }
    }

    /// Declare the counters and the standard branches.
    pub fn declare(&self, schema: &mut SchemaBuilder) -> Result<()> {
        for name in [NFOUND_ALL, NFOUND_PRESEL, NFOUND_SIXB] {
            schema.declare_int(name, 0)?;
        }
        for name in INT_BRANCHES {
            schema.declare_int(name, -1)?;
        }
        for name in FLOAT_BRANCHES {
            schema.declare_float(name, -1.0)?;
        }
        schema.declare_bool("pass_trigger", false)?;
        for name in SIXB_VECTORS {
            schema.declare_float_vec(name)?;
        }
        if self.save_p4 {
            schema.declare_float_vec("sixb_m")?;
        }
        Ok(())
    }

    /// Fill every declared branch of `record` for one event.
    pub fn fill(
        &self,
        record: &mut OutputRecord,
        ei: &EventInfo,
        pass_trigger: bool,
        outcome: &CascadeOutcome,
    ) -> Result<()> {
        record.set_int(NFOUND_ALL, outcome.nfound_all as i64)?;
        record.set_int(NFOUND_PRESEL, outcome.nfound_presel as i64)?;
        record.set_int(NFOUND_SIXB, outcome.nfound_sixb as i64)?;

        record.set_int("Run", i64::from(ei.run))?;
        record.set_int("LumiSec", i64::from(ei.luminosity_block))?;
        let event = i64::try_from(ei.event)
            .map_err(|_| Error::Input(format!("event number {} does not fit the Event branch", ei.event)))?;
        record.set_int("Event", event)?;
        record.set_int("n_pv", i64::from(ei.n_pv))?;
        record.set_int("n_jet", outcome.all.len() as i64)?;
        record.set_int("n_presel_jet", outcome.presel.len() as i64)?;
        record.set_int("n_sixb_jet", outcome.sixb.len() as i64)?;
        record.set_int("n_genb", ei.gen_bs.len() as i64)?;
        record.set_float("rho", ei.rho)?;
        record.set_float("met_pt", ei.met_pt)?;
        record.set_bool("pass_trigger", pass_trigger)?;

        let sixb = &outcome.sixb;
        record.set_float_vec("sixb_pt", sixb.iter().map(|j| j.p4.pt).collect())?;
        record.set_float_vec("sixb_eta", sixb.iter().map(|j| j.p4.eta).collect())?;
        record.set_float_vec("sixb_phi", sixb.iter().map(|j| j.p4.phi).collect())?;
        record.set_float_vec("sixb_btag", sixb.iter().map(|j| j.btag).collect())?;
        record.set_float_vec("sixb_ptRegressed", sixb.iter().map(|j| j.pt_regressed).collect())?;
        record.set_float_vec(
            "sixb_signalId",
            sixb.iter()
                .map(|j| ei.signal_id_of(j.index).map_or(NO_SIGNAL_ID, |id| id as f64))
                .collect(),
        )?;
        if self.save_p4 {
            record.set_float_vec("sixb_m", sixb.iter().map(|j| j.p4.mass).collect())?;
        }
        Ok(())
    }
}
