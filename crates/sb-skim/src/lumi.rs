//! Luminosity validity mask ("golden JSON") and the per-event validity gate.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use sb_core::{Error, Result};

/// Config key of the mask resource.
pub const LUMIMASK_FIELD: &str = "data.lumimask";

/// Accepted lumi-block ranges per run. Ranges are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LumiMask {
    runs: BTreeMap<u32, Vec<(u32, u32)>>,
}

impl LumiMask {
    /// Build a mask from explicit ranges.
    pub fn from_ranges(runs: BTreeMap<u32, Vec<(u32, u32)>>) -> Self {
        let mut runs = runs;
        for ranges in runs.values_mut() {
            ranges.sort_unstable();
        }
        Self { runs }
    }

    /// Parse a JSON object `{"<run>": [[first, last], ...], ...}`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<[u32; 2]>> = serde_json::from_str(text)?;
        let mut runs = BTreeMap::new();
        for (key, ranges) in raw {
            let run: u32 = key
                .trim()
                .parse()
                .map_err(|_| Error::config(LUMIMASK_FIELD, &key, "run key is not a run number"))?;
            let mut out = Vec::with_capacity(ranges.len());
            for [first, last] in ranges {
                if first > last {
                    return Err(Error::config(
                        LUMIMASK_FIELD,
                        format!("{run}: [{first}, {last}]"),
                        "inverted lumi-block range",
                    ));
                }
                out.push((first, last));
            }
            runs.insert(run, out);
        }
        Ok(Self::from_ranges(runs))
    }

    /// Load a mask from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(LUMIMASK_FIELD, path.display().to_string(), format!("cannot read: {e}"))
        })?;
        Self::from_json_str(&text).map_err(|e| match e {
            e @ Error::Config { .. } => e,
            other => Error::config(
                LUMIMASK_FIELD,
                path.display().to_string(),
                format!("cannot parse: {other}"),
            ),
        })
    }

    /// Whether `(run, lumi)` falls into an accepted range.
    pub fn is_valid(&self, run: u32, lumi: u32) -> bool {
        self.runs
            .get(&run)
            .is_some_and(|ranges| ranges.iter().any(|&(lo, hi)| lo <= lumi && lumi <= hi))
    }

    /// Number of runs with at least one range.
    pub fn n_runs(&self) -> usize {
        self.runs.len()
    }

    /// `true` if no run is accepted.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Decides whether an event is processed at all.
#[derive(Debug, Clone)]
pub enum ValidityGate {
    /// Simulated sample: every event is valid, no mask is consulted.
    Simulation,
    /// Real data: consult the mask.
    Data(LumiMask),
}

impl ValidityGate {
    /// Gate for `is_data`, loading the mask from `mask_path` for data.
    pub fn for_sample(is_data: bool, mask_path: Option<&Path>) -> Result<Self> {
        if !is_data {
            return Ok(ValidityGate::Simulation);
        }
        let path = mask_path.ok_or_else(|| {
            Error::config(LUMIMASK_FIELD, "", "a lumi mask is required for data samples")
        })?;
        let mask = LumiMask::from_json_file(path)?;
        tracing::info!(path = %path.display(), n_runs = mask.n_runs(), "lumi mask loaded");
        Ok(ValidityGate::Data(mask))
    }

    /// Whether `(run, lumi)` passes.
    pub fn is_valid(&self, run: u32, lumi: u32) -> bool {
        match self {
            ValidityGate::Simulation => true,
            ValidityGate::Data(mask) => mask.is_valid(run, lumi),
        }
    }
}
