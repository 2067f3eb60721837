//! Jet energy-scale uncertainty sources.
//!
//! Reads the text format used for JEC uncertainty-source files:
//!
//! ```text
//! [AbsoluteStat]
//! {1 JetEta 1 JetPt "" Correction JECSource}
//! -5.4 -5.0 6 9.0 0.0045 0.0045 11.0 0.0042 0.0042
//! ...
//! [FlavorQCD]
//! ...
//! ```
//!
//! Each row is `eta_min eta_max n` followed by `n / 3` triplets
//! `(pt, unc_up, unc_down)`.

use std::path::Path;

use sb_core::{Direction, Error, Jet, Result};

use crate::calibration::EnergyScaleShift;
use crate::systematics::Category;

#[derive(Debug, Clone, PartialEq)]
struct EtaBin {
    eta_min: f64,
    eta_max: f64,
    /// `(pt, up, down)` sorted by pt.
    points: Vec<(f64, f64, f64)>,
}

impl EtaBin {
    fn uncertainty(&self, pt: f64, direction: Direction) -> f64 {
        let pick = |p: &(f64, f64, f64)| match direction {
            Direction::Up => p.1,
            Direction::Down => p.2,
        };
        let first = &self.points[0];
        let last = &self.points[self.points.len() - 1];
        if pt <= first.0 {
            return pick(first);
        }
        if pt >= last.0 {
            return pick(last);
        }
        for w in self.points.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            if pt >= a.0 && pt < b.0 {
                let t = (pt - a.0) / (b.0 - a.0);
                return pick(a) + t * (pick(b) - pick(a));
            }
        }
        pick(last)
    }
}

/// Energy-scale shifter for one uncertainty source.
#[derive(Debug, Clone, PartialEq)]
pub struct JecUncertaintySource {
    source: String,
    bins: Vec<EtaBin>,
}

impl JecUncertaintySource {
    /// Load `source` from the uncertainty-source file at `path`.
    pub fn from_file(path: &Path, source: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config("parameters.jec_file", path.display().to_string(), format!("cannot read: {e}"))
        })?;
        Self::from_str_source(&text, source)
    }

    /// Parse `source` out of the file contents `text`.
    pub fn from_str_source(text: &str, source: &str) -> Result<Self> {
        let mut in_section = false;
        let mut found = false;
        let mut bins = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if in_section {
                    break;
                }
                in_section = name.trim() == source;
                found |= in_section;
                continue;
            }
            if !in_section || line.starts_with('{') {
                continue;
            }
            bins.push(parse_row(line, lineno + 1)?);
        }

        if !found {
            return Err(Error::config(
                Category::Jes.field(),
                source,
                "uncertainty source not found in the JEC file",
            ));
        }
        if bins.is_empty() {
            return Err(Error::Calibration(format!("JEC source '{source}' has no eta bins")));
        }
        bins.sort_by(|a, b| a.eta_min.total_cmp(&b.eta_min));
        Ok(Self { source: source.to_string(), bins })
    }

    fn bin_for(&self, eta: f64) -> &EtaBin {
        self.bins
            .iter()
            .find(|b| eta >= b.eta_min && eta < b.eta_max)
            .unwrap_or_else(|| {
                if eta < self.bins[0].eta_min { &self.bins[0] } else { &self.bins[self.bins.len() - 1] }
            })
    }

    /// Relative uncertainty for a jet at `(pt, eta)`.
    pub fn uncertainty(&self, pt: f64, eta: f64, direction: Direction) -> f64 {
        self.bin_for(eta).uncertainty(pt, direction)
    }
}

fn parse_row(line: &str, lineno: usize) -> Result<EtaBin> {
    let values: Vec<f64> = line
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Calibration(format!("JEC line {lineno}: {e}")))?;
    if values.len() < 3 {
        return Err(Error::Calibration(format!("JEC line {lineno}: too few columns")));
    }
    let n = values[2] as usize;
    let rest = &values[3..];
    if n == 0 || n % 3 != 0 || rest.len() != n {
        return Err(Error::Calibration(format!(
            "JEC line {lineno}: declared {n} values, found {}",
            rest.len()
        )));
    }
    let mut points: Vec<(f64, f64, f64)> = rest.chunks_exact(3).map(|c| (c[0], c[1], c[2])).collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(EtaBin { eta_min: values[0], eta_max: values[1], points })
}

impl EnergyScaleShift for JecUncertaintySource {
    fn source(&self) -> &str {
        &self.source
    }

    fn shift(&self, jets: &[Jet], direction: Direction) -> Vec<Jet> {
        jets.iter()
            .map(|jet| {
                let unc = self.uncertainty(jet.p4.pt, jet.p4.eta, direction);
                let factor = 1.0 + direction.sign() * unc;
                let mut out = jet.clone();
                out.p4 = jet.p4.scaled(factor);
                out.pt_regressed = out.p4.pt * out.b_reg_corr;
                out.calibration.jes = Some((self.source.clone(), direction));
                out
            })
            .collect()
    }
}
