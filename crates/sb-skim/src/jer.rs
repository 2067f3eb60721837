//! Jet energy-resolution smearing.
//!
//! Two parameter files are read once at job start:
//!
//! * scale factors, rows `eta_min eta_max 3 nominal down up`;
//! * pt resolution, rows `eta_min eta_max rho_min rho_max 6 pt_min pt_max p0 p1 p2 p3`,
//!   evaluated as `sqrt(p0*|p0|/pt^2 + p1^2 * pt^p3 + p2^2)`.
//!
//! Lines starting with `{` (format headers) or `#` are skipped.

use std::path::Path;

use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use sb_core::{Error, Jet, NanoEvent, Result, Variation};

use crate::calibration::ResolutionSmearing;

/// Jet cone radius of the standard AK4 collection.
const JET_RADIUS: f64 = 0.4;
/// Maximum gen/reco pt difference (in resolution units) for the scaling method.
const MAX_PT_PULL: f64 = 3.0;

fn read_rows(path: &Path, field: &str) -> Result<Vec<Vec<f64>>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::config(field, path.display().to_string(), format!("cannot read: {e}")))?;
    parse_rows(&text).map_err(|e| Error::config(field, path.display().to_string(), e.to_string()))
}

fn parse_rows(text: &str) -> Result<Vec<Vec<f64>>> {
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('{') {
            continue;
        }
        let row: Vec<f64> = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Calibration(format!("line {}: {e}", lineno + 1)))?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(Error::Calibration("no data rows".into()));
    }
    Ok(rows)
}

fn clamp_to(rows_min: f64, rows_max: f64, x: f64) -> f64 {
    x.clamp(rows_min, (rows_max - 1e-9).max(rows_min))
}

/// Rejects non-finite values and empty or inverted `[lo, hi)` bins.
fn check_row(kind: &str, i: usize, r: &[f64], bins: &[(&str, usize, usize)]) -> Result<()> {
    if let Some(v) = r.iter().find(|v| !v.is_finite()) {
        return Err(Error::Calibration(format!("{kind} row {}: non-finite value {v}", i + 1)));
    }
    for &(name, lo, hi) in bins {
        if r[lo] >= r[hi] {
            return Err(Error::Calibration(format!(
                "{kind} row {}: empty {name} bin [{}, {})",
                i + 1,
                r[lo],
                r[hi]
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScaleFactorRow {
    eta_min: f64,
    eta_max: f64,
    nominal: f64,
    down: f64,
    up: f64,
}

/// JER data/simulation scale factors binned in eta.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFactorTable {
    rows: Vec<ScaleFactorRow>,
}

impl ScaleFactorTable {
    fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                if r.len() != 6 || r[2] as usize != 3 {
                    return Err(Error::Calibration(format!(
                        "scale-factor row {}: expected 'eta_min eta_max 3 nominal down up'",
                        i + 1
                    )));
                }
                check_row("scale-factor", i, &r, &[("eta", 0, 1)])?;
                Ok(ScaleFactorRow { eta_min: r[0], eta_max: r[1], nominal: r[3], down: r[4], up: r[5] })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Parse the text contents of a scale-factor file.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_rows(parse_rows(text)?)
    }

    /// Load from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let field = "parameters.jer_scale_factor_file";
        Self::from_rows(read_rows(path, field)?)
            .map_err(|e| Error::config(field, path.display().to_string(), e.to_string()))
    }

    /// Scale factor at `eta` for `variation`.
    pub fn scale_factor(&self, eta: f64, variation: Variation) -> f64 {
        let lo = self.rows.iter().map(|r| r.eta_min).fold(f64::INFINITY, f64::min);
        let hi = self.rows.iter().map(|r| r.eta_max).fold(f64::NEG_INFINITY, f64::max);
        let eta = clamp_to(lo, hi, eta);
        let row = self
            .rows
            .iter()
            .find(|r| eta >= r.eta_min && eta < r.eta_max)
            .unwrap_or(&self.rows[0]);
        match variation {
            Variation::Nominal => row.nominal,
            Variation::Up => row.up,
            Variation::Down => row.down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolutionRow {
    eta_min: f64,
    eta_max: f64,
    rho_min: f64,
    rho_max: f64,
    pt_min: f64,
    pt_max: f64,
    par: [f64; 4],
}

impl ResolutionRow {
    fn eval(&self, pt: f64) -> f64 {
        let x = pt.clamp(self.pt_min, self.pt_max);
        let [p0, p1, p2, p3] = self.par;
        (p0 * p0.abs() / (x * x) + p1 * p1 * x.powf(p3) + p2 * p2).max(0.0).sqrt()
    }
}

/// Relative pt resolution binned in eta and rho.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionTable {
    rows: Vec<ResolutionRow>,
}

impl ResolutionTable {
    fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                if r.len() != 11 || r[4] as usize != 6 {
                    return Err(Error::Calibration(format!(
                        "resolution row {}: expected 'eta_min eta_max rho_min rho_max 6 pt_min pt_max p0 p1 p2 p3'",
                        i + 1
                    )));
                }
                check_row("resolution", i, &r, &[("eta", 0, 1), ("rho", 2, 3), ("pt", 5, 6)])?;
                Ok(ResolutionRow {
                    eta_min: r[0],
                    eta_max: r[1],
                    rho_min: r[2],
                    rho_max: r[3],
                    pt_min: r[5],
                    pt_max: r[6],
                    par: [r[7], r[8], r[9], r[10]],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Parse the text contents of a resolution file.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_rows(parse_rows(text)?)
    }

    /// Load from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let field = "parameters.jer_resolution_file";
        Self::from_rows(read_rows(path, field)?)
            .map_err(|e| Error::config(field, path.display().to_string(), e.to_string()))
    }

    /// Relative resolution `sigma(pt)/pt` for a jet.
    pub fn resolution(&self, pt: f64, eta: f64, rho: f64) -> f64 {
        let eta_lo = self.rows.iter().map(|r| r.eta_min).fold(f64::INFINITY, f64::min);
        let eta_hi = self.rows.iter().map(|r| r.eta_max).fold(f64::NEG_INFINITY, f64::max);
        let eta = clamp_to(eta_lo, eta_hi, eta);
        let in_eta = |r: &&ResolutionRow| eta >= r.eta_min && eta < r.eta_max;

        let row = self
            .rows
            .iter()
            .filter(in_eta)
            .find(|r| rho >= r.rho_min && rho < r.rho_max)
            .or_else(|| {
                // rho outside the table: nearest rho bin of this eta slice
                self.rows.iter().filter(in_eta).min_by(|a, b| {
                    let da = (a.rho_min - rho).abs().min((a.rho_max - rho).abs());
                    let db = (b.rho_min - rho).abs().min((b.rho_max - rho).abs());
                    da.total_cmp(&db)
                })
            })
            .unwrap_or(&self.rows[0]);
        row.eval(pt)
    }
}

/// Hybrid resolution smearing of jet pt and b-regressed pt.
#[derive(Debug, Clone, PartialEq)]
pub struct JerSmearer {
    scale_factors: ScaleFactorTable,
    resolution: ResolutionTable,
}

impl JerSmearer {
    /// Build from already parsed tables.
    pub fn new(scale_factors: ScaleFactorTable, resolution: ResolutionTable) -> Self {
        Self { scale_factors, resolution }
    }

    /// Load both parameter files.
    pub fn from_files(scale_factor_file: &Path, resolution_file: &Path) -> Result<Self> {
        Ok(Self::new(
            ScaleFactorTable::from_file(scale_factor_file)?,
            ResolutionTable::from_file(resolution_file)?,
        ))
    }

    fn stochastic(sigma: f64, sf: f64, rng: &mut StdRng) -> f64 {
        let z: f64 = StandardNormal.sample(rng);
        1.0 + z * sigma * (sf * sf - 1.0).max(0.0).sqrt()
    }

    /// Smearing factor for a pt measured as `pt` with relative resolution `sigma`.
    fn factor(
        pt: f64,
        gen_pt: Option<f64>,
        sigma: f64,
        sf: f64,
        rng: &mut StdRng,
    ) -> f64 {
        let factor = match gen_pt {
            Some(gpt) if pt > 0.0 && (pt - gpt).abs() < MAX_PT_PULL * sigma * pt => {
                1.0 + (sf - 1.0) * (pt - gpt) / pt
            }
            _ => Self::stochastic(sigma, sf, rng),
        };
        factor.max(0.0)
    }
}

impl ResolutionSmearing for JerSmearer {
    fn smear(
        &self,
        event: &NanoEvent,
        jets: &[Jet],
        jer: Variation,
        bjer: Variation,
        rng: &mut StdRng,
    ) -> Vec<Jet> {
        jets.iter()
            .map(|jet| {
                let pt = jet.p4.pt;
                let gen_pt = jet
                    .gen_jet_idx
                    .and_then(|i| event.gen_jets.get(i))
                    .filter(|g| g.p4.delta_r(&jet.p4) < JET_RADIUS / 2.0)
                    .map(|g| g.p4.pt);

                let sigma = self.resolution.resolution(pt, jet.p4.eta, event.rho);
                let sf = self.scale_factors.scale_factor(jet.p4.eta, jer);
                let factor = Self::factor(pt, gen_pt, sigma, sf, rng);

                let sf_b = self.scale_factors.scale_factor(jet.p4.eta, bjer);
                let pt_reg = pt * jet.b_reg_corr;
                let factor_b = Self::factor(pt_reg, gen_pt, jet.b_reg_res, sf_b, rng);

                let mut out = jet.clone();
                out.p4 = jet.p4.scaled(factor);
                out.pt_regressed = pt_reg * factor_b;
                out.calibration.jer = Some(jer);
                out.calibration.bjer = Some(bjer);
                out
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use sb_core::{GenJet, P4, RecoJet};

    const SF: &str = "\
{1 JetEta 0 None ScaleFactor}
-5.0 -1.0 3 1.10 1.05 1.15
-1.0 1.0 3 1.20 1.10 1.30
1.0 5.0 3 1.10 1.05 1.15
";

    const RES: &str = "\
{2 JetEta Rho 1 JetPt sqrt(p0*abs(p0)/(x*x)+p1*p1*pow(x,p3)+p2*p2) Resolution}
-5.0 5.0 0.0 20.0 6 10.0 1000.0 0.0 0.0 0.10 0.0
-5.0 5.0 20.0 80.0 6 10.0 1000.0 0.0 0.0 0.20 0.0
";

    fn smearer() -> JerSmearer {
        JerSmearer::new(ScaleFactorTable::parse(SF).unwrap(), ResolutionTable::parse(RES).unwrap())
    }

    #[test]
    fn scale_factor_lookup() {
        let t = ScaleFactorTable::parse(SF).unwrap();
        assert_eq!(t.scale_factor(0.0, Variation::Nominal), 1.20);
        assert_eq!(t.scale_factor(0.0, Variation::Up), 1.30);
        assert_eq!(t.scale_factor(-2.0, Variation::Down), 1.05);
        assert_eq!(t.scale_factor(9.0, Variation::Nominal), 1.10);
    }

    #[test]
    fn resolution_lookup_by_rho() {
        let t = ResolutionTable::parse(RES).unwrap();
        assert_relative_eq!(t.resolution(50.0, 0.0, 10.0), 0.10, epsilon = 1e-12);
        assert_relative_eq!(t.resolution(50.0, 0.0, 30.0), 0.20, epsilon = 1e-12);
        assert_relative_eq!(t.resolution(50.0, 0.0, 500.0), 0.20, epsilon = 1e-12);
    }

    #[test]
    fn matched_jets_are_scaled_deterministically() {
        let mut event = NanoEvent { rho: 10.0, ..Default::default() };
        event.gen_jets.push(GenJet { p4: P4::new(45.0, 0.0, 0.0, 5.0) });
        let reco = RecoJet {
            p4: P4::new(50.0, 0.0, 0.0, 5.0),
            b_reg_corr: 1.0,
            b_reg_res: 0.2,
            gen_jet_idx: Some(0),
            ..Default::default()
        };
        let jets = vec![Jet::from_reco(0, &reco)];
        let mut rng = StdRng::seed_from_u64(1);
        let out = smearer().smear(&event, &jets, Variation::Nominal, Variation::Up, &mut rng);
        // 1 + (1.2 - 1) * 5 / 50
        assert_relative_eq!(out[0].p4.pt, 51.0, epsilon = 1e-9);
        // 1 + (1.3 - 1) * 5 / 50
        assert_relative_eq!(out[0].pt_regressed, 51.5, epsilon = 1e-9);
        assert_eq!(out[0].calibration.jer, Some(Variation::Nominal));
        assert_eq!(out[0].calibration.bjer, Some(Variation::Up));
    }

    #[test]
    fn stochastic_smearing_is_seed_reproducible() {
        let event = NanoEvent { rho: 10.0, ..Default::default() };
        let jets: Vec<Jet> = (0..20)
            .map(|i| {
                Jet::from_reco(
                    i,
                    &RecoJet {
                        p4: P4::new(30.0 + i as f64, 0.1, 0.0, 4.0),
                        b_reg_corr: 1.05,
                        b_reg_res: 0.15,
                        ..Default::default()
                    },
                )
            })
            .collect();
        let s = smearer();
        let a = s.smear(&event, &jets, Variation::Up, Variation::Nominal, &mut StdRng::seed_from_u64(12345));
        let b = s.smear(&event, &jets, Variation::Up, Variation::Nominal, &mut StdRng::seed_from_u64(12345));
        let c = s.smear(&event, &jets, Variation::Up, Variation::Nominal, &mut StdRng::seed_from_u64(54321));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|j| j.p4.pt >= 0.0 && j.pt_regressed >= 0.0));
    }

    #[test]
    fn bad_rows_are_rejected() {
        assert!(ScaleFactorTable::parse("-5 5 2 1.0 1.0").is_err());
        assert!(ResolutionTable::parse("-5 5 0 80 6 10 1000 0 0").is_err());
        assert!(ScaleFactorTable::parse("# only a comment\n").is_err());
    }

    #[test]
    fn inverted_or_non_finite_bins_are_rejected() {
        let err = ResolutionTable::parse("-5.0 5.0 0.0 80.0 6 3000.0 10.0 0.0 0.0 0.1 0.0").unwrap_err();
        assert!(err.to_string().contains("pt bin"), "{err}");
        let err = ResolutionTable::parse("-5.0 5.0 80.0 0.0 6 10.0 3000.0 0.0 0.0 0.1 0.0").unwrap_err();
        assert!(err.to_string().contains("rho bin"), "{err}");
        let err = ResolutionTable::parse("1.0 1.0 0.0 80.0 6 10.0 3000.0 0.0 0.0 0.1 0.0").unwrap_err();
        assert!(err.to_string().contains("eta bin"), "{err}");
        let err = ResolutionTable::parse("-5.0 5.0 0.0 80.0 6 nan 3000.0 0.0 0.0 0.1 0.0").unwrap_err();
        assert!(err.to_string().contains("non-finite"), "{err}");

        assert!(ScaleFactorTable::parse("2.0 -2.0 3 1.1 1.0 1.2").is_err());
        assert!(ScaleFactorTable::parse("0.0 0.0 3 1.1 1.0 1.2").is_err());
        assert!(ScaleFactorTable::parse("-5.0 5.0 3 inf 1.0 1.2").is_err());
    }

    #[test]
    fn bad_table_file_names_the_field() {
        let dir = std::env::temp_dir().join(format!("sb_skim_jer_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("res.txt");
        std::fs::write(&path, "-5.0 5.0 0.0 80.0 6 3000.0 10.0 0.0 0.0 0.1 0.0\n").unwrap();
        let err = ResolutionTable::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config { ref field, .. } if field == "parameters.jer_resolution_file"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
