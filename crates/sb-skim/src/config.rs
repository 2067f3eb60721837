//! Job configuration file.
//!
//! YAML by default, JSON when the file extension is `.json`. Sections the
//! skim does not use are ignored so one file can be shared with other tools.
//!
//! ```yaml
//! triggers:
//!   apply_trigger: true
//!   make_or_of:
//!     - "6j1t:HLT_PFHT330PT30_QuadPFJet_75_60_45_40_TriplePFBTagDeepCSV_4p5"
//! data:
//!   lumimask: golden.json
//! parameters:
//!   jec_file: Summer19UL18_V5_MC_UncertaintySources_AK4PFchs.txt
//!   jer_scale_factor_file: Summer19UL18_JRV2_MC_SF_AK4PFchs.txt
//!   jer_resolution_file: Summer19UL18_JRV2_MC_PtResolution_AK4PFchs.txt
//! preselection:
//!   pt_min: 20
//! sixb:
//!   n_max: 6
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use sb_core::Result;

use crate::selection::PreselectionCuts;

/// `triggers` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TriggerConfig {
    /// Whether the OR of `make_or_of` is evaluated.
    #[serde(default)]
    pub apply_trigger: bool,
    /// `label:branch` directives.
    #[serde(default)]
    pub make_or_of: Vec<String>,
}

/// `data` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataConfig {
    /// Golden JSON with the certified lumi sections. Required for data.
    #[serde(default)]
    pub lumimask: Option<PathBuf>,
}

/// `parameters` section: calibration inputs for simulation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParameterConfig {
    /// JEC uncertainty-source file, read only for a JES shift.
    #[serde(default)]
    pub jec_file: Option<PathBuf>,
    /// JER scale-factor table.
    #[serde(default)]
    pub jer_scale_factor_file: Option<PathBuf>,
    /// JER pt-resolution table.
    #[serde(default)]
    pub jer_resolution_file: Option<PathBuf>,
}

/// `sixb` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SixBConfig {
    /// Number of candidates kept by the six-b selection.
    #[serde(default = "default_n_max")]
    pub n_max: usize,
}

fn default_n_max() -> usize {
    6
}

impl Default for SixBConfig {
    fn default() -> Self {
        Self { n_max: default_n_max() }
    }
}

/// Whole job configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobConfig {
    /// Trigger OR definition.
    #[serde(default)]
    pub triggers: TriggerConfig,
    /// Data-only settings.
    #[serde(default)]
    pub data: DataConfig,
    /// Calibration parameter files.
    #[serde(default)]
    pub parameters: ParameterConfig,
    /// Baseline jet cuts.
    #[serde(default)]
    pub preselection: PreselectionCuts,
    /// Six-b selection settings.
    #[serde(default)]
    pub sixb: SixBConfig,
}

impl JobConfig {
    /// Make relative file paths relative to `base` instead of the working directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut Option<PathBuf>| {
            if let Some(path) = p
                && path.is_relative()
            {
                *path = base.join(&*path);
            }
        };
        fix(&mut self.data.lumimask);
        fix(&mut self.parameters.jec_file);
        fix(&mut self.parameters.jer_scale_factor_file);
        fix(&mut self.parameters.jer_resolution_file);
    }
}

/// Read a job config; relative paths inside resolve against the file's directory.
pub fn read_job_config(path: &Path) -> Result<JobConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let mut cfg: JobConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    if let Some(dir) = path.parent() {
        cfg.resolve_paths(dir);
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_with_defaults() {
        let text = r#"
triggers:
  apply_trigger: true
  make_or_of: ["a:HLT_A", "b:HLT_B"]
preselection:
  pt_min: 25
unrelated:
  anything: 1
"#;
        let cfg: JobConfig = serde_yaml_ng::from_str(text).unwrap();
        assert!(cfg.triggers.apply_trigger);
        assert_eq!(cfg.triggers.make_or_of.len(), 2);
        assert_eq!(cfg.preselection.pt_min, 25.0);
        assert_eq!(cfg.preselection.eta_max, 2.5);
        assert_eq!(cfg.sixb.n_max, 6);
        assert!(cfg.data.lumimask.is_none());
    }

    #[test]
    fn unknown_preselection_key_rejected() {
        let text = "preselection:\n  pt_minimum: 25\n";
        assert!(serde_yaml_ng::from_str::<JobConfig>(text).is_err());
    }

    #[test]
    fn relative_paths_follow_config_dir() {
        let mut cfg = JobConfig::default();
        cfg.data.lumimask = Some(PathBuf::from("golden.json"));
        cfg.parameters.jec_file = Some(PathBuf::from("/abs/jec.txt"));
        cfg.resolve_paths(Path::new("/cfg"));
        assert_eq!(cfg.data.lumimask, Some(PathBuf::from("/cfg/golden.json")));
        assert_eq!(cfg.parameters.jec_file, Some(PathBuf::from("/abs/jec.txt")));
    }

    #[test]
    fn json_by_extension() {
        let dir = std::env::temp_dir().join(format!("sb_skim_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("job.json");
        std::fs::write(&path, r#"{"sixb": {"n_max": 4}, "data": {"lumimask": "mask.json"}}"#).unwrap();
        let cfg = read_job_config(&path).unwrap();
        assert_eq!(cfg.sixb.n_max, 4);
        assert_eq!(cfg.data.lumimask, Some(dir.join("mask.json")));
        std::fs::remove_dir_all(&dir).ok();
    }
}
