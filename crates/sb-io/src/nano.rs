//! Chained reader over NanoAOD-like Parquet files.
//!
//! # Input layout
//!
//! One row per event. Numeric columns may use any integer or float width;
//! they are cast to the internal type on read.
//!
//! | Column                                   | Kind          | Required |
//! |------------------------------------------|---------------|----------|
//! | `run`, `luminosityBlock`, `event`        | integer       | yes      |
//! | `PV_npvs`                                | integer       | no (0)   |
//! | `fixedGridRhoFastjetAll`, `MET_pt`       | float         | no (0)   |
//! | `HLT_*` (as registered via triggers)     | bool          | no (false) |
//! | `Jet_pt`, `Jet_eta`, `Jet_phi`, `Jet_mass` | list<float> | yes      |
//! | `Jet_btagDeepFlavB`, `Jet_jetId`, `Jet_puId` | list        | yes      |
//! | `Jet_bRegCorr`                           | list<float>   | no (1)   |
//! | `Jet_bRegRes`                            | list<float>   | no (0)   |
//! | `Jet_genJetIdx`                          | list<int>     | no (-1)  |
//! | `Jet_hadronFlavour`                      | list<int>     | no (0)   |
//! | `GenJet_{pt,eta,phi,mass}`               | list<float>   | no       |
//! | `GenPart_{pt,eta,phi,mass,pdgId,genPartIdxMother}` | list | no     |

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use sb_core::{
    Error, EventSource, GenJet, GenParticle, NanoEvent, P4, RecoJet, Result, trigger_or_of,
};

/// Rows decoded per Parquet batch.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Typed access to the columns of one batch.
struct BatchView<'a> {
    batch: &'a RecordBatch,
    file: &'a Path,
}

impl BatchView<'_> {
    fn cast(&self, name: &str, to: &DataType) -> Result<Option<ArrayRef>> {
        let Some(col) = self.batch.column_by_name(name) else {
            return Ok(None);
        };
        arrow::compute::cast(col, to).map(Some).map_err(|e| {
            Error::Input(format!("{}: column '{name}' cannot be read as {to}: {e}", self.file.display()))
        })
    }

    fn require<T>(&self, name: &str, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| Error::Input(format!("{}: missing required column '{name}'", self.file.display())))
    }

    fn f64s(&self, name: &str) -> Result<Option<Vec<f64>>> {
        Ok(self
            .cast(name, &DataType::Float64)?
            .map(|a| a.as_primitive::<Float64Type>().iter().map(|v| v.unwrap_or(0.0)).collect()))
    }

    fn i64s(&self, name: &str) -> Result<Option<Vec<i64>>> {
        Ok(self
            .cast(name, &DataType::Int64)?
            .map(|a| a.as_primitive::<Int64Type>().iter().map(|v| v.unwrap_or(0)).collect()))
    }

    fn bools(&self, name: &str) -> Result<Option<Vec<bool>>> {
        Ok(self
            .cast(name, &DataType::Boolean)?
            .map(|a| a.as_boolean().iter().map(|v| v.unwrap_or(false)).collect()))
    }

    fn f64_lists(&self, name: &str) -> Result<Option<Vec<Vec<f64>>>> {
        let to = DataType::List(Arc::new(Field::new("item", DataType::Float64, true)));
        let Some(arr) = self.cast(name, &to)? else {
            return Ok(None);
        };
        let list = arr.as_list::<i32>();
        let rows = (0..list.len())
            .map(|i| {
                if list.is_null(i) {
                    return Vec::new();
                }
                list.value(i).as_primitive::<Float64Type>().iter().map(|v| v.unwrap_or(0.0)).collect()
            })
            .collect();
        Ok(Some(rows))
    }

    fn i64_lists(&self, name: &str) -> Result<Option<Vec<Vec<i64>>>> {
        let to = DataType::List(Arc::new(Field::new("item", DataType::Int64, true)));
        let Some(arr) = self.cast(name, &to)? else {
            return Ok(None);
        };
        let list = arr.as_list::<i32>();
        let rows = (0..list.len())
            .map(|i| {
                if list.is_null(i) {
                    return Vec::new();
                }
                list.value(i).as_primitive::<Int64Type>().iter().map(|v| v.unwrap_or(0)).collect()
            })
            .collect();
        Ok(Some(rows))
    }
}

fn index_of(raw: i64) -> Option<usize> {
    usize::try_from(raw).ok()
}

/// Value `j` of row `r`, `default` when the column is absent.
fn at<T: Copy>(col: &Option<Vec<Vec<T>>>, r: usize, j: usize, default: T) -> T {
    col.as_ref().and_then(|c| c[r].get(j).copied()).unwrap_or(default)
}

/// Narrow an integer column value, rejecting values out of range for `T`.
fn narrow<T: TryFrom<i64>>(file: &Path, r: usize, name: &str, raw: i64) -> Result<T> {
    T::try_from(raw).map_err(|_| {
        Error::Input(format!("{}: row {r}: '{name}' value {raw} out of range", file.display()))
    })
}

fn scalar<T: Copy>(col: &Option<Vec<T>>, r: usize, default: T) -> T {
    col.as_ref().map_or(default, |c| c[r])
}

/// Decode every row of `batch` into events.
fn decode_batch(batch: &RecordBatch, file: &Path, triggers: &[String]) -> Result<Vec<NanoEvent>> {
    let v = BatchView { batch, file };

    let run = v.require("run", v.i64s("run")?)?;
    let lumi = v.require("luminosityBlock", v.i64s("luminosityBlock")?)?;
    let event = v.require("event", v.i64s("event")?)?;
    let n_pv = v.i64s("PV_npvs")?;
    let rho = v.f64s("fixedGridRhoFastjetAll")?;
    let met = v.f64s("MET_pt")?;

    let mut trigger_cols = Vec::with_capacity(triggers.len());
    for name in triggers {
        trigger_cols.push((name, v.bools(name)?));
    }

    let jet_pt = v.require("Jet_pt", v.f64_lists("Jet_pt")?)?;
    let jet_eta = v.require("Jet_eta", v.f64_lists("Jet_eta")?)?;
    let jet_phi = v.require("Jet_phi", v.f64_lists("Jet_phi")?)?;
    let jet_mass = v.require("Jet_mass", v.f64_lists("Jet_mass")?)?;
    let jet_btag = v.require("Jet_btagDeepFlavB", v.f64_lists("Jet_btagDeepFlavB")?)?;
    let jet_id = v.require("Jet_jetId", v.i64_lists("Jet_jetId")?)?;
    let pu_id = v.require("Jet_puId", v.i64_lists("Jet_puId")?)?;
    let b_reg_corr = v.f64_lists("Jet_bRegCorr")?;
    let b_reg_res = v.f64_lists("Jet_bRegRes")?;
    let gen_jet_idx = v.i64_lists("Jet_genJetIdx")?;
    let hadron_flavour = v.i64_lists("Jet_hadronFlavour")?;

    let gj_pt = v.f64_lists("GenJet_pt")?;
    let gj_eta = v.f64_lists("GenJet_eta")?;
    let gj_phi = v.f64_lists("GenJet_phi")?;
    let gj_mass = v.f64_lists("GenJet_mass")?;

    let gp_pt = v.f64_lists("GenPart_pt")?;
    let gp_eta = v.f64_lists("GenPart_eta")?;
    let gp_phi = v.f64_lists("GenPart_phi")?;
    let gp_mass = v.f64_lists("GenPart_mass")?;
    let gp_pdg = v.i64_lists("GenPart_pdgId")?;
    let gp_mother = v.i64_lists("GenPart_genPartIdxMother")?;

    let mut events = Vec::with_capacity(batch.num_rows());
    for r in 0..batch.num_rows() {
        let n_jet = jet_pt[r].len();
        let lengths = [
            ("Jet_eta", jet_eta[r].len()),
            ("Jet_phi", jet_phi[r].len()),
            ("Jet_mass", jet_mass[r].len()),
            ("Jet_btagDeepFlavB", jet_btag[r].len()),
            ("Jet_jetId", jet_id[r].len()),
            ("Jet_puId", pu_id[r].len()),
        ];
        for (name, len) in lengths {
            if len != n_jet {
                return Err(Error::Input(format!(
                    "{}: row {r}: '{name}' has {len} entries, 'Jet_pt' has {n_jet}",
                    file.display()
                )));
            }
        }

        let jets = (0..n_jet)
            .map(|j| -> Result<RecoJet> {
                Ok(RecoJet {
                    p4: P4::new(jet_pt[r][j], jet_eta[r][j], jet_phi[r][j], jet_mass[r][j]),
                    btag: jet_btag[r][j],
                    b_reg_corr: at(&b_reg_corr, r, j, 1.0),
                    b_reg_res: at(&b_reg_res, r, j, 0.0),
                    jet_id: narrow(file, r, "Jet_jetId", jet_id[r][j])?,
                    pu_id: narrow(file, r, "Jet_puId", pu_id[r][j])?,
                    gen_jet_idx: index_of(at(&gen_jet_idx, r, j, -1)),
                    hadron_flavour: narrow(file, r, "Jet_hadronFlavour", at(&hadron_flavour, r, j, 0))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let n_gen_jet = gj_pt.as_ref().map_or(0, |c| c[r].len());
        let gen_jets = (0..n_gen_jet)
            .map(|j| GenJet {
                p4: P4::new(at(&gj_pt, r, j, 0.0), at(&gj_eta, r, j, 0.0), at(&gj_phi, r, j, 0.0), at(&gj_mass, r, j, 0.0)),
            })
            .collect();

        let n_gen_part = gp_pt.as_ref().map_or(0, |c| c[r].len());
        let gen_particles = (0..n_gen_part)
            .map(|j| -> Result<GenParticle> {
                Ok(GenParticle {
                    p4: P4::new(at(&gp_pt, r, j, 0.0), at(&gp_eta, r, j, 0.0), at(&gp_phi, r, j, 0.0), at(&gp_mass, r, j, 0.0)),
                    pdg_id: narrow(file, r, "GenPart_pdgId", at(&gp_pdg, r, j, 0))?,
                    mother_idx: index_of(at(&gp_mother, r, j, -1)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let triggers = trigger_cols
            .iter()
            .map(|(name, col)| ((*name).clone(), scalar(col, r, false)))
            .collect();

        events.push(NanoEvent {
            run: narrow(file, r, "run", run[r])?,
            luminosity_block: narrow(file, r, "luminosityBlock", lumi[r])?,
            event: narrow(file, r, "event", event[r])?,
            n_pv: narrow(file, r, "PV_npvs", scalar(&n_pv, r, 0))?,
            rho: scalar(&rho, r, 0.0),
            met_pt: scalar(&met, r, 0.0),
            triggers,
            jets,
            gen_jets,
            gen_particles,
        });
    }
    Ok(events)
}

/// [`EventSource`] over a list of Parquet files read one after another.
pub struct ParquetChain {
    files: Vec<PathBuf>,
    next_file: usize,
    reader: Option<ParquetRecordBatchReader>,
    buffered: std::vec::IntoIter<NanoEvent>,
    current: NanoEvent,
    triggers: Vec<String>,
    batch_size: usize,
    n_read: u64,
}

impl ParquetChain {
    /// Chain `files`. Every file must exist; files are opened lazily.
    pub fn new(files: Vec<PathBuf>) -> Result<Self> {
        if files.is_empty() {
            return Err(Error::Input("no input files".into()));
        }
        if let Some(missing) = files.iter().find(|p| !p.is_file()) {
            return Err(Error::Input(format!("input file not found: {}", missing.display())));
        }
        Ok(Self {
            files,
            next_file: 0,
            reader: None,
            buffered: Vec::new().into_iter(),
            current: NanoEvent::default(),
            triggers: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            n_read: 0,
        })
    }

    /// Rows per decoded batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Number of chained files.
    pub fn n_files(&self) -> usize {
        self.files.len()
    }

    /// Events yielded so far.
    pub fn n_read(&self) -> u64 {
        self.n_read
    }

    fn current_file(&self) -> &Path {
        self.files.get(self.next_file.saturating_sub(1)).map_or(Path::new(""), |p| p.as_path())
    }

    fn open_next(&mut self) -> Result<bool> {
        let Some(path) = self.files.get(self.next_file) else {
            self.reader = None;
            return Ok(false);
        };
        self.next_file += 1;
        tracing::info!(file = %path.display(), index = self.next_file, n_files = self.files.len(), "opening input");

        let file = std::fs::File::open(path)
            .map_err(|e| Error::Input(format!("failed to open {}: {e}", path.display())))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::Input(format!("failed to read Parquet {}: {e}", path.display())))?;

        let schema = builder.schema().clone();
        let missing: BTreeSet<&str> =
            self.triggers.iter().map(String::as_str).filter(|t| schema.index_of(t).is_err()).collect();
        if !missing.is_empty() {
            tracing::warn!(file = %path.display(), ?missing, "trigger columns absent; treated as false");
        }

        let reader = builder
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|e| Error::Input(format!("failed to build Parquet reader for {}: {e}", path.display())))?;
        self.reader = Some(reader);
        Ok(true)
    }

    fn fill_buffer(&mut self) -> Result<bool> {
        loop {
            if self.reader.is_none() && !self.open_next()? {
                return Ok(false);
            }
            let next = match self.reader.as_mut() {
                Some(reader) => reader.next(),
                None => continue,
            };
            match next {
                Some(batch) => {
                    let batch = batch.map_err(|e| {
                        Error::Input(format!("failed to read batch from {}: {e}", self.current_file().display()))
                    })?;
                    let events = decode_batch(&batch, self.current_file(), &self.triggers)?;
                    tracing::debug!(rows = events.len(), "batch decoded");
                    self.buffered = events.into_iter();
                    return Ok(true);
                }
                None => self.reader = None,
            }
        }
    }
}

impl EventSource for ParquetChain {
    fn set_triggers(&mut self, branch_names: &[String]) {
        self.triggers = branch_names.to_vec();
    }

    fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(event) = self.buffered.next() {
                self.current = event;
                self.n_read += 1;
                return Ok(true);
            }
            if !self.fill_buffer()? {
                return Ok(false);
            }
        }
    }

    fn event(&self) -> &NanoEvent {
        &self.current
    }

    fn trigger_or(&self) -> bool {
        trigger_or_of(&self.current, &self.triggers)
    }
}
