//! Output schema, per-event record and the sink interface.
//!
//! The schema is declared through a [`SchemaBuilder`] and frozen before the
//! event loop starts; a frozen [`OutputSchema`] cannot gain branches. Every
//! event, the [`OutputRecord`] is cleared to the declared defaults, every
//! branch is assigned, and the record is committed to a [`RecordSink`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sb_core::{Error, Result};

/// Branch value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean flag.
    Bool,
    /// Variable-length vector of 64-bit floats.
    FloatVec,
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchKind::Int => "int",
            BranchKind::Float => "float",
            BranchKind::Bool => "bool",
            BranchKind::FloatVec => "vector<float>",
        };
        f.write_str(s)
    }
}

/// One branch value.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchValue {
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Vector value.
    FloatVec(Vec<f64>),
}

impl BranchValue {
    /// Type of this value.
    pub fn kind(&self) -> BranchKind {
        match self {
            BranchValue::Int(_) => BranchKind::Int,
            BranchValue::Float(_) => BranchKind::Float,
            BranchValue::Bool(_) => BranchKind::Bool,
            BranchValue::FloatVec(_) => BranchKind::FloatVec,
        }
    }
}

/// Declared branch.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchDecl {
    /// Branch name.
    pub name: String,
    /// Value the branch is reset to on `clear()`.
    pub default: BranchValue,
}

impl BranchDecl {
    /// Type of the branch.
    pub fn kind(&self) -> BranchKind {
        self.default.kind()
    }
}

/// Collects branch declarations before the loop.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    branches: Vec<BranchDecl>,
    index: HashMap<String, usize>,
}

impl SchemaBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with `default`. Names must be unique and non-empty.
    pub fn declare(&mut self, name: &str, default: BranchValue) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Schema("branch name must be non-empty".into()));
        }
        if self.index.contains_key(name) {
            return Err(Error::Schema(format!("branch '{name}' declared twice")));
        }
        self.index.insert(name.to_string(), self.branches.len());
        self.branches.push(BranchDecl { name: name.to_string(), default });
        Ok(())
    }

    /// Declare an integer branch.
    pub fn declare_int(&mut self, name: &str, default: i64) -> Result<()> {
        self.declare(name, BranchValue::Int(default))
    }

    /// Declare a float branch.
    pub fn declare_float(&mut self, name: &str, default: f64) -> Result<()> {
        self.declare(name, BranchValue::Float(default))
    }

    /// Declare a boolean branch.
    pub fn declare_bool(&mut self, name: &str, default: bool) -> Result<()> {
        self.declare(name, BranchValue::Bool(default))
    }

    /// Declare a vector branch (default: empty).
    pub fn declare_float_vec(&mut self, name: &str) -> Result<()> {
        self.declare(name, BranchValue::FloatVec(Vec::new()))
    }

    /// Freeze the declarations.
    pub fn freeze(self) -> Arc<OutputSchema> {
        Arc::new(OutputSchema { branches: self.branches, index: self.index })
    }
}

/// Frozen set of output branches, in declaration order.
#[derive(Debug, PartialEq)]
pub struct OutputSchema {
    branches: Vec<BranchDecl>,
    index: HashMap<String, usize>,
}

impl OutputSchema {
    /// Declared branches in order.
    pub fn branches(&self) -> &[BranchDecl] {
        &self.branches
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// `true` when nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Position of `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Branch names in order.
    pub fn names(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Mutable per-event values over a frozen schema.
#[derive(Debug, Clone)]
pub struct OutputRecord {
    schema: Arc<OutputSchema>,
    values: Vec<BranchValue>,
    assigned: Vec<bool>,
}

impl OutputRecord {
    /// New record holding the defaults, with no branch assigned.
    pub fn new(schema: Arc<OutputSchema>) -> Self {
        let values = schema.branches.iter().map(|b| b.default.clone()).collect();
        let assigned = vec![false; schema.len()];
        Self { schema, values, assigned }
    }

    /// Schema of this record.
    pub fn schema(&self) -> &Arc<OutputSchema> {
        &self.schema
    }

    /// Reset every branch to its default and mark it unassigned.
    pub fn clear(&mut self) {
        for (value, decl) in self.values.iter_mut().zip(&self.schema.branches) {
            match (value, &decl.default) {
                (BranchValue::FloatVec(v), BranchValue::FloatVec(d)) => {
                    v.clear();
                    v.extend_from_slice(d);
                }
                (value, default) => *value = default.clone(),
            }
        }
        self.assigned.fill(false);
    }

    /// Assign `name`. Unknown names and type mismatches are rejected.
    pub fn set(&mut self, name: &str, value: BranchValue) -> Result<()> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| Error::Schema(format!("write to undeclared branch '{name}'")))?;
        let expected = self.schema.branches[idx].kind();
        if value.kind() != expected {
            return Err(Error::Schema(format!(
                "branch '{name}' is {expected}, got {}",
                value.kind()
            )));
        }
        self.values[idx] = value;
        self.assigned[idx] = true;
        Ok(())
    }

    /// Assign an integer branch.
    pub fn set_int(&mut self, name: &str, v: i64) -> Result<()> {
        self.set(name, BranchValue::Int(v))
    }

    /// Assign a float branch.
    pub fn set_float(&mut self, name: &str, v: f64) -> Result<()> {
        self.set(name, BranchValue::Float(v))
    }

    /// Assign a boolean branch.
    pub fn set_bool(&mut self, name: &str, v: bool) -> Result<()> {
        self.set(name, BranchValue::Bool(v))
    }

    /// Assign a vector branch.
    pub fn set_float_vec(&mut self, name: &str, v: Vec<f64>) -> Result<()> {
        self.set(name, BranchValue::FloatVec(v))
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<&BranchValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Values in schema order.
    pub fn values(&self) -> &[BranchValue] {
        &self.values
    }

    /// Names of branches not assigned since the last `clear()`.
    pub fn missing(&self) -> Vec<&str> {
        self.schema
            .branches
            .iter()
            .zip(&self.assigned)
            .filter(|(_, a)| !**a)
            .map(|(b, _)| b.name.as_str())
            .collect()
    }

    /// Fail unless every branch has been assigned.
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Schema(format!("unassigned branches at commit: {}", missing.join(", "))))
        }
    }
}

/// Destination of committed records.
pub trait RecordSink {
    /// Called once with the frozen schema before the first commit.
    fn begin(&mut self, schema: &Arc<OutputSchema>) -> Result<()>;

    /// Append one record. Incomplete records are rejected.
    fn commit(&mut self, record: &OutputRecord) -> Result<()>;

    /// Persist everything. Returns the number of records written.
    fn finish(&mut self) -> Result<usize>;
}

/// In-memory sink keeping every committed row.
#[derive(Debug, Default)]
pub struct MemorySink {
    schema: Option<Arc<OutputSchema>>,
    rows: Vec<Vec<BranchValue>>,
    finished: bool,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows, values in schema order.
    pub fn rows(&self) -> &[Vec<BranchValue>] {
        &self.rows
    }

    /// Whether `finish()` ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Column `name` across all rows.
    pub fn column(&self, name: &str) -> Option<Vec<BranchValue>> {
        let idx = self.schema.as_ref()?.index_of(name)?;
        Some(self.rows.iter().map(|r| r[idx].clone()).collect())
    }

    /// Integer column `name` across all rows.
    pub fn int_column(&self, name: &str) -> Option<Vec<i64>> {
        self.column(name)?
            .into_iter()
            .map(|v| match v {
                BranchValue::Int(i) => Some(i),
                _ => None,
            })
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn begin(&mut self, schema: &Arc<OutputSchema>) -> Result<()> {
        if self.schema.is_some() {
            return Err(Error::Output("sink already started".into()));
        }
        self.schema = Some(Arc::clone(schema));
        Ok(())
    }

    fn commit(&mut self, record: &OutputRecord) -> Result<()> {
        let schema = self.schema.as_ref().ok_or_else(|| Error::Output("commit before begin".into()))?;
        if !Arc::ptr_eq(schema, record.schema()) {
            return Err(Error::Output("record schema differs from sink schema".into()));
        }
        if self.finished {
            return Err(Error::Output("commit after finish".into()));
        }
        record.validate()?;
        self.rows.push(record.values().to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        self.finished = true;
        Ok(self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<OutputSchema> {
        let mut b = SchemaBuilder::new();
        b.declare_int("nfound_all", 0).unwrap();
        b.declare_float("rho", -1.0).unwrap();
        b.declare_bool("pass_trigger", false).unwrap();
        b.declare_float_vec("sixb_pt").unwrap();
        b.freeze()
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let mut b = SchemaBuilder::new();
        b.declare_int("n", 0).unwrap();
        assert!(b.declare_float("n", 0.0).is_err());
        assert!(b.declare_int("", 0).is_err());
    }

    #[test]
    fn unknown_and_mistyped_writes_rejected() {
        let mut r = OutputRecord::new(schema());
        let err = r.set_int("nfound_sixb", 3).unwrap_err();
        assert!(err.to_string().contains("undeclared branch 'nfound_sixb'"));
        let err = r.set_float("nfound_all", 3.0).unwrap_err();
        assert!(err.to_string().contains("is int"));
    }

    #[test]
    fn clear_resets_defaults_and_assignment() {
        let mut r = OutputRecord::new(schema());
        r.set_int("nfound_all", 4).unwrap();
        r.set_float("rho", 20.0).unwrap();
        r.set_bool("pass_trigger", true).unwrap();
        r.set_float_vec("sixb_pt", vec![1.0, 2.0]).unwrap();
        r.validate().unwrap();

        r.clear();
        assert_eq!(r.get("nfound_all"), Some(&BranchValue::Int(0)));
        assert_eq!(r.get("rho"), Some(&BranchValue::Float(-1.0)));
        assert_eq!(r.get("sixb_pt"), Some(&BranchValue::FloatVec(vec![])));
        assert_eq!(r.missing().len(), 4);
        assert!(r.validate().unwrap_err().to_string().contains("nfound_all"));
    }

    #[test]
    fn memory_sink_checks_lifecycle() {
        let s = schema();
        let mut sink = MemorySink::new();
        let mut r = OutputRecord::new(Arc::clone(&s));
        assert!(sink.commit(&r).is_err());

        sink.begin(&s).unwrap();
        r.set_int("nfound_all", 2).unwrap();
        assert!(sink.commit(&r).is_err());
        r.set_float("rho", 1.0).unwrap();
        r.set_bool("pass_trigger", true).unwrap();
        r.set_float_vec("sixb_pt", vec![]).unwrap();
        sink.commit(&r).unwrap();
        assert_eq!(sink.finish().unwrap(), 1);
        assert!(sink.commit(&r).is_err());
        assert_eq!(sink.int_column("nfound_all"), Some(vec![2]));

        let other = OutputRecord::new(schema());
        let mut sink2 = MemorySink::new();
        sink2.begin(&s).unwrap();
        assert!(sink2.commit(&other).is_err());
    }
}
