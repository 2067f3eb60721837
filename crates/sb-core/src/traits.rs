//! Core traits for the six-b skim
//!
//! The event loop only talks to its input through [`EventSource`], so the
//! Parquet chain reader and the in-memory source used by tests are
//! interchangeable.

use crate::Result;
use crate::types::NanoEvent;

/// Sequential record stream over one or more input files.
pub trait EventSource {
    /// Register the trigger branch names whose logical OR is evaluated per event.
    ///
    /// An empty list disables the OR decision: [`EventSource::trigger_or`] then
    /// returns `true` for every event.
    fn set_triggers(&mut self, branch_names: &[String]);

    /// Move to the next record. Returns `Ok(false)` once the stream is exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// The current record. Only meaningful after `advance()` returned `true`.
    fn event(&self) -> &NanoEvent;

    /// Logical OR of the registered trigger bits for the current record.
    fn trigger_or(&self) -> bool;
}

/// Evaluate the OR of `branch_names` over the trigger bits of `event`.
///
/// Unknown branch names count as `false`; an empty list passes.
pub fn trigger_or_of(event: &NanoEvent, branch_names: &[String]) -> bool {
    if branch_names.is_empty() {
        return true;
    }
    branch_names.iter().any(|name| event.triggers.get(name).copied().unwrap_or(false))
}

/// In-memory [`EventSource`] over a vector of events.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: Vec<NanoEvent>,
    cursor: Option<usize>,
    triggers: Vec<String>,
    empty: NanoEvent,
}

impl MemorySource {
    /// Create a source yielding `events` in order.
    pub fn new(events: Vec<NanoEvent>) -> Self {
        Self { events, cursor: None, triggers: Vec::new(), empty: NanoEvent::default() }
    }

    /// Number of events served so far.
    pub fn n_served(&self) -> usize {
        self.cursor.map(|c| (c + 1).min(self.events.len())).unwrap_or(0)
    }
}

impl EventSource for MemorySource {
    fn set_triggers(&mut self, branch_names: &[String]) {
        self.triggers = branch_names.to_vec();
    }

    fn advance(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next);
        Ok(next < self.events.len())
    }

    fn event(&self) -> &NanoEvent {
        self.cursor.and_then(|c| self.events.get(c)).unwrap_or(&self.empty)
    }

    fn trigger_or(&self) -> bool {
        trigger_or_of(self.event(), &self.triggers)
    }
}
