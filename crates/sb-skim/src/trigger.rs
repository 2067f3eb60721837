//! Trigger OR configuration.
//!
//! Each directive has the form `<label>:<branch>`; the branch names, in
//! configuration order, are handed to the event source which evaluates their
//! logical OR per event.

use sb_core::{Error, Result};

/// Config key holding the directives.
pub const TRIGGER_FIELD: &str = "triggers.make_or_of";

/// One configured trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEntry {
    /// Human-readable label from the configuration.
    pub config_name: String,
    /// Branch name in the input record.
    pub branch_name: String,
}

/// Ordered list of triggers entering the OR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerDefinition {
    entries: Vec<TriggerEntry>,
}

impl TriggerDefinition {
    /// Resolve `directives`. With `apply == false` the result is empty and the
    /// OR decision is bypassed downstream.
    pub fn resolve<S: AsRef<str>>(directives: &[S], apply: bool) -> Result<Self> {
        if !apply {
            return Ok(Self::default());
        }

        let mut entries = Vec::with_capacity(directives.len());
        for directive in directives {
            let directive = directive.as_ref();
            if directive.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = directive.split(':').collect();
            if tokens.len() != 2 {
                return Err(Error::config(
                    TRIGGER_FIELD,
                    directive,
                    format!("expected '<label>:<branch>', got {} token(s)", tokens.len()),
                ));
            }
            entries.push(TriggerEntry {
                config_name: tokens[0].to_string(),
                branch_name: tokens[1].to_string(),
            });
        }
        Ok(Self { entries })
    }

    /// Configured entries in order.
    pub fn entries(&self) -> &[TriggerEntry] {
        &self.entries
    }

    /// Branch names in order (duplicates preserved).
    pub fn branch_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.branch_name.clone()).collect()
    }

    /// `true` when no trigger enters the OR.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_in_order_and_skips_empty() {
        let def = TriggerDefinition::resolve(
            &["SixJet:HLT_PFHT330PT30_QuadPFJet_75_60_45_40", "", "HT:HLT_PFHT1050", "HT2:HLT_PFHT1050"],
            true,
        )
        .unwrap();
        assert_eq!(
            def.branch_names(),
            vec!["HLT_PFHT330PT30_QuadPFJet_75_60_45_40", "HLT_PFHT1050", "HLT_PFHT1050"]
        );
        assert_eq!(def.entries()[0].config_name, "SixJet");
    }

    #[test]
    fn three_tokens_is_fatal() {
        let err = TriggerDefinition::resolve(&["HLT_x:2:3"], true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(TRIGGER_FIELD));
        assert!(msg.contains("HLT_x:2:3"));
        assert!(msg.contains("3 token"));
    }

    #[test]
    fn single_token_is_fatal() {
        assert!(TriggerDefinition::resolve(&["HLT_only"], true).is_err());
    }

    #[test]
    fn disabled_yields_empty_even_if_malformed() {
        let def = TriggerDefinition::resolve(&["HLT_x:2:3"], false).unwrap();
        assert!(def.is_empty());
        assert!(def.branch_names().is_empty());
    }
}
