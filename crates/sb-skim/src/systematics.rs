//! Systematic-variation directives for jet calibration.
//!
//! Directives are parsed once at job start into closed variants; the event
//! loop never looks at the strings again.
//!
//! | Category | Accepted directives                  |
//! |----------|--------------------------------------|
//! | JES      | `nominal`, `<source>:up`, `<source>:down` |
//! | JER      | `nominal`, `up`, `down`              |
//! | BJER     | `nominal`, `up`, `down`              |

use std::fmt;

use sb_core::{Direction, Error, Result, Variation};

/// Keyword selecting the unshifted variation.
pub const NOMINAL: &str = "nominal";

/// Systematic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Jet energy scale.
    Jes,
    /// Jet energy resolution.
    Jer,
    /// b-regression energy resolution.
    Bjer,
}

impl Category {
    /// Name of the job option carrying this directive.
    pub fn field(self) -> &'static str {
        match self {
            Category::Jes => "jes-shift-syst",
            Category::Jer => "jer-shift-syst",
            Category::Bjer => "bjer-shift-syst",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Category::Jes => "JES",
            Category::Jer => "JER",
            Category::Bjer => "BJER",
        }
    }
}

/// Resolved mode of one systematic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// No shift.
    Nominal,
    /// Shift `name` by one sigma in `direction`.
    Shifted {
        /// Uncertainty source (JES) or the category label (JER/BJER).
        name: String,
        /// Shift direction.
        direction: Direction,
    },
}

/// A validated systematic directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystematicSpec {
    /// Category the directive applies to.
    pub category: Category,
    /// Nominal or shifted.
    pub mode: Mode,
}

fn parse_direction(category: Category, value: &str, token: &str) -> Result<Direction> {
    match token {
        "up" => Ok(Direction::Up),
        "down" => Ok(Direction::Down),
        other => Err(Error::config(
            category.field(),
            value,
            format!("could not parse direction '{other}' (expected 'up' or 'down')"),
        )),
    }
}

impl SystematicSpec {
    /// Nominal variation for `category`.
    pub fn nominal(category: Category) -> Self {
        Self { category, mode: Mode::Nominal }
    }

    /// Parse a directive for `category`.
    pub fn parse(category: Category, value: &str) -> Result<Self> {
        if value == NOMINAL {
            return Ok(Self::nominal(category));
        }
        match category {
            Category::Jes => Self::parse_jes(value),
            Category::Jer | Category::Bjer => {
                let direction = parse_direction(category, value, value)?;
                Ok(Self {
                    category,
                    mode: Mode::Shifted { name: category.label().to_string(), direction },
                })
            }
        }
    }

    fn parse_jes(value: &str) -> Result<Self> {
        let tokens: Vec<&str> = value.split(':').collect();
        if tokens.len() != 2 {
            return Err(Error::config(
                Category::Jes.field(),
                value,
                format!("expected '<source>:<up|down>' or '{NOMINAL}', got {} token(s)", tokens.len()),
            ));
        }
        if tokens[0].is_empty() {
            return Err(Error::config(Category::Jes.field(), value, "empty uncertainty source name"));
        }
        let direction = parse_direction(Category::Jes, value, tokens[1])?;
        Ok(Self {
            category: Category::Jes,
            mode: Mode::Shifted { name: tokens[0].to_string(), direction },
        })
    }

    /// `(source, direction)` when shifted.
    pub fn shift(&self) -> Option<(&str, Direction)> {
        match &self.mode {
            Mode::Nominal => None,
            Mode::Shifted { name, direction } => Some((name.as_str(), *direction)),
        }
    }

    /// Smearing variation selected by this directive.
    pub fn variation(&self) -> Variation {
        match self.shift() {
            None => Variation::Nominal,
            Some((_, Direction::Up)) => Variation::Up,
            Some((_, Direction::Down)) => Variation::Down,
        }
    }
}

impl fmt::Display for SystematicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.mode, self.category) {
            (Mode::Nominal, _) => f.write_str(NOMINAL),
            (Mode::Shifted { name, direction }, Category::Jes) => write!(f, "{name}:{direction}"),
            (Mode::Shifted { direction, .. }, _) => write!(f, "{direction}"),
        }
    }
}

/// The three systematic specs of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Systematics {
    /// Energy-scale shift.
    pub jes: SystematicSpec,
    /// Jet resolution.
    pub jer: SystematicSpec,
    /// b-regression resolution.
    pub bjer: SystematicSpec,
}

impl Systematics {
    /// Parse all three directives. Fails on the first malformed one.
    pub fn resolve(jes: &str, jer: &str, bjer: &str) -> Result<Self> {
        Ok(Self {
            jes: SystematicSpec::parse(Category::Jes, jes)?,
            jer: SystematicSpec::parse(Category::Jer, jer)?,
            bjer: SystematicSpec::parse(Category::Bjer, bjer)?,
        })
    }

    /// All nominal.
    pub fn nominal() -> Self {
        Self {
            jes: SystematicSpec::nominal(Category::Jes),
            jer: SystematicSpec::nominal(Category::Jer),
            bjer: SystematicSpec::nominal(Category::Bjer),
        }
    }

    /// JES source and direction, if a JES shift is requested.
    pub fn jes_shift(&self) -> Option<(&str, Direction)> {
        self.jes.shift()
    }

    /// Variation for the standard resolution smearing.
    pub fn jer_variation(&self) -> Variation {
        self.jer.variation()
    }

    /// Variation for the b-regression resolution smearing.
    pub fn bjer_variation(&self) -> Variation {
        self.bjer.variation()
    }
}

impl fmt::Display for Systematics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jes={} jer={} bjer={}", self.jes, self.jer, self.bjer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jes_shifted_directives() {
        for (s, name, dir) in [
            ("Total:up", "Total", Direction::Up),
            ("Total:down", "Total", Direction::Down),
            ("FlavorQCD:up", "FlavorQCD", Direction::Up),
            ("AbsoluteStat:down", "AbsoluteStat", Direction::Down),
        ] {
            let spec = SystematicSpec::parse(Category::Jes, s).unwrap();
            assert_eq!(spec.shift(), Some((name, dir)), "directive {s}");
            assert_eq!(spec.to_string(), s);
        }
    }

    #[test]
    fn nominal_is_unshifted() {
        for cat in [Category::Jes, Category::Jer, Category::Bjer] {
            let spec = SystematicSpec::parse(cat, "nominal").unwrap();
            assert_eq!(spec.mode, Mode::Nominal);
            assert_eq!(spec.variation(), Variation::Nominal);
        }
    }

    #[test]
    fn jes_rejects_malformed() {
        for bad in ["", "up", "Total", "Total:", ":up", "Total:left", "Total:up:down", "NOMINAL"] {
            let err = SystematicSpec::parse(Category::Jes, bad).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("jes-shift-syst"), "{msg}");
            assert!(msg.contains(&format!("'{bad}'")), "{msg}");
        }
    }

    #[test]
    fn jer_accepts_only_keywords() {
        let up = SystematicSpec::parse(Category::Jer, "up").unwrap();
        assert_eq!(up.variation(), Variation::Up);
        let down = SystematicSpec::parse(Category::Bjer, "down").unwrap();
        assert_eq!(down.variation(), Variation::Down);

        for bad in ["Total:up", "Up", "sideways", ""] {
            let err = SystematicSpec::parse(Category::Bjer, bad).unwrap_err();
            assert!(err.to_string().contains("bjer-shift-syst"));
        }
    }

    #[test]
    fn resolve_keeps_variations_independent() {
        let s = Systematics::resolve("nominal", "nominal", "up").unwrap();
        assert!(s.jes_shift().is_none());
        assert_eq!(s.jer_variation(), Variation::Nominal);
        assert_eq!(s.bjer_variation(), Variation::Up);

        let err = Systematics::resolve("nominal", "bad", "up").unwrap_err();
        assert!(err.to_string().contains("jer-shift-syst"));
    }
}
