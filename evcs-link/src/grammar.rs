//! Line grammar of the charger controller
//!
//! The grammar is an ordered table of `(LineKind, Regex)` rows. A line is
//! classified by the first row whose pattern matches at the start of the line.
//!
//! | Kind | Line |
//! |------|------|
//! | `alive` | `LADER <digits> lebt` |
//! | `billing-start` | `Abrechnung auf` |
//! | `tag` | `Tag ID = <hex byte groups>` |
//! | `confirm` | `Verstanden` |
//! | `complete` | `total FERTIG` |

use std::fmt;

use regex::Regex;

use crate::types::{StationId, Tag};

/// Kind of a recognized controller line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Alive,
    BillingStart,
    Tag,
    Confirm,
    Complete,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineKind::Alive => "alive",
            LineKind::BillingStart => "billing-start",
            LineKind::Tag => "tag",
            LineKind::Confirm => "confirm",
            LineKind::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// A classified line with its captures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch {
    Alive { station: StationId },
    BillingStart,
    Tag(Tag),
    Confirm,
    Complete,
}

impl LineMatch {
    pub fn kind(&self) -> LineKind {
        match self {
            LineMatch::Alive { .. } => LineKind::Alive,
            LineMatch::BillingStart => LineKind::BillingStart,
            LineMatch::Tag(_) => LineKind::Tag,
            LineMatch::Confirm => LineKind::Confirm,
            LineMatch::Complete => LineKind::Complete,
        }
    }
}

/// Controller grammar in priority order. Patterns capturing data use group 1.
pub const CONTROLLER_RULES: &[(LineKind, &str)] = &[
    (LineKind::Alive, r"^LADER ([0-9]+) lebt"),
    (LineKind::BillingStart, r"^Abrechnung auf"),
    (LineKind::Tag, r"^Tag\s?ID\s?=\s?((?:[0-9A-F]{2}\s?)+)"),
    (LineKind::Confirm, r"^Verstanden"),
    (LineKind::Complete, r"^total FERTIG"),
];

/// Compiled, ordered line grammar
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<(LineKind, Regex)>,
}

impl Grammar {
    /// Compile the controller grammar
    pub fn controller() -> Result<Self, regex::Error> {
        Self::from_rules(CONTROLLER_RULES)
    }

    /// Compile a custom rule table, evaluated top to bottom
    pub fn from_rules(rules: &[(LineKind, &str)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(kind, pattern)| Ok((*kind, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Classify a line; `None` if no rule matches
    pub fn classify(&self, line: &str) -> Option<LineMatch> {
        self.rules.iter().find_map(|(kind, regex)| {
            let captures = regex.captures(line)?;
            let group = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

            Some(match kind {
                LineKind::Alive => LineMatch::Alive {
                    station: StationId::new(group),
                },
                LineKind::BillingStart => LineMatch::BillingStart,
                LineKind::Tag => LineMatch::Tag(Tag::normalize(group)),
                LineKind::Confirm => LineMatch::Confirm,
                LineKind::Complete => LineMatch::Complete,
            })
        })
    }
}
