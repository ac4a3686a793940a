//! Per-field matching strategy selection.

use super::source::SourcePath;
use super::value::FilterValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a single field is compared against its filter operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Exact match against the stored value.
    Equals,
    /// Case-insensitive substring match.
    ContainsCi,
    /// Stored value must be one of the operand's elements.
    InSet,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Equals => write!(f, "EQUALS"),
            Strategy::ContainsCi => write!(f, "CONTAINS_CI"),
            Strategy::InSet => write!(f, "IN_SET"),
        }
    }
}

/// Pick a strategy from the filter value's variant and the path it came from.
///
/// The target field's declared type plays no part: on the map path every
/// non-collection value is matched as text, on the record path only text is.
pub fn select_strategy(value: &FilterValue, path: SourcePath) -> Strategy {
    match (value, path) {
        (FilterValue::Set(_), _) => Strategy::InSet,
        (_, SourcePath::Map) => Strategy::ContainsCi,
        (FilterValue::Text(_), SourcePath::Record) => Strategy::ContainsCi,
        (FilterValue::Scalar(_), SourcePath::Record) => Strategy::Equals,
    }
}
