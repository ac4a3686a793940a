//! Folding field predicates into a single conjunctive condition.

use super::reserved::is_reserved;
use super::source::{extract_fields, FilterSource, SourcePath};
use super::strategy::{select_strategy, Strategy};
use super::value::{value_text, values_equal, FilterValue};
use crate::error::{QueryError, Result};
use crate::types::{EntitySchema, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Operand of a field comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparison {
    Equals {
        value: Value,
    },
    ContainsCi {
        /// Lower-cased search text.
        needle: String,
        /// Render non-text stored values as text before matching.
        coerce_field: bool,
    },
    InSet {
        members: Vec<Value>,
    },
}

impl Comparison {
    pub fn strategy(&self) -> Strategy {
        match self {
            Comparison::Equals { .. } => Strategy::Equals,
            Comparison::ContainsCi { .. } => Strategy::ContainsCi,
            Comparison::InSet { .. } => Strategy::InSet,
        }
    }
}

/// A single field-level test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    field: String,
    comparison: Comparison,
}

impl FieldPredicate {
    /// Exact match on a field.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            comparison: Comparison::Equals {
                value: value.into(),
            },
        }
    }

    /// Case-insensitive substring match on a text field.
    pub fn contains_ci(field: impl Into<String>, text: &str) -> Self {
        Self {
            field: field.into(),
            comparison: Comparison::ContainsCi {
                needle: text.to_lowercase(),
                coerce_field: false,
            },
        }
    }

    /// Membership test on a field.
    pub fn in_set<I, V>(field: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            comparison: Comparison::InSet {
                members: members.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Build the predicate for one extracted filter field.
    pub fn from_filter(field: impl Into<String>, value: FilterValue, path: SourcePath) -> Self {
        let comparison = match (select_strategy(&value, path), value) {
            (Strategy::InSet, FilterValue::Set(members)) => Comparison::InSet { members },
            (Strategy::Equals, FilterValue::Scalar(value)) => Comparison::Equals { value },
            (_, value) => Comparison::ContainsCi {
                needle: value.render_text().to_lowercase(),
                coerce_field: path == SourcePath::Map,
            },
        };

        Self {
            field: field.into(),
            comparison,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn strategy(&self) -> Strategy {
        self.comparison.strategy()
    }

    pub fn comparison(&self) -> &Comparison {
        &self.comparison
    }

    /// Evaluate against a record. A null stored value never matches.
    pub fn matches(&self, record: &Record) -> bool {
        let stored = record.get(&self.field);
        if stored.is_null() {
            return false;
        }

        match &self.comparison {
            Comparison::Equals { value } => values_equal(stored, value),
            Comparison::ContainsCi {
                needle,
                coerce_field,
            } => match stored {
                Value::String(text) => text.to_lowercase().contains(needle.as_str()),
                other if *coerce_field => value_text(other).to_lowercase().contains(needle.as_str()),
                _ => false,
            },
            Comparison::InSet { members } => members.iter().any(|m| values_equal(stored, m)),
        }
    }

    /// Reject operands the store cannot compare against.
    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| QueryError::InvalidFilter {
            field: self.field.clone(),
            reason: reason.to_string(),
        };

        match &self.comparison {
            Comparison::Equals { value } => match value {
                Value::Null => Err(invalid("null operand")),
                Value::Array(_) | Value::Object(_) => Err(invalid("operand is not a scalar")),
                _ => Ok(()),
            },
            Comparison::ContainsCi { .. } => Ok(()),
            Comparison::InSet { members } => {
                if members
                    .iter()
                    .any(|m| matches!(m, Value::Null | Value::Array(_) | Value::Object(_)))
                {
                    Err(invalid("set members must be non-null scalars"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Conjunction of field predicates for one entity.
///
/// An empty condition matches every record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompiledCondition {
    entity: String,
    predicates: Vec<FieldPredicate>,
}

impl CompiledCondition {
    /// The match-all condition for an entity.
    pub fn match_all(schema: &EntitySchema) -> Self {
        Self {
            entity: schema.name.clone(),
            predicates: Vec::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn predicates(&self) -> &[FieldPredicate] {
        &self.predicates
    }

    pub fn is_match_all(&self) -> bool {
        self.predicates.is_empty()
    }

    /// True when every predicate matches.
    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }

    /// AND this condition with another for the same entity.
    pub fn and(mut self, other: CompiledCondition) -> Result<Self> {
        if self.entity != other.entity {
            return Err(QueryError::EntityMismatch {
                expected: self.entity,
                got: other.entity,
            });
        }
        self.predicates.extend(other.predicates);
        Ok(self)
    }
}

/// Turn a filter source into predicates, dropping reserved keys on the map path.
pub fn plan_predicates(source: FilterSource<'_>) -> Result<Vec<FieldPredicate>> {
    let path = source.path();
    let predicates = extract_fields(source)?
        .into_iter()
        .filter(|(name, _)| path == SourcePath::Record || !is_reserved(name))
        .map(|(name, value)| FieldPredicate::from_filter(name, value, path))
        .collect();
    Ok(predicates)
}

/// AND the predicates together, checking every field against the schema first.
pub fn compile(schema: &EntitySchema, predicates: Vec<FieldPredicate>) -> Result<CompiledCondition> {
    for predicate in &predicates {
        if !schema.has_field(&predicate.field) {
            return Err(QueryError::UnknownField {
                entity: schema.name.clone(),
                field: predicate.field.clone(),
            });
        }
        predicate.validate()?;
    }

    debug!(
        entity = %schema.name,
        predicates = predicates.len(),
        "Compiled filter condition"
    );

    Ok(CompiledCondition {
        entity: schema.name.clone(),
        predicates,
    })
}

/// Extract, plan and compile a filter source in one step.
pub fn build_condition(schema: &EntitySchema, source: FilterSource<'_>) -> Result<CompiledCondition> {
    compile(schema, plan_predicates(source)?)
}
