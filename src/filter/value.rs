//! Tagged filter values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A set filter value. Nulls never become a `FilterValue`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    /// Textual value.
    Text(String),
    /// Collection value; matched by membership.
    Set(Vec<Value>),
    /// Any other value (numbers, booleans, objects).
    Scalar(Value),
}

impl FilterValue {
    /// Classify a loosely-typed JSON value. Returns `None` for null.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(FilterValue::Text(s.clone())),
            Value::Array(items) => Some(FilterValue::Set(items.clone())),
            other => Some(FilterValue::Scalar(other.clone())),
        }
    }

    /// Text form used by substring matching.
    pub fn render_text(&self) -> String {
        match self {
            FilterValue::Text(s) => s.clone(),
            FilterValue::Scalar(v) => value_text(v),
            FilterValue::Set(items) => Value::Array(items.clone()).to_string(),
        }
    }
}

/// Text form of a stored or filter JSON value. Strings render without quotes.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality used by `EQUALS` and `IN_SET`. Numbers compare numerically when
/// either side is a float, so a stored `1000` equals a filter `1000.0`.
pub(crate) fn values_equal(stored: &Value, operand: &Value) -> bool {
    match (stored, operand) {
        (Value::Number(a), Value::Number(b)) if a.is_f64() || b.is_f64() => {
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => stored == operand,
    }
}

/// Conversion of a filter record's field into a filter value.
///
/// `None` marks the field as unset; it is then left out of the query.
pub trait ToFilterValue {
    fn to_filter_value(&self) -> Option<FilterValue>;
}

impl<T: ToFilterValue> ToFilterValue for Option<T> {
    fn to_filter_value(&self) -> Option<FilterValue> {
        self.as_ref().and_then(ToFilterValue::to_filter_value)
    }
}

impl<T: ToFilterValue + ?Sized> ToFilterValue for &T {
    fn to_filter_value(&self) -> Option<FilterValue> {
        (**self).to_filter_value()
    }
}

impl ToFilterValue for String {
    fn to_filter_value(&self) -> Option<FilterValue> {
        Some(FilterValue::Text(self.clone()))
    }
}

impl ToFilterValue for str {
    fn to_filter_value(&self) -> Option<FilterValue> {
        Some(FilterValue::Text(self.to_string()))
    }
}

impl ToFilterValue for Value {
    fn to_filter_value(&self) -> Option<FilterValue> {
        FilterValue::from_json(self)
    }
}

impl<T> ToFilterValue for Vec<T>
where
    T: Clone + Into<Value>,
{
    fn to_filter_value(&self) -> Option<FilterValue> {
        Some(FilterValue::Set(self.iter().cloned().map(Into::into).collect()))
    }
}

macro_rules! scalar_filter_value {
    ($($ty:ty),*) => {
        $(
            impl ToFilterValue for $ty {
                fn to_filter_value(&self) -> Option<FilterValue> {
                    Some(FilterValue::Scalar(Value::from(*self)))
                }
            }
        )*
    };
}

scalar_filter_value!(bool, i32, i64, u32, u64, f32, f64);
