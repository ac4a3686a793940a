//! Filter sources and field extraction.

use super::value::FilterValue;
use crate::error::{QueryError, Result};
use serde_json::{Map, Value};

/// Outcome of reading one declared member of a filter record.
pub type FieldRead = std::result::Result<Option<FilterValue>, String>;

/// One declared member of a filter record.
#[derive(Clone, Debug)]
pub struct DeclaredField {
    pub name: String,
    pub value: FieldRead,
}

impl DeclaredField {
    pub fn new(name: impl Into<String>, value: FieldRead) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A structured filter record that can enumerate its own members.
///
/// Implementations must list every declared member, set or not, in
/// declaration order. Use [`introspectable!`](crate::introspectable) for
/// plain structs.
pub trait Introspectable {
    fn declared_fields(&self) -> Vec<DeclaredField>;
}

/// Which path a filter came in through. Matching rules differ per path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourcePath {
    /// Loosely-typed key/value map (query parameters).
    Map,
    /// Structured filter record.
    Record,
}

/// Caller-supplied description of which records to match.
#[derive(Clone, Copy)]
pub enum FilterSource<'a> {
    Map(&'a Map<String, Value>),
    Record(&'a dyn Introspectable),
}

impl<'a> FilterSource<'a> {
    pub fn path(&self) -> SourcePath {
        match self {
            FilterSource::Map(_) => SourcePath::Map,
            FilterSource::Record(_) => SourcePath::Record,
        }
    }
}

impl<'a> From<&'a Map<String, Value>> for FilterSource<'a> {
    fn from(map: &'a Map<String, Value>) -> Self {
        FilterSource::Map(map)
    }
}

impl std::fmt::Debug for FilterSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterSource::Map(map) => f.debug_tuple("Map").field(map).finish(),
            FilterSource::Record(_) => f.write_str("Record(..)"),
        }
    }
}

/// Extract the set fields of a filter source, in map or declaration order.
///
/// Null and unset values are skipped. A record member that cannot be read
/// aborts the whole extraction.
pub fn extract_fields(source: FilterSource<'_>) -> Result<Vec<(String, FilterValue)>> {
    match source {
        FilterSource::Map(map) => Ok(map
            .iter()
            .filter_map(|(name, value)| {
                FilterValue::from_json(value).map(|value| (name.clone(), value))
            })
            .collect()),
        FilterSource::Record(record) => {
            let mut fields = Vec::new();
            for field in record.declared_fields() {
                match field.value {
                    Ok(Some(value)) => fields.push((field.name, value)),
                    Ok(None) => {}
                    Err(reason) => {
                        return Err(QueryError::Introspection {
                            field: field.name,
                            reason,
                        })
                    }
                }
            }
            Ok(fields)
        }
    }
}

/// Implement [`Introspectable`] for a struct by listing its filterable members.
///
/// Each member must implement [`ToFilterValue`](crate::filter::ToFilterValue);
/// `Option` members that are `None` are treated as unset. A member can be
/// exposed under a different name with `member as "name"`.
///
/// ```ignore
/// struct EmployeeFilter {
///     fullname: Option<String>,
///     salary_type: Option<String>,
///     salary: Option<f64>,
/// }
///
/// sift::introspectable!(EmployeeFilter {
///     fullname,
///     salary_type as "salaryType",
///     salary,
/// });
/// ```
#[macro_export]
macro_rules! introspectable {
    ($ty:ty { $($member:ident $(as $name:literal)?),* $(,)? }) => {
        impl $crate::filter::Introspectable for $ty {
            fn declared_fields(&self) -> ::std::vec::Vec<$crate::filter::DeclaredField> {
                ::std::vec![
                    $(
                        $crate::filter::DeclaredField::new(
                            $crate::__filter_member_name!($member $($name)?),
                            ::std::result::Result::Ok($crate::filter::ToFilterValue::to_filter_value(&self.$member)),
                        )
                    ),*
                ]
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __filter_member_name {
    ($member:ident) => {
        stringify!($member)
    };
    ($member:ident $name:literal) => {
        $name
    };
}
