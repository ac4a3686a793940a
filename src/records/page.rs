//! Paging and sorting controls read from the reserved query keys.

use crate::error::{QueryError, Result};
use crate::filter::RESERVED_KEYS;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Default page size when the caller gives none.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort key for a page request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Which slice of the matching records to return.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page: usize,
    /// Records per page (at least 1).
    pub size: usize,
    pub sort: Option<Sort>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: None,
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            sort: None,
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Read `page`, `size`, `sortBy` and `sortDir` from query parameters.
    ///
    /// Keys match case-insensitively; every other key is ignored.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let [page_key, size_key, sort_by_key, sort_dir_key] = RESERVED_KEYS;
        let lookup = |key: &str| {
            params
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_null())
                .map(|(_, v)| v)
        };

        let mut request = PageRequest::default();

        if let Some(value) = lookup(page_key) {
            request.page = parse_count(page_key, value)?;
        }

        if let Some(value) = lookup(size_key) {
            request.size = parse_count(size_key, value)?;
            if request.size == 0 {
                return Err(QueryError::InvalidPage("size must be at least 1".to_string()));
            }
        }

        let direction = match lookup(sort_dir_key) {
            Some(value) => parse_direction(value)?,
            None => SortDirection::Asc,
        };

        if let Some(value) = lookup(sort_by_key) {
            let field = value
                .as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| QueryError::InvalidPage("sortBy must be a field name".to_string()))?;
            request.sort = Some(Sort {
                field: field.to_string(),
                direction,
            });
        }

        Ok(request)
    }

    /// Index of the first record on this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

fn parse_count(key: &str, value: &Value) -> Result<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        QueryError::InvalidPage(format!("{} must be a non-negative integer, got {}", key, value))
    })
}

fn parse_direction(value: &Value) -> Result<SortDirection> {
    match value.as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("asc") => Ok(SortDirection::Asc),
        Some("desc") => Ok(SortDirection::Desc),
        _ => Err(QueryError::InvalidPage(format!(
            "sortDir must be asc or desc, got {}",
            value
        ))),
    }
}

/// Ordering used for sorting stored values: null < bool < number < text < other.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// One page of results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: usize) -> Self {
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
            total_pages: total_elements.div_ceil(request.size.max(1)),
        }
    }

    pub fn is_last(&self) -> bool {
        self.page + 1 >= self.total_pages
    }

    /// Convert the content, keeping the paging metadata.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }
}
