//! In-memory record table that executes compiled conditions.

use super::page::{compare_values, Page, PageRequest, SortDirection};
use crate::error::{QueryError, Result};
use crate::filter::CompiledCondition;
use crate::types::{EntitySchema, Record, RecordId, Timestamp};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Records of a single entity, in insertion order.
pub struct RecordTable {
    schema: EntitySchema,

    /// All records, in insertion order.
    records: RwLock<Vec<Record>>,

    /// Record ID to position in `records`.
    id_index: RwLock<HashMap<RecordId, usize>>,

    /// Counter for generating record IDs.
    next_id: AtomicU64,
}

impl RecordTable {
    /// Create an empty table.
    pub fn new(schema: EntitySchema) -> Self {
        Self {
            schema,
            records: RwLock::new(Vec::new()),
            id_index: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Insert a record. Every field must be declared by the schema.
    pub fn insert(&self, fields: Map<String, Value>) -> Result<Record> {
        if let Some(unknown) = fields.keys().find(|k| !self.schema.has_field(k)) {
            return Err(QueryError::InvalidRecord(format!(
                "unknown field `{}` on `{}`",
                unknown, self.schema.name
            )));
        }

        let record = Record {
            id: RecordId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            created: Timestamp::now(),
            fields,
        };

        let mut records = self.records.write();
        self.id_index.write().insert(record.id, records.len());
        records.push(record.clone());

        Ok(record)
    }

    /// Insert any serializable value that encodes as a JSON object.
    pub fn insert_json(&self, payload: &impl Serialize) -> Result<Record> {
        match serde_json::to_value(payload) {
            Ok(Value::Object(fields)) => self.insert(fields),
            Ok(other) => Err(QueryError::InvalidRecord(format!(
                "expected an object, got {}",
                other
            ))),
            Err(e) => Err(QueryError::InvalidRecord(e.to_string())),
        }
    }

    /// Get a record by ID.
    pub fn get(&self, id: RecordId) -> Option<Record> {
        let position = *self.id_index.read().get(&id)?;
        self.records.read().get(position).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records matching the condition, in insertion order.
    pub fn find_all(&self, condition: &CompiledCondition) -> Result<Vec<Record>> {
        self.check_entity(condition)?;
        let matched: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|r| condition.matches(r))
            .cloned()
            .collect();

        debug!(
            entity = %self.schema.name,
            matched = matched.len(),
            "Executed filter condition"
        );
        Ok(matched)
    }

    /// Number of records matching the condition.
    pub fn count(&self, condition: &CompiledCondition) -> Result<usize> {
        self.check_entity(condition)?;
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| condition.matches(r))
            .count())
    }

    /// One sorted page of the records matching the condition.
    pub fn find_page(&self, condition: &CompiledCondition, request: &PageRequest) -> Result<Page<Record>> {
        if let Some(sort) = &request.sort {
            if !self.schema.has_field(&sort.field) {
                return Err(QueryError::UnknownField {
                    entity: self.schema.name.clone(),
                    field: sort.field.clone(),
                });
            }
        }

        let mut matched = self.find_all(condition)?;

        if let Some(sort) = &request.sort {
            // Stable sort keeps insertion order between equal keys.
            matched.sort_by(|a, b| {
                let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let total = matched.len();
        let content = matched
            .into_iter()
            .skip(request.offset())
            .take(request.size)
            .collect();

        Ok(Page::new(content, request, total))
    }

    fn check_entity(&self, condition: &CompiledCondition) -> Result<()> {
        if condition.entity() != self.schema.name {
            return Err(QueryError::EntityMismatch {
                expected: self.schema.name.clone(),
                got: condition.entity().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{compile, FieldPredicate};
    use serde_json::json;

    fn table() -> RecordTable {
        let table = RecordTable::new(EntitySchema::new("user", ["name", "age"]));
        for (name, age) in [("Anna", 31), ("Bob", 25), ("Hannah", 40)] {
            table.insert_json(&json!({"name": name, "age": age})).unwrap();
        }
        table
    }

    #[test]
    fn test_insert_and_get() {
        let table = table();
        assert_eq!(table.len(), 3);

        let first = table.get(RecordId(1)).unwrap();
        assert_eq!(first.get("name"), &json!("Anna"));
        assert!(table.get(RecordId(99)).is_none());
    }

    #[test]
    fn test_insert_rejects_undeclared_field() {
        let table = table();
        let result = table.insert_json(&json!({"email": "a@b.c"}));
        assert!(matches!(result, Err(QueryError::InvalidRecord(_))));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_find_page_sorted_desc() {
        let table = table();
        let condition = compile(table.schema(), Vec::new()).unwrap();
        let request = PageRequest::new(0, 2).sorted_by("age", SortDirection::Desc);

        let page = table.find_page(&condition, &request).unwrap();
        let names: Vec<_> = page.content.iter().map(|r| r.get("name").clone()).collect();
        assert_eq!(names, vec![json!("Hannah"), json!("Anna")]);
        assert_eq!(page.total_elements, 3);
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn test_sort_by_unknown_field() {
        let table = table();
        let condition = compile(table.schema(), Vec::new()).unwrap();
        let request = PageRequest::default().sorted_by("salary", SortDirection::Asc);
        assert!(matches!(
            table.find_page(&condition, &request),
            Err(QueryError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_count_and_entity_check() {
        let table = table();
        let condition = compile(table.schema(), vec![FieldPredicate::contains_ci("name", "AN")]).unwrap();
        assert_eq!(table.count(&condition).unwrap(), 2);

        let other = compile(&EntitySchema::new("org", ["name"]), Vec::new()).unwrap();
        assert!(matches!(
            table.find_all(&other),
            Err(QueryError::EntityMismatch { .. })
        ));
    }
}
