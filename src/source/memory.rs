//! In-memory data source
//!
//! Serves fixture records with the same paginated contract as a remote API.
//! Cursors are stringified offsets.

use super::*;
use crate::query::filter::values_equal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Paginated data source over fixture records
#[derive(Debug, Default)]
pub struct MemorySource {
    records: HashMap<EntityKind, Vec<Value>>,
    failing_references: HashSet<String>,
    latency: Option<Duration>,
    calls: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the records of one entity kind
    pub fn with_records(mut self, entity: EntityKind, records: Vec<Value>) -> Self {
        self.records.insert(entity, records);
        self
    }

    /// Build from a fixture document `{"persons": [...], "companies": [...]}`
    pub fn from_fixture(fixture: &Value) -> Result<Self, SourceError> {
        let object = fixture
            .as_object()
            .ok_or_else(|| SourceError::Api("fixture must be a JSON object".to_string()))?;

        let mut source = Self::new();
        for (key, value) in object {
            let entity = EntityKind::parse(key)
                .ok_or_else(|| SourceError::Api(format!("unknown entity kind in fixture: {}", key)))?;
            let records = value
                .as_array()
                .ok_or_else(|| SourceError::Api(format!("fixture '{}' must be an array", key)))?;
            source.records.insert(entity, records.clone());
        }
        Ok(source)
    }

    /// Builder method: make relationship lookups for this id fail
    pub fn fail_reference(mut self, id: Value) -> Self {
        self.failing_references.insert(id.to_string());
        self
    }

    /// Builder method: delay every fetch
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `fetch` calls served so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `fetch` calls that were running at the same time
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn matches(record: &Value, filter: &ServerFilter) -> bool {
        filter.predicates.iter().all(|predicate| match predicate {
            ServerPredicate::FieldEquals { field, value } => record
                .get("fields")
                .and_then(|fields| fields.get(field))
                .map(|found| equals_or_contains(found, value))
                .unwrap_or(false),
            ServerPredicate::Reference { field, value } => record
                .get(field)
                .map(|found| equals_or_contains(found, value))
                .unwrap_or(false),
        })
    }

    fn select_fields(mut record: Value, selector: &FieldSelector) -> Value {
        let Some(fields) = record.get_mut("fields").and_then(Value::as_object_mut) else {
            return record;
        };
        match selector {
            FieldSelector::All => {}
            FieldSelector::Builtin => fields.clear(),
            FieldSelector::Custom(names) => fields.retain(|name, _| names.contains(name)),
        }
        record
    }
}

fn equals_or_contains(found: &Value, expected: &Value) -> bool {
    match found {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        other => values_equal(other, expected),
    }
}

/// Counts a running `fetch`; released on drop, including when the caller
/// abandons the call at a timeout
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicU64, max: &AtomicU64) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, request: FetchRequest) -> Result<Page, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(filter) = &request.filter {
            for predicate in &filter.predicates {
                if let ServerPredicate::Reference { value, .. } = predicate {
                    if self.failing_references.contains(&value.to_string()) {
                        return Err(SourceError::NotFound(format!(
                            "{} related to {}",
                            request.entity, value
                        )));
                    }
                }
            }
        }

        let offset = match request.cursor.as_deref() {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| SourceError::Api(format!("invalid cursor: {}", cursor)))?,
            None => 0,
        };

        let matching: Vec<&Value> = self
            .records
            .get(&request.entity)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| request.filter.as_ref().map_or(true, |f| Self::matches(r, f)))
                    .collect()
            })
            .unwrap_or_default();

        let page_size = request.page_size.max(1);
        let end = (offset + page_size).min(matching.len());
        let records = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| Self::select_fields((*r).clone(), &request.fields))
            .collect();
        let next_cursor = (end < matching.len()).then(|| end.to_string());

        Ok(Page {
            records,
            next_cursor,
        })
    }

    async fn estimate_count(&self, entity: EntityKind) -> Result<Option<u64>, SourceError> {
        Ok(Some(
            self.records.get(&entity).map(|r| r.len() as u64).unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn persons() -> Vec<Value> {
        (1..=5)
            .map(|i| json!({"id": i, "name": format!("p{}", i), "fields": {"Status": if i % 2 == 0 { "Active" } else { "Closed" }, "Owner": "ann"}}))
            .collect()
    }

    #[tokio::test]
    async fn test_pagination() {
        let source = MemorySource::new().with_records(EntityKind::Persons, persons());

        let first = source
            .fetch(FetchRequest::new(EntityKind::Persons, 2))
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = source
            .fetch(FetchRequest::new(EntityKind::Persons, 2).cursor(Some("4".to_string())))
            .await
            .unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(last.next_cursor.is_none());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_field_equals_filter() {
        let source = MemorySource::new().with_records(EntityKind::Persons, persons());
        let filter = ServerFilter::new(vec![ServerPredicate::FieldEquals {
            field: "Status".to_string(),
            value: json!("Active"),
        }]);

        let page = source
            .fetch(FetchRequest::new(EntityKind::Persons, 10).filter(Some(filter)))
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
    }

    #[tokio::test]
    async fn test_field_equals_normalizes_numbers() {
        let source = MemorySource::new().with_records(
            EntityKind::Opportunities,
            vec![
                json!({"id": 1, "fields": {"Amount": 100.0}}),
                json!({"id": 2, "fields": {"Amount": 250}}),
                json!({"id": 3, "fields": {"Amount": [100, 5]}}),
            ],
        );
        let filter = ServerFilter::new(vec![ServerPredicate::FieldEquals {
            field: "Amount".to_string(),
            value: json!(100),
        }]);

        let page = source
            .fetch(FetchRequest::new(EntityKind::Opportunities, 10).filter(Some(filter)))
            .await
            .unwrap();
        let ids: Vec<i64> = page.records.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_field_selector() {
        let source = MemorySource::new().with_records(EntityKind::Persons, persons());

        let page = source
            .fetch(
                FetchRequest::new(EntityKind::Persons, 1)
                    .fields(FieldSelector::Custom(vec!["Status".to_string()])),
            )
            .await
            .unwrap();
        assert_eq!(page.records[0]["fields"], json!({"Status": "Closed"}));
    }

    #[tokio::test]
    async fn test_failing_reference() {
        let source = MemorySource::new().fail_reference(json!(3));
        let filter = ServerFilter::new(vec![ServerPredicate::Reference {
            field: "personIds".to_string(),
            value: json!(3),
        }]);

        let result = source
            .fetch(FetchRequest::new(EntityKind::Companies, 10).filter(Some(filter)))
            .await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_from_fixture_rejects_unknown_kind() {
        let result = MemorySource::from_fixture(&json!({"widgets": []}));
        assert!(result.is_err());

        let source = MemorySource::from_fixture(&json!({"persons": [{"id": 1}]})).unwrap();
        assert_eq!(source.records[&EntityKind::Persons].len(), 1);
    }
}
