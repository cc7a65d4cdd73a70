//! Entity kinds and relationships
//!
//! The set of queryable entity kinds is fixed. Relationships describe how an
//! include (or a quantifier over a related collection) is fetched: one call
//! per parent against the target kind, narrowed by a reference field.

use crate::query::ast::{Operator, PathSegment, Query, WhereClause};
use serde_json::Value;
use crate::source::FieldSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Queryable record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Companies,
    Interactions,
    ListEntries,
    Notes,
    Opportunities,
    Persons,
}

impl EntityKind {
    /// All kinds, in alphabetical order
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Companies,
            EntityKind::Interactions,
            EntityKind::ListEntries,
            EntityKind::Notes,
            EntityKind::Opportunities,
            EntityKind::Persons,
        ]
    }

    /// Parse from the wire name
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Interactions => "interactions",
            Self::ListEntries => "listEntries",
            Self::Notes => "notes",
            Self::Opportunities => "opportunities",
            Self::Persons => "persons",
        }
    }

    /// Comma-separated list used in error messages
    pub fn supported_list() -> String {
        Self::all()
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Relationships that can be included from this kind
    pub fn relationships(&self) -> &'static [Relationship] {
        match self {
            Self::Persons => PERSON_RELATIONSHIPS,
            Self::Companies => COMPANY_RELATIONSHIPS,
            Self::Opportunities => OPPORTUNITY_RELATIONSHIPS,
            Self::ListEntries | Self::Interactions | Self::Notes => &[],
        }
    }

    /// Look up a relationship by name
    pub fn relationship(&self, name: &str) -> Option<&'static Relationship> {
        self.relationships().iter().find(|r| r.name == name)
    }

    /// Field naming the parent container, for kinds that can only be listed
    /// inside one
    pub fn parent_filter(&self) -> Option<&'static str> {
        match self {
            Self::ListEntries => Some("listId"),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A related collection reachable from an entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    /// Name used in `include` and as the key on the parent record
    pub name: &'static str,
    /// Kind of the related records
    pub target: EntityKind,
    /// Field on the target that references the parent's `id`
    pub reference_field: &'static str,
}

const fn rel(name: &'static str, target: EntityKind, reference_field: &'static str) -> Relationship {
    Relationship {
        name,
        target,
        reference_field,
    }
}

const PERSON_RELATIONSHIPS: &[Relationship] = &[
    rel("companies", EntityKind::Companies, "personIds"),
    rel("opportunities", EntityKind::Opportunities, "personIds"),
    rel("interactions", EntityKind::Interactions, "personIds"),
    rel("notes", EntityKind::Notes, "personIds"),
    rel("listEntries", EntityKind::ListEntries, "entityId"),
];

const COMPANY_RELATIONSHIPS: &[Relationship] = &[
    rel("persons", EntityKind::Persons, "companyIds"),
    rel("opportunities", EntityKind::Opportunities, "companyIds"),
    rel("interactions", EntityKind::Interactions, "companyIds"),
    rel("notes", EntityKind::Notes, "companyIds"),
    rel("listEntries", EntityKind::ListEntries, "entityId"),
];

const OPPORTUNITY_RELATIONSHIPS: &[Relationship] = &[
    rel("persons", EntityKind::Persons, "opportunityIds"),
    rel("companies", EntityKind::Companies, "opportunityIds"),
    rel("interactions", EntityKind::Interactions, "opportunityIds"),
    rel("notes", EntityKind::Notes, "opportunityIds"),
];

/// Decide which custom fields the FETCH step must request.
///
/// Every `fields.<Name>` reference in select, where, groupBy, aggregate,
/// having and orderBy is collected; `fields.*` or a bare `fields` requests
/// everything, and a query without `select` needs all fields for its output.
pub fn field_selector(query: &Query) -> FieldSelector {
    if query.select.is_none() {
        return FieldSelector::All;
    }

    let mut paths: Vec<&[PathSegment]> = Vec::new();
    for path in query.select.iter().flatten() {
        paths.push(&path.segments);
    }
    if let Some(clause) = &query.where_clause {
        clause.visit_paths(&mut |p| paths.push(&p.segments));
    }
    if let Some(clause) = &query.having {
        clause.visit_paths(&mut |p| paths.push(&p.segments));
    }
    if let Some(group_by) = &query.group_by {
        paths.push(&group_by.segments);
    }
    for order in query.order_by.iter().flatten() {
        paths.push(&order.field.segments);
    }
    if let Some(aggregate) = &query.aggregate {
        for path in aggregate.field_paths() {
            paths.push(&path.segments);
        }
    }

    let mut names = BTreeSet::new();
    for segments in paths {
        match segments {
            [PathSegment::Key(root), PathSegment::Key(name), ..] if root == "fields" => {
                if name == "*" {
                    return FieldSelector::All;
                }
                names.insert(name.clone());
            }
            [PathSegment::Key(root)] if root == "fields" => return FieldSelector::All,
            _ => {}
        }
    }

    if names.is_empty() {
        FieldSelector::Builtin
    } else {
        FieldSelector::Custom(names.into_iter().collect())
    }
}

/// Relationships of `entity` that a where clause reaches through a quantifier
/// or a `_count` path, and which therefore must be included before filtering.
pub fn filter_relationships(entity: EntityKind, clause: &WhereClause) -> Vec<&'static Relationship> {
    let mut found: Vec<&'static Relationship> = Vec::new();
    clause.visit_collection_roots(&mut |root| {
        if let Some(relationship) = entity.relationship(root) {
            if !found.iter().any(|r| r.name == relationship.name) {
                found.push(relationship);
            }
        }
    });
    found
}

/// Every parent id named by `field` in `eq`/`in` conditions, through `and`
/// and `or`. Numeric strings become integers; duplicates keep first position.
pub fn parent_ids(clause: Option<&WhereClause>, field: &str) -> Vec<Value> {
    let mut ids = Vec::new();
    if let Some(clause) = clause {
        collect_parent_ids(clause, field, &mut ids);
    }
    ids
}

fn collect_parent_ids(clause: &WhereClause, field: &str, ids: &mut Vec<Value>) {
    match clause {
        WhereClause::Condition(condition) if condition.path.as_str() == field => {
            let values = match (condition.op, &condition.value) {
                (Operator::Eq, value) => std::slice::from_ref(value),
                (Operator::In, Value::Array(values)) => values.as_slice(),
                _ => &[],
            };
            for id in values.iter().filter_map(parent_id) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        WhereClause::And(clauses) | WhereClause::Or(clauses) => {
            for clause in clauses {
                collect_parent_ids(clause, field, ids);
            }
        }
        _ => {}
    }
}

fn parent_id(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => n.as_i64().map(Value::from),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;
    use serde_json::json;

    #[test]
    fn test_entity_parse_roundtrip() {
        for kind in EntityKind::all() {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(EntityKind::parse("widgets"), None);
        assert_eq!(
            EntityKind::supported_list(),
            "companies, interactions, listEntries, notes, opportunities, persons"
        );
    }

    #[test]
    fn test_relationship_lookup() {
        let rel = EntityKind::Persons.relationship("companies").unwrap();
        assert_eq!(rel.target, EntityKind::Companies);
        assert_eq!(rel.reference_field, "personIds");
        assert!(EntityKind::Notes.relationship("persons").is_none());
    }

    #[test]
    fn test_field_selector_without_select() {
        let parsed = parse_query(&json!({"from": "persons"})).unwrap();
        assert_eq!(field_selector(&parsed.query), FieldSelector::All);
    }

    #[test]
    fn test_field_selector_collects_custom_fields() {
        let parsed = parse_query(&json!({
            "from": "opportunities",
            "select": ["id", "fields.Status"],
            "where": {"path": "fields.Amount", "op": "gt", "value": 5},
            "orderBy": [{"field": "fields.Close Date"}]
        }))
        .unwrap();

        assert_eq!(
            field_selector(&parsed.query),
            FieldSelector::Custom(vec![
                "Amount".to_string(),
                "Close Date".to_string(),
                "Status".to_string()
            ])
        );
    }

    #[test]
    fn test_field_selector_wildcard_and_builtin() {
        let parsed = parse_query(&json!({"from": "persons", "select": ["id", "fields.*"]})).unwrap();
        assert_eq!(field_selector(&parsed.query), FieldSelector::All);

        let parsed = parse_query(&json!({"from": "persons", "select": ["id", "email"]})).unwrap();
        assert_eq!(field_selector(&parsed.query), FieldSelector::Builtin);
    }

    #[test]
    fn test_filter_relationships() {
        let parsed = parse_query(&json!({
            "from": "persons",
            "where": {"and": [
                {"all": {"path": "interactions", "where": {"path": "type", "op": "eq", "value": "meeting"}}},
                {"path": "companies._count", "op": "gte", "value": 2},
                {"path": "emails._count", "op": "gte", "value": 1}
            ]}
        }))
        .unwrap();

        let clause = parsed.query.where_clause.as_ref().unwrap();
        let names: Vec<_> = filter_relationships(EntityKind::Persons, clause)
            .iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["interactions", "companies"]);
    }

    #[test]
    fn test_parent_ids_through_and_or() {
        let parsed = parse_query(&json!({
            "from": "listEntries",
            "where": {"and": [
                {"or": [
                    {"path": "listId", "op": "eq", "value": 7},
                    {"path": "listId", "op": "in", "value": ["8", 7, "x"]}
                ]},
                {"not": {"path": "listId", "op": "eq", "value": 9}},
                {"path": "fields.Status", "op": "eq", "value": "Active"}
            ]}
        }))
        .unwrap();

        let ids = parent_ids(parsed.query.where_clause.as_ref(), "listId");
        assert_eq!(ids, vec![json!(7), json!(8)]);
        assert!(parent_ids(None, "listId").is_empty());
        assert_eq!(EntityKind::ListEntries.parent_filter(), Some("listId"));
        assert_eq!(EntityKind::Persons.parent_filter(), None);
    }
}
