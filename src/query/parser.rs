//! Query Parser & Validator
//!
//! Turns a JSON query document into a typed [`Query`]. Checks run in a fixed
//! order so the first reported problem is predictable:
//!
//! 1. Structural shape: object, `$version`, required `from`, known keys and
//!    per-field types ([`QueryError::Parse`])
//! 2. Semantic checks inside clauses: operators, paths, operand shapes,
//!    aggregate references ([`QueryError::Validation`])
//! 3. Cross-field constraints: `aggregate` vs `include`, `groupBy` and
//!    `having` requiring `aggregate`, known relationships, parent filters
//! 4. Numeric bounds on `limit`

use super::ast::*;
use super::cursor;
use super::error::{QueryError, QueryResult};
use super::schema::{parent_ids, EntityKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const KNOWN_KEYS: &[&str] = &[
    "$version",
    "from",
    "select",
    "where",
    "include",
    "orderBy",
    "groupBy",
    "aggregate",
    "having",
    "limit",
    "cursor",
];

/// A parsed query plus non-fatal findings
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub query: Query,
    pub warnings: Vec<String>,
}

/// Parse a query from JSON text
pub fn parse_query_str(input: &str) -> QueryResult<ParseResult> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| QueryError::parse_document(format!("Invalid JSON: {}", e)))?;
    parse_query(&value)
}

/// Parse and validate a query document
pub fn parse_query(value: &Value) -> QueryResult<ParseResult> {
    QueryParser::default().parse(value)
}

/// Where a clause sits, which decides what it may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Top level of `where`
    Root,
    /// Body of a quantifier
    Element,
    /// `where` of an exists subquery, may use `$ref`
    Subquery,
    /// `having`, evaluated against aggregate rows
    Having,
}

#[derive(Default)]
struct QueryParser {
    warnings: Vec<String>,
    next_exists_id: usize,
}

impl QueryParser {
    fn parse(mut self, value: &Value) -> QueryResult<ParseResult> {
        let object = value
            .as_object()
            .ok_or_else(|| QueryError::parse_document("Query must be a JSON object"))?;

        let version = self.parse_version(object)?;
        let from = parse_entity(object.get("from"), "from")?;

        if let Some(key) = object.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            return Err(QueryError::parse(
                format!(
                    "Unknown field '{}'. Supported fields: {}",
                    key,
                    KNOWN_KEYS.join(", ")
                ),
                key.clone(),
            ));
        }

        let select = match object.get("select") {
            Some(value) => Some(
                string_list(value, "select")?
                    .into_iter()
                    .enumerate()
                    .map(|(i, raw)| field_path(raw, &format!("select[{}]", i)))
                    .collect::<QueryResult<Vec<_>>>()?,
            ),
            None => None,
        };

        let include = match object.get("include") {
            Some(value) => Some(
                string_list(value, "include")?
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            ),
            None => None,
        };

        let order_by = match object.get("orderBy") {
            Some(value) => Some(parse_order_by(value)?),
            None => None,
        };

        let group_by = match object.get("groupBy") {
            Some(Value::String(raw)) if !raw.is_empty() => Some(field_path(raw, "groupBy")?),
            Some(_) => {
                return Err(QueryError::parse(
                    "groupBy must be a non-empty string",
                    "groupBy",
                ))
            }
            None => None,
        };

        let limit = match object.get("limit") {
            Some(value) => Some(value.as_i64().ok_or_else(|| {
                QueryError::parse("limit must be an integer", "limit")
            })?),
            None => None,
        };

        let cursor = match object.get("cursor") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(QueryError::parse("cursor must be a string", "cursor")),
        };

        let where_clause = match object.get("where") {
            Some(value) => Some(self.parse_where(value, "where", Scope::Root)?),
            None => None,
        };

        let aggregate = match object.get("aggregate") {
            Some(value) => Some(parse_aggregate(value)?),
            None => None,
        };

        let having = match object.get("having") {
            Some(value) => Some(self.parse_where(value, "having", Scope::Having)?),
            None => None,
        };

        // Cross-field constraints
        if aggregate.is_some() && include.is_some() {
            return Err(QueryError::validation(
                "Cannot use 'aggregate' with 'include'. Aggregate over the base records, \
                 or drop the aggregate to include related records",
                "aggregate",
            ));
        }
        if group_by.is_some() && aggregate.is_none() {
            return Err(QueryError::validation(
                "'groupBy' requires 'aggregate'",
                "groupBy",
            ));
        }
        if having.is_some() && aggregate.is_none() {
            return Err(QueryError::validation(
                "'having' requires 'aggregate'",
                "having",
            ));
        }
        for name in include.iter().flatten() {
            validate_relationship(from, name)?;
        }
        if let Some(field) = from.parent_filter() {
            if parent_ids(where_clause.as_ref(), field).is_empty() {
                return Err(QueryError::validation(
                    format!(
                        "Query for '{}' requires a '{}' filter (eq or in)",
                        from, field
                    ),
                    "where",
                ));
            }
        }

        // Numeric bounds
        let limit = match limit {
            Some(n) if n < 0 => {
                return Err(QueryError::validation(
                    format!("limit must be non-negative, got {}", n),
                    "limit",
                ))
            }
            Some(n) if n as u64 > MAX_LIMIT as u64 => {
                return Err(QueryError::validation(
                    format!("limit must not exceed {}, got {}", MAX_LIMIT, n),
                    "limit",
                ))
            }
            Some(0) => {
                self.warnings
                    .push("limit is 0, no records will be returned".to_string());
                Some(0)
            }
            Some(n) => Some(n as usize),
            None => None,
        };

        let query = Query {
            version,
            from,
            select,
            where_clause,
            include,
            order_by,
            group_by,
            aggregate,
            having,
            limit,
            cursor,
            fingerprint: cursor::hash_query(value),
        };

        Ok(ParseResult {
            query,
            warnings: self.warnings,
        })
    }

    fn parse_version(&mut self, object: &Map<String, Value>) -> QueryResult<String> {
        match object.get("$version") {
            None => {
                self.warnings.push(format!(
                    "No $version specified, assuming {}",
                    CURRENT_VERSION
                ));
                Ok(CURRENT_VERSION.to_string())
            }
            Some(Value::String(v)) if SUPPORTED_VERSIONS.contains(&v.as_str()) => Ok(v.clone()),
            Some(other) => {
                let shown = other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string());
                Err(QueryError::parse(
                    format!(
                        "Unsupported query version '{}'. Supported versions: {}",
                        shown,
                        SUPPORTED_VERSIONS.join(", ")
                    ),
                    "$version",
                ))
            }
        }
    }

    fn parse_where(&mut self, value: &Value, field: &str, scope: Scope) -> QueryResult<WhereClause> {
        let object = value
            .as_object()
            .ok_or_else(|| QueryError::parse(format!("{} must be an object", field), field))?;

        if object.is_empty() {
            return Ok(WhereClause::MatchAll);
        }

        let compound = object.keys().find_map(|k| compound_kind(k).map(|kind| (k, kind)));
        let Some((key, kind)) = compound else {
            return self.parse_condition(object, field, scope);
        };

        if object.len() > 1 {
            return Err(QueryError::parse(
                format!(
                    "{} must contain only '{}', found {} keys",
                    field,
                    key,
                    object.len()
                ),
                field,
            ));
        }

        let inner = &object[key.as_str()];
        let inner_field = format!("{}.{}", field, key);

        match kind {
            "and" | "or" => {
                let items = inner.as_array().ok_or_else(|| {
                    QueryError::parse(format!("{} must be an array", inner_field), &inner_field)
                })?;
                let clauses = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.parse_where(item, &format!("{}[{}]", inner_field, i), scope))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(if kind == "and" {
                    WhereClause::And(clauses)
                } else {
                    WhereClause::Or(clauses)
                })
            }
            "not" => Ok(WhereClause::Not(Box::new(
                self.parse_where(inner, &inner_field, scope)?,
            ))),
            "all" | "none" => {
                if scope == Scope::Having {
                    return Err(QueryError::validation(
                        format!("'{}' is not supported in having", kind),
                        inner_field,
                    ));
                }
                let quantifier = self.parse_quantifier(inner, &inner_field)?;
                Ok(if kind == "all" {
                    WhereClause::All(quantifier)
                } else {
                    WhereClause::NoneOf(quantifier)
                })
            }
            _ => {
                if scope != Scope::Root {
                    return Err(QueryError::validation(
                        "'exists' is only supported in the top-level where clause",
                        inner_field,
                    ));
                }
                Ok(WhereClause::Exists(self.parse_exists(inner, &inner_field)?))
            }
        }
    }

    fn parse_condition(
        &mut self,
        object: &Map<String, Value>,
        field: &str,
        scope: Scope,
    ) -> QueryResult<WhereClause> {
        if let Some(key) = object
            .keys()
            .find(|k| !["path", "op", "value"].contains(&k.as_str()))
        {
            return Err(QueryError::parse(
                format!(
                    "Unknown key '{}' in {}. A condition has path, op and value; \
                     compound clauses use and, or, not, all, none or exists",
                    key, field
                ),
                format!("{}.{}", field, key),
            ));
        }

        let path_field = format!("{}.path", field);
        let raw_path = match object.get("path") {
            Some(Value::String(s)) => s,
            Some(_) => return Err(QueryError::parse("path must be a string", path_field)),
            None => {
                return Err(QueryError::parse(
                    format!("Missing 'path' in {}", field),
                    path_field,
                ))
            }
        };
        let path = field_path(raw_path, &path_field)?;

        let op_field = format!("{}.op", field);
        let op = match object.get("op") {
            Some(Value::String(s)) => Operator::parse(s).ok_or_else(|| {
                QueryError::validation(
                    format!(
                        "Unknown operator '{}'. Supported operators: {}",
                        s,
                        Operator::supported_list()
                    ),
                    &op_field,
                )
            })?,
            Some(_) => return Err(QueryError::parse("op must be a string", op_field)),
            None => {
                return Err(QueryError::parse(
                    format!("Missing 'op' in {}", field),
                    op_field,
                ))
            }
        };

        let value_field = format!("{}.value", field);
        let value = object.get("value").cloned().unwrap_or(Value::Null);

        if let Some(raw_ref) = reference_of(&value) {
            if scope != Scope::Subquery {
                return Err(QueryError::validation(
                    "$ref is only allowed inside an exists subquery",
                    value_field,
                ));
            }
            if op.requires_array() {
                return Err(QueryError::validation(
                    format!("Operator '{}' does not accept a $ref value", op),
                    value_field,
                ));
            }
            return Ok(WhereClause::Condition(Condition {
                path,
                op,
                value: Value::Null,
                reference: Some(field_path(raw_ref, &value_field)?),
            }));
        }

        if op.requires_value() && !object.contains_key("value") {
            return Err(QueryError::validation(
                format!("Operator '{}' requires a value", op),
                value_field,
            ));
        }
        if op.requires_array() {
            let Some(items) = value.as_array() else {
                return Err(QueryError::validation(
                    format!("Operator '{}' requires an array value", op),
                    value_field,
                ));
            };
            if op == Operator::Between && items.len() != 2 {
                return Err(QueryError::validation(
                    format!(
                        "Operator 'between' requires exactly two values [low, high], got {}",
                        items.len()
                    ),
                    value_field,
                ));
            }
        }

        Ok(WhereClause::Condition(Condition {
            path,
            op,
            value,
            reference: None,
        }))
    }

    fn parse_quantifier(&mut self, value: &Value, field: &str) -> QueryResult<Quantifier> {
        let object = value
            .as_object()
            .ok_or_else(|| QueryError::parse(format!("{} must be an object", field), field))?;

        if let Some(key) = object
            .keys()
            .find(|k| !["path", "over", "where"].contains(&k.as_str()))
        {
            return Err(QueryError::parse(
                format!("Unknown key '{}' in {}", key, field),
                format!("{}.{}", field, key),
            ));
        }

        let over = match object.get("path").or_else(|| object.get("over")) {
            Some(Value::String(raw)) => field_path(raw, &format!("{}.path", field))?,
            _ => {
                return Err(QueryError::parse(
                    format!("{} requires a 'path' string naming the collection", field),
                    format!("{}.path", field),
                ))
            }
        };

        let where_field = format!("{}.where", field);
        let condition = match object.get("where") {
            Some(inner) => self.parse_where(inner, &where_field, Scope::Element)?,
            None => {
                return Err(QueryError::parse(
                    format!("{} requires a 'where' clause", field),
                    where_field,
                ))
            }
        };

        Ok(Quantifier {
            over,
            condition: Box::new(condition),
        })
    }

    fn parse_exists(&mut self, value: &Value, field: &str) -> QueryResult<ExistsSubquery> {
        let object = value
            .as_object()
            .ok_or_else(|| QueryError::parse(format!("{} must be an object", field), field))?;

        if let Some(key) = object
            .keys()
            .find(|k| !["from", "via", "where"].contains(&k.as_str()))
        {
            return Err(QueryError::parse(
                format!("Unknown key '{}' in {}", key, field),
                format!("{}.{}", field, key),
            ));
        }

        let from = parse_entity(object.get("from"), &format!("{}.from", field))?;

        let via = match object.get("via") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => {
                return Err(QueryError::parse(
                    "via must be a non-empty string",
                    format!("{}.via", field),
                ))
            }
            None => None,
        };

        let id = self.next_exists_id;
        self.next_exists_id += 1;

        let condition = match object.get("where") {
            Some(inner) => Some(Box::new(self.parse_where(
                inner,
                &format!("{}.where", field),
                Scope::Subquery,
            )?)),
            None => None,
        };

        Ok(ExistsSubquery {
            id,
            from,
            via,
            condition,
        })
    }
}

/// Canonical compound kind for a where key
fn compound_kind(key: &str) -> Option<&'static str> {
    match key.strip_suffix('_').unwrap_or(key) {
        "and" => Some("and"),
        "or" => Some("or"),
        "not" => Some("not"),
        "all" => Some("all"),
        "none" => Some("none"),
        "exists" => Some("exists"),
        _ => None,
    }
}

/// `{"$ref": "path"}`
fn reference_of(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get("$ref")?.as_str()
}

fn parse_entity(value: Option<&Value>, field: &str) -> QueryResult<EntityKind> {
    match value {
        Some(Value::String(name)) => EntityKind::parse(name).ok_or_else(|| {
            QueryError::validation(
                format!(
                    "Unknown entity type '{}'. Supported entities: {}",
                    name,
                    EntityKind::supported_list()
                ),
                field,
            )
        }),
        Some(_) => Err(QueryError::parse(
            format!("'{}' must be a string", field),
            field,
        )),
        None => Err(QueryError::parse(
            format!("Missing required field '{}'", field),
            field,
        )),
    }
}

fn field_path(raw: &str, field: &str) -> QueryResult<FieldPath> {
    FieldPath::parse(raw).map_err(|message| QueryError::validation(message, field))
}

fn string_list<'a>(value: &'a Value, field: &str) -> QueryResult<Vec<&'a str>> {
    let items = value
        .as_array()
        .ok_or_else(|| QueryError::parse(format!("{} must be an array of strings", field), field))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) if !s.is_empty() => Ok(s.as_str()),
            _ => Err(QueryError::parse(
                format!("{}[{}] must be a non-empty string", field, i),
                format!("{}[{}]", field, i),
            )),
        })
        .collect()
}

fn parse_order_by(value: &Value) -> QueryResult<Vec<OrderBy>> {
    let items = value
        .as_array()
        .ok_or_else(|| QueryError::parse("orderBy must be an array", "orderBy"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let field = format!("orderBy[{}]", i);
            let object = item.as_object().ok_or_else(|| {
                QueryError::parse(
                    format!("{} must be an object with 'field' and optional 'direction'", field),
                    &field,
                )
            })?;

            let path = match object.get("field") {
                Some(Value::String(raw)) if !raw.is_empty() => {
                    field_path(raw, &format!("{}.field", field))?
                }
                _ => {
                    return Err(QueryError::parse(
                        format!("{}.field must be a non-empty string", field),
                        format!("{}.field", field),
                    ))
                }
            };

            let direction = match object.get("direction").map(|d| d.as_str()) {
                None | Some(Some("asc")) => SortDirection::Asc,
                Some(Some("desc")) => SortDirection::Desc,
                Some(other) => {
                    return Err(QueryError::validation(
                        format!(
                            "Invalid sort direction '{}'. Supported directions: asc, desc",
                            other.unwrap_or("<non-string>")
                        ),
                        format!("{}.direction", field),
                    ))
                }
            };

            Ok(OrderBy {
                field: path,
                direction,
            })
        })
        .collect()
}

fn parse_aggregate(value: &Value) -> QueryResult<AggregateSpec> {
    let object = value
        .as_object()
        .ok_or_else(|| QueryError::parse("aggregate must be an object", "aggregate"))?;

    if object.is_empty() {
        return Err(QueryError::validation(
            "aggregate must define at least one aggregate",
            "aggregate",
        ));
    }

    let mut entries = BTreeMap::new();
    for (name, spec) in object {
        let field = format!("aggregate.{}", name);
        entries.insert(name.clone(), parse_aggregate_func(spec, &field)?);
    }

    AggregateSpec::new(entries)
}

fn parse_aggregate_func(value: &Value, field: &str) -> QueryResult<AggregateFunc> {
    let (function, argument) = match value.as_object() {
        Some(object) if object.len() == 1 => object
            .iter()
            .next()
            .ok_or_else(|| QueryError::parse("empty aggregate", field))?,
        _ => {
            return Err(QueryError::parse(
                format!(
                    "{} must be an object with exactly one function, e.g. {{\"count\": true}}",
                    field
                ),
                field,
            ))
        }
    };

    let field_arg = |arg: &Value| -> QueryResult<FieldPath> {
        match arg {
            Value::String(raw) if !raw.is_empty() => field_path(raw, field),
            _ => Err(QueryError::parse(
                format!("{}.{} must be a field path string", field, function),
                field,
            )),
        }
    };

    match function.as_str() {
        "count" => match argument {
            Value::Bool(true) => Ok(AggregateFunc::Count(CountTarget::Rows)),
            Value::String(_) => Ok(AggregateFunc::Count(CountTarget::Field(field_arg(argument)?))),
            _ => Err(QueryError::parse(
                format!("{}.count must be true or a field path", field),
                field,
            )),
        },
        "sum" => Ok(AggregateFunc::Sum(field_arg(argument)?)),
        "avg" => Ok(AggregateFunc::Avg(field_arg(argument)?)),
        "min" => Ok(AggregateFunc::Min(field_arg(argument)?)),
        "max" => Ok(AggregateFunc::Max(field_arg(argument)?)),
        "first" => Ok(AggregateFunc::First(field_arg(argument)?)),
        "last" => Ok(AggregateFunc::Last(field_arg(argument)?)),
        "percentile" => {
            let target = argument.get("field").ok_or_else(|| {
                QueryError::parse(
                    format!("{}.percentile requires 'field' and 'p'", field),
                    field,
                )
            })?;
            let p = argument.get("p").and_then(Value::as_f64).ok_or_else(|| {
                QueryError::parse(format!("{}.percentile.p must be a number", field), field)
            })?;
            if !(0.0..=100.0).contains(&p) {
                return Err(QueryError::validation(
                    format!("Percentile must be between 0 and 100, got {}", p),
                    field,
                ));
            }
            Ok(AggregateFunc::Percentile {
                field: field_arg(target)?,
                p,
            })
        }
        name => {
            let Some(op) = DerivedOp::parse(name) else {
                return Err(QueryError::validation(
                    format!(
                        "Unknown aggregate function '{}'. Supported functions: {}",
                        name,
                        AGGREGATE_FUNCTIONS.join(", ")
                    ),
                    field,
                ));
            };
            let items = argument.as_array().ok_or_else(|| {
                QueryError::parse(format!("{}.{} must be an array", field, name), field)
            })?;
            if items.len() < 2 {
                return Err(QueryError::validation(
                    format!("'{}' requires at least two operands", name),
                    field,
                ));
            }
            let operands = items
                .iter()
                .map(|item| match item {
                    Value::String(reference) => Ok(Operand::Ref(reference.clone())),
                    Value::Number(n) => n.as_f64().map(Operand::Literal).ok_or_else(|| {
                        QueryError::parse(format!("{}: invalid number", field), field)
                    }),
                    _ => Err(QueryError::parse(
                        format!(
                            "{}.{} operands must be aggregate names or numbers",
                            field, name
                        ),
                        field,
                    )),
                })
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(AggregateFunc::Derived { op, operands })
        }
    }
}

fn validate_relationship(entity: EntityKind, name: &str) -> QueryResult<()> {
    if entity.relationship(name).is_some() {
        return Ok(());
    }

    let available: Vec<&str> = entity.relationships().iter().map(|r| r.name).collect();
    let message = if available.is_empty() {
        format!(
            "Unknown relationship '{}' for {}. {} has no relationships to include",
            name, entity, entity
        )
    } else {
        format!(
            "Unknown relationship '{}' for {}. Available relationships: {}",
            name,
            entity,
            available.join(", ")
        )
    };
    Err(QueryError::validation(message, "include"))
}
