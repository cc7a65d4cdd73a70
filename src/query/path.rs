//! Field Paths
//!
//! Parses and resolves dotted/bracketed field references:
//!
//! ```text
//! name                 simple field
//! address.city         nested object
//! emails[0]            array index
//! emails[-1]           index from the end
//! fields["Deal.Stage"] quoted key (dots, spaces)
//! companies._count     length of the collection reached so far
//! ```
//!
//! Resolution never fails: a segment that does not apply yields "missing".

use nom::{
    branch::alt,
    bytes::complete::{is_not, take_while1},
    character::complete::char,
    combinator::{all_consuming, map},
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Array index, negative counts from the end
    Index(i64),
    /// `_count` pseudo-field
    Count,
}

/// A parsed field reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    pub segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse a path string
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("Field path must not be empty".to_string());
        }

        match all_consuming(parse_segments)(raw) {
            Ok((_, segments)) => Ok(Self {
                raw: raw.to_string(),
                segments,
            }),
            Err(_) => Err(format!("Invalid field path '{}'", raw)),
        }
    }

    /// The path as written in the query
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First key of the path, if it starts with one
    pub fn root_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Whether the path counts a collection
    pub fn has_count(&self) -> bool {
        self.segments.contains(&PathSegment::Count)
    }

    /// Resolve against a record. `None` means the path is missing.
    pub fn resolve<'a>(&self, record: &'a Value) -> Option<Cow<'a, Value>> {
        let mut current: Cow<'a, Value> = Cow::Borrowed(record);

        for segment in &self.segments {
            current = match current {
                Cow::Borrowed(value) => match step(value, segment) {
                    Some(next) => Cow::Borrowed(next),
                    None => Cow::Owned(count(value, segment)?),
                },
                Cow::Owned(value) => match step(&value, segment) {
                    Some(next) => Cow::Owned(next.clone()),
                    None => Cow::Owned(count(&value, segment)?),
                },
            };
        }

        Some(current)
    }

    /// Write `value` into `target` at this path, creating intermediate objects.
    ///
    /// Paths containing indexes or `_count` are stored flat under the raw path.
    pub fn insert_into(&self, target: &mut Map<String, Value>, value: Value) {
        let keys: Option<Vec<&str>> = self
            .segments
            .iter()
            .map(|s| match s {
                PathSegment::Key(k) => Some(k.as_str()),
                _ => None,
            })
            .collect();

        let Some((last, parents)) = keys.as_deref().and_then(|k| k.split_last()) else {
            target.insert(self.raw.clone(), value);
            return;
        };

        let mut current = target;
        for key in parents {
            let entry = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry.as_object_mut() {
                Some(object) => object,
                None => return,
            };
        }
        current.insert(last.to_string(), value);
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn step<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match (segment, value) {
        (PathSegment::Key(key), Value::Object(map)) => map.get(key),
        (PathSegment::Index(index), Value::Array(items)) => {
            let len = items.len() as i64;
            let position = if *index < 0 { len + index } else { *index };
            if (0..len).contains(&position) {
                items.get(position as usize)
            } else {
                None
            }
        }
        (PathSegment::Count, Value::Object(map)) => map.get("_count"),
        _ => None,
    }
}

fn count(value: &Value, segment: &PathSegment) -> Option<Value> {
    match (segment, value) {
        (PathSegment::Count, Value::Array(items)) => Some(Value::from(items.len() as u64)),
        (PathSegment::Count, Value::Null) => Some(Value::from(0u64)),
        _ => None,
    }
}

fn parse_segments(input: &str) -> IResult<&str, Vec<PathSegment>> {
    let (input, first) = alt((parse_bracket, parse_key))(input)?;
    let (input, rest) = many0(alt((preceded(char('.'), parse_key), parse_bracket)))(input)?;

    let mut segments = Vec::with_capacity(rest.len() + 1);
    segments.push(first);
    segments.extend(rest);
    Ok((input, segments))
}

/// Bare key: anything up to the next separator
fn parse_key(input: &str) -> IResult<&str, PathSegment> {
    map(
        take_while1(|c: char| c != '.' && c != '[' && c != ']'),
        |key: &str| {
            if key == "_count" {
                PathSegment::Count
            } else {
                PathSegment::Key(key.to_string())
            }
        },
    )(input)
}

/// `[n]`, `[-n]`, `["quoted"]`, `['quoted']` or `[bare]`
fn parse_bracket(input: &str) -> IResult<&str, PathSegment> {
    map(delimited(char('['), is_not("]"), char(']')), |content: &str| {
        let quoted = ['"', '\''].iter().find_map(|q| {
            content
                .strip_prefix(*q)
                .and_then(|rest| rest.strip_suffix(*q))
        });
        match quoted {
            Some(key) => PathSegment::Key(key.to_string()),
            None => match content.parse::<i64>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(content.to_string()),
            },
        }
    })(input)
}
