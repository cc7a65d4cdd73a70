//! Predicate classification
//!
//! Decides which parts of a where clause the remote API evaluates. The
//! contract is small and stable: a top-level conjunct of the form
//! `{"path": "fields.<Name>", "op": "eq", "value": <scalar>}` is pushable,
//! everything else (built-in properties, other operators, `or`, `not`,
//! quantifiers, `exists`) stays client-side.

use super::ast::{Condition, Operator, PathSegment, WhereClause};
use crate::source::{ServerFilter, ServerPredicate};

/// A where clause split between server and client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pushdown {
    pub server: Option<ServerFilter>,
    pub client: Option<WhereClause>,
}

/// Split `clause` into a server-side filter and a client-side remainder
pub fn classify(clause: Option<&WhereClause>) -> Pushdown {
    let Some(clause) = clause else {
        return Pushdown::default();
    };

    let conjuncts: Vec<&WhereClause> = match clause {
        WhereClause::And(clauses) => clauses.iter().collect(),
        WhereClause::MatchAll => Vec::new(),
        other => vec![other],
    };

    let mut server = ServerFilter::default();
    let mut client = Vec::new();
    for conjunct in conjuncts {
        match pushable(conjunct) {
            Some(predicate) => server = server.and(predicate),
            None => client.push(conjunct.clone()),
        }
    }

    Pushdown {
        server: (!server.is_empty()).then_some(server),
        client: match client.len() {
            0 => None,
            1 => client.pop(),
            _ => Some(WhereClause::And(client)),
        },
    }
}

/// The server predicate for a conjunct, if the remote API can evaluate it
fn pushable(clause: &WhereClause) -> Option<ServerPredicate> {
    let WhereClause::Condition(Condition {
        path,
        op: Operator::Eq,
        value,
        reference: None,
    }) = clause
    else {
        return None;
    };

    let [PathSegment::Key(root), PathSegment::Key(name)] = path.segments.as_slice() else {
        return None;
    };
    if root != "fields" || name == "*" || value.is_null() || value.is_array() || value.is_object() {
        return None;
    }

    Some(ServerPredicate::FieldEquals {
        field: name.clone(),
        value: value.clone(),
    })
}
