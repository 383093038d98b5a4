//! Filter, projection and sort evaluation over JSON documents.
//!
//! Filters are top-level field equality; an empty filter matches every
//! document. Projections and sorts follow the usual document-store rules.

use super::{Document, FindOptions, SortDirection};
use crate::constants::ID_FIELD;
use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use std::cmp::Ordering;

/// Returns true when every filter field is present in `doc` with an equal value.
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

/// Extracts the string identity when the filter is exactly `{ "_id": "<id>" }`.
pub fn identity_key(filter: &Document) -> Option<&str> {
    if filter.len() != 1 {
        return None;
    }
    filter.get(ID_FIELD).and_then(Value::as_str)
}

fn is_included(flag: &Value) -> StoreResult<bool> {
    match flag {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        other => Err(StoreError::InvalidDocument(format!(
            "projection values must be 0/1 or booleans, got {}",
            other
        ))),
    }
}

/// A parsed projection, ready to apply to many documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Exclude(Vec<String>),
    Include { fields: Vec<String>, keep_id: bool },
}

impl Projection {
    pub fn parse(fields: &Document) -> StoreResult<Self> {
        if fields.is_empty() {
            return Ok(Projection::All);
        }

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        let mut keep_id = true;
        for (field, flag) in fields {
            let include = is_included(flag)?;
            if field == ID_FIELD {
                keep_id = include;
                if !include {
                    excluded.push(field.clone());
                }
                continue;
            }
            if include {
                included.push(field.clone());
            } else {
                excluded.push(field.clone());
            }
        }

        if included.is_empty() {
            return Ok(Projection::Exclude(excluded));
        }
        if excluded.iter().any(|f| f != ID_FIELD) {
            return Err(StoreError::InvalidDocument(
                "projection cannot mix inclusion and exclusion".to_string(),
            ));
        }
        Ok(Projection::Include {
            fields: included,
            keep_id,
        })
    }

    pub fn apply(&self, mut doc: Document) -> Document {
        match self {
            Projection::All => doc,
            Projection::Exclude(fields) => {
                for field in fields {
                    doc.remove(field);
                }
                doc
            }
            Projection::Include { fields, keep_id } => {
                let mut out = Document::new();
                if *keep_id {
                    if let Some(id) = doc.remove(ID_FIELD) {
                        out.insert(ID_FIELD.to_string(), id);
                    }
                }
                for field in fields {
                    if let Some(value) = doc.remove(field) {
                        out.insert(field.clone(), value);
                    }
                }
                out
            }
        }
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

/// Sorts documents in place by the given keys; ties keep store order.
pub fn sort_documents(docs: &mut [Document], sort: &[(String, SortDirection)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ord = compare_values(a.get(field), b.get(field));
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Applies filter, sort, skip, limit and projection to an already-loaded set.
pub fn evaluate(docs: Vec<Document>, options: &FindOptions) -> StoreResult<Vec<Document>> {
    let projection = Projection::parse(&options.projection)?;
    let mut selected: Vec<Document> = docs
        .into_iter()
        .filter(|doc| matches(doc, &options.filter))
        .collect();
    sort_documents(&mut selected, &options.sort);

    let limit = if options.limit == 0 {
        usize::MAX
    } else {
        options.limit
    };
    Ok(selected
        .into_iter()
        .skip(options.skip)
        .take(limit)
        .map(|doc| projection.apply(doc))
        .collect())
}
