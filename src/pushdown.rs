use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ConfigurationError;
use crate::opencrud;
use crate::schema::ServiceSchema;

/// A filter pushdown declaration as written in the gateway configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RawPushdown {
    /// Root list query whose filter gains the nested key.
    pub query: String,
    /// Nested key opened on the query's filter input, e.g. `owner`.
    pub filter_key: String,
    /// Column on the primary records to constrain by membership.
    /// Defaults to the filter key plus `_id`.
    #[serde(default)]
    pub membership_field: Option<String>,
    pub relation: RawPushdownTarget,
}

/// Where a pushdown's nested filter resolves.
#[derive(Clone, Debug, Deserialize)]
pub struct RawPushdownTarget {
    /// Subgraph that evaluates the nested filter.
    pub schema: String,
    /// List query on that subgraph evaluating the nested filter.
    pub query: String,
    /// Key field read from each resolved record. Defaults to `id`.
    #[serde(default)]
    pub key_field: Option<String>,
}

/// A fully defaulted and validated pushdown, with both entangled types
/// resolved so the extension synthesizer needs no further schema access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterPushdownSpec {
    pub query_name: String,
    pub local_type: String,
    pub nested_filter_key: String,
    pub local_membership_field: String,
    pub resolution_schema: String,
    pub resolution_query_name: String,
    pub resolution_type: String,
    pub resolution_result_key_field: String,
}

/// Applies defaults and validates each declaration against the subgraph
/// schemas. Both the primary and the resolution query must exist and
/// return lists.
pub fn normalize(
    raw: &[RawPushdown],
    schemas: &[ServiceSchema],
) -> Result<Vec<FilterPushdownSpec>, ConfigurationError> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut specs = Vec::with_capacity(raw.len());

    for declaration in raw {
        if !seen.insert((declaration.query.clone(), declaration.filter_key.clone())) {
            return Err(ConfigurationError::DuplicatePushdown {
                query: declaration.query.clone(),
                filter_key: declaration.filter_key.clone(),
            });
        }

        // Root queries merge last-definition-wins, so the owning schema is
        // the last one declaring the field.
        let local = schemas
            .iter()
            .rev()
            .find_map(|schema| schema.query_field(&declaration.query))
            .ok_or_else(|| ConfigurationError::UnknownPushdownQuery {
                query: declaration.query.clone(),
            })?;
        if !local.is_list {
            return Err(ConfigurationError::PushdownQueryNotList {
                query: declaration.query.clone(),
            });
        }

        let resolution_schema = schemas
            .iter()
            .find(|schema| schema.name() == declaration.relation.schema)
            .ok_or_else(|| ConfigurationError::UnknownResolutionSchema {
                query: declaration.query.clone(),
                schema: declaration.relation.schema.clone(),
            })?;
        let resolution = resolution_schema
            .query_field(&declaration.relation.query)
            .ok_or_else(|| ConfigurationError::UnknownResolutionQuery {
                query: declaration.query.clone(),
                schema: declaration.relation.schema.clone(),
                resolution_query: declaration.relation.query.clone(),
            })?;
        if !resolution.is_list {
            return Err(ConfigurationError::ResolutionQueryNotList {
                query: declaration.query.clone(),
                schema: declaration.relation.schema.clone(),
                resolution_query: declaration.relation.query.clone(),
            });
        }

        specs.push(FilterPushdownSpec {
            query_name: declaration.query.clone(),
            local_type: local.named_type.clone(),
            nested_filter_key: declaration.filter_key.clone(),
            local_membership_field: declaration
                .membership_field
                .clone()
                .unwrap_or_else(|| opencrud::default_local_key(&declaration.filter_key)),
            resolution_schema: declaration.relation.schema.clone(),
            resolution_query_name: declaration.relation.query.clone(),
            resolution_type: resolution.named_type.clone(),
            resolution_result_key_field: declaration
                .relation
                .key_field
                .clone()
                .unwrap_or_else(|| opencrud::DEFAULT_KEY_FIELD.to_string()),
        });
    }

    Ok(specs)
}

/// Removes and returns the nested sub-filter from the call's filter
/// argument. An explicit JSON null is removed but reported as absent, so
/// no remote resolution fires for it. An empty object is a real filter.
pub fn take_sub_filter(args: &mut Map<String, Value>, nested_key: &str) -> Option<Value> {
    let filter = args.get_mut(opencrud::FILTER_ARG)?.as_object_mut()?;
    match filter.remove(nested_key) {
        None | Some(Value::Null) => None,
        Some(sub_filter) => Some(sub_filter),
    }
}

/// Collects the key field from every record into an ordered, deduplicated
/// set. Records missing the key, or carrying a null one, contribute nothing.
pub fn collect_keys(records: &[Value], key_field: &str) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::with_capacity(records.len());
    for record in records {
        let Some(key) = record.get(key_field) else {
            continue;
        };
        if key.is_null() {
            continue;
        }
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

/// Constrains the filter to the resolved key set. An empty set is still
/// injected: zero matches means an impossible constraint, not no
/// constraint. A membership list already present, from an earlier pushdown
/// on the same call, is intersected in its original order.
pub fn inject_membership(args: &mut Map<String, Value>, membership_field: &str, keys: Vec<Value>) {
    let filter = args
        .entry(opencrud::FILTER_ARG.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !filter.is_object() {
        *filter = Value::Object(Map::new());
    }
    let Some(filter) = filter.as_object_mut() else {
        return;
    };

    let membership_key = opencrud::membership_key(membership_field);
    let constrained = match filter.remove(&membership_key) {
        Some(Value::Array(existing)) => existing
            .into_iter()
            .filter(|key| keys.contains(key))
            .collect(),
        _ => keys,
    };
    filter.insert(membership_key, Value::Array(constrained));
}
