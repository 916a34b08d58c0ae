use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// A bad or colliding stitching declaration, detected while composing.
/// Composition aborts; nothing is served.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("relation `{owner_type}.{field}` is declared more than once")]
    DuplicateRelation { owner_type: String, field: String },

    #[error("relation `{owner_type}.{field}`: type `{owner_type}` is not defined in any subgraph")]
    UnknownOwnerType { owner_type: String, field: String },

    #[error("relation `{owner_type}.{field}`: no subgraph named `{schema}`")]
    UnknownTargetSchema {
        owner_type: String,
        field: String,
        schema: String,
    },

    #[error("relation `{owner_type}.{field}`: subgraph `{schema}` does not define type `{target_type}`")]
    UnknownTargetType {
        owner_type: String,
        field: String,
        schema: String,
        target_type: String,
    },

    #[error("subgraph `{schema}` exposes no {operation} query for type `{target_type}`")]
    MissingQueryOperation {
        schema: String,
        target_type: String,
        operation: &'static str,
    },

    #[error("pushdown on `{query}.{filter_key}` is declared more than once")]
    DuplicatePushdown { query: String, filter_key: String },

    #[error("pushdown on `{query}`: no subgraph exposes a root query field `{query}`")]
    UnknownPushdownQuery { query: String },

    #[error("pushdown on `{query}`: root query field `{query}` does not return a list")]
    PushdownQueryNotList { query: String },

    #[error("pushdown on `{query}`: no subgraph named `{schema}`")]
    UnknownResolutionSchema { query: String, schema: String },

    #[error("pushdown on `{query}`: subgraph `{schema}` exposes no root query field `{resolution_query}`")]
    UnknownResolutionQuery {
        query: String,
        schema: String,
        resolution_query: String,
    },

    #[error("pushdown on `{query}`: resolution query `{resolution_query}` on `{schema}` does not return a list")]
    ResolutionQueryNotList {
        query: String,
        schema: String,
        resolution_query: String,
    },

    #[error("subgraph `{service}`: {message}")]
    InvalidSchemaDocument { service: String, message: String },

    #[error("invalid gateway configuration: {message}")]
    InvalidConfig { message: String },
}

/// Failure of the merge primitive itself.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("extension document is not valid SDL: {0}")]
    InvalidExtension(String),

    #[error("extension extends unknown type `{type_name}`")]
    UnknownExtendedType { type_name: String },
}

/// Composition is all-or-nothing: the first failing stage aborts it and no
/// partial schema is ever returned.
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("schema merge failed: {0}")]
    Merge(#[from] MergeError),
}

/// A delegated call failed or timed out. Surfaced as a field-level error on
/// the stitched field; sibling fields keep resolving.
#[derive(Error, Debug)]
#[error("delegated query to `{service}` failed: {message}")]
pub struct UpstreamError {
    pub service: String,
    pub message: String,
}

/// A non-nullable relation resolved to zero records.
#[derive(Error, Debug)]
#[error("relation `{owner_type}.{field}` found no `{target_type}` with key {key}")]
pub struct RelationResolutionError {
    pub owner_type: String,
    pub field: String,
    pub target_type: String,
    pub key: Value,
}

/// One entry of a GraphQL response's `errors` array.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl GraphQLError {
    pub fn new(message: impl Into<String>, path: &[PathSegment]) -> Self {
        GraphQLError {
            message: message.into(),
            path: path.to_vec(),
            extensions: None,
        }
    }

    /// A transport or backend failure, tagged with the originating service.
    pub fn upstream(error: &UpstreamError, path: &[PathSegment]) -> Self {
        GraphQLError {
            message: error.to_string(),
            path: path.to_vec(),
            extensions: Some(json!({ "service": error.service })),
        }
    }

    /// An error a backend returned alongside data, re-attached at the
    /// delegating field's position.
    pub fn remote(service: &str, message: String, path: &[PathSegment]) -> Self {
        GraphQLError {
            message,
            path: path.to_vec(),
            extensions: Some(json!({ "service": service })),
        }
    }
}
