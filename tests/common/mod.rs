#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use stitchery::{
    DelegatedRequest, GraphQLRequest, QueryDelegate, RawPushdown, RawPushdownTarget, RawRelation,
    RawRelationTarget, RelationKind, RequestContext, ServiceSchema, StitchingGateway,
    UpstreamError,
};

pub const USERSERVICE_SDL: &str = include_str!("../../schemas/userservice.graphql");
pub const OBJECTSERVICE_SDL: &str = include_str!("../../schemas/objectservice.graphql");

pub fn service_schemas() -> Vec<ServiceSchema> {
    vec![
        ServiceSchema::parse("userservice", USERSERVICE_SDL).unwrap(),
        ServiceSchema::parse("objectservice", OBJECTSERVICE_SDL).unwrap(),
    ]
}

/// `Object.owner -> User`, all defaults: key column `owner_id`, target key
/// `id`, to-one.
pub fn owner_relation() -> RawRelation {
    RawRelation {
        type_name: "Object".to_string(),
        field: "owner".to_string(),
        from_field: None,
        nullable: false,
        relation: RawRelationTarget {
            kind: None,
            schema: "userservice".to_string(),
            type_name: "User".to_string(),
            field: None,
        },
    }
}

/// `User.objects -> [Object!]!`, joined on `Object.owner_id = User.id`.
pub fn objects_relation() -> RawRelation {
    RawRelation {
        type_name: "User".to_string(),
        field: "objects".to_string(),
        from_field: Some("id".to_string()),
        nullable: false,
        relation: RawRelationTarget {
            kind: Some(RelationKind::Many),
            schema: "objectservice".to_string(),
            type_name: "Object".to_string(),
            field: Some("owner_id".to_string()),
        },
    }
}

/// `objects(where: { owner: ... })` resolves against `userservice.users`
/// and rewrites to `owner_id_in`.
pub fn owner_pushdown() -> RawPushdown {
    RawPushdown {
        query: "objects".to_string(),
        filter_key: "owner".to_string(),
        membership_field: None,
        relation: RawPushdownTarget {
            schema: "userservice".to_string(),
            query: "users".to_string(),
            key_field: None,
        },
    }
}

pub fn users() -> Vec<Value> {
    vec![
        json!({ "id": 1, "name": "Alice", "email": "alice@example.com" }),
        json!({ "id": 2, "name": "Bob", "email": "bob@example.com" }),
        json!({ "id": 3, "name": "Carol", "email": null }),
    ]
}

pub fn objects() -> Vec<Value> {
    vec![
        json!({ "id": 10, "name": "Laptop", "owner_id": 1 }),
        json!({ "id": 11, "name": "Keyboard", "owner_id": 1 }),
        json!({ "id": 12, "name": "Monitor", "owner_id": 2 }),
        json!({ "id": 13, "name": "Orphaned", "owner_id": 99 }),
    ]
}

/// How a fake service answers one root field.
#[derive(Clone)]
pub enum Handler {
    /// Filter rows by the `where` argument, return all matches.
    List(Vec<Value>),
    /// Filter rows by the `where` argument, return the first match or null.
    Single(Vec<Value>),
    /// Return this value unchanged.
    Static(Value),
    /// Fail the call.
    Fail(String),
}

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub service: String,
    pub query_name: String,
    pub args: Value,
    pub selection: String,
}

/// In-process stand-in for the HTTP transport. Answers OpenCRUD-style
/// queries from static rows, understanding equality and `_in` membership
/// filters, and records every delegated call for assertions.
#[derive(Default)]
pub struct FakeBackends {
    handlers: HashMap<String, HashMap<String, Handler>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl FakeBackends {
    pub fn new() -> Self {
        FakeBackends::default()
    }

    pub fn handle(mut self, service: &str, query: &str, handler: Handler) -> Self {
        self.handlers
            .entry(service.to_string())
            .or_default()
            .insert(query.to_string(), handler);
        self
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }
}

fn matches_where(record: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return true;
    };
    for (key, expected) in filter {
        if let Some(field) = key.strip_suffix("_in") {
            let Some(candidates) = expected.as_array() else {
                return false;
            };
            let actual = record.get(field).cloned().unwrap_or(Value::Null);
            if !candidates.contains(&actual) {
                return false;
            }
        } else if record.get(key) != Some(expected) {
            return false;
        }
    }
    true
}

#[async_trait]
impl QueryDelegate for FakeBackends {
    async fn delegate(
        &self,
        service: &str,
        request: &DelegatedRequest,
        _context: &RequestContext,
    ) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(RecordedCall {
            service: service.to_string(),
            query_name: request.query_name.clone(),
            args: Value::Object(request.args.clone()),
            selection: request.selection.clone(),
        });

        let handler = self
            .handlers
            .get(service)
            .and_then(|handlers| handlers.get(&request.query_name))
            .ok_or_else(|| UpstreamError {
                service: service.to_string(),
                message: format!("no handler for `{}`", request.query_name),
            })?;
        let filter = request.args.get("where").cloned().unwrap_or(Value::Null);

        let result = match handler {
            Handler::Fail(message) => {
                return Err(UpstreamError {
                    service: service.to_string(),
                    message: message.clone(),
                });
            }
            Handler::List(rows) => Value::Array(
                rows.iter()
                    .filter(|row| matches_where(row, &filter))
                    .cloned()
                    .collect(),
            ),
            Handler::Single(rows) => rows
                .iter()
                .find(|row| matches_where(row, &filter))
                .cloned()
                .unwrap_or(Value::Null),
            Handler::Static(value) => value.clone(),
        };

        let mut data = Map::new();
        data.insert(request.query_name.clone(), result);
        Ok(json!({ "data": data }))
    }
}

pub struct TestFixture {
    pub gateway: StitchingGateway,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl TestFixture {
    /// Two stitched services over a small dataset: three users and four
    /// objects, one of which points at a user that does not exist.
    pub fn setup() -> Self {
        let backends = FakeBackends::new()
            .handle("userservice", "user", Handler::Single(users()))
            .handle("userservice", "users", Handler::List(users()))
            .handle("objectservice", "object", Handler::Single(objects()))
            .handle("objectservice", "objects", Handler::List(objects()))
            .handle(
                "objectservice",
                "createObject",
                Handler::Static(json!({ "id": 42, "name": "Webcam", "owner_id": 2 })),
            );
        Self::with_backends(
            backends,
            vec![owner_relation(), objects_relation()],
            vec![owner_pushdown()],
        )
    }

    pub fn with_backends(
        backends: FakeBackends,
        relations: Vec<RawRelation>,
        pushdowns: Vec<RawPushdown>,
    ) -> Self {
        let calls = backends.call_log();
        let gateway = StitchingGateway::compose_with(
            service_schemas(),
            &relations,
            &pushdowns,
            Arc::new(backends),
        )
        .unwrap();
        TestFixture { gateway, calls }
    }

    pub async fn execute(&self, query: &str) -> Value {
        self.execute_with_variables(query, None).await
    }

    pub async fn execute_with_variables(&self, query: &str, variables: Option<Value>) -> Value {
        let request = GraphQLRequest {
            query: query.to_string(),
            variables,
            operation_name: None,
        };
        self.gateway
            .process_request(&request, &RequestContext::default())
            .await
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}
