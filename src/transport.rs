use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::UpstreamError;

/// Immutable per-request context carried through every delegated call.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Auth headers lifted off the incoming request and replayed on each
    /// delegated call.
    pub forwarded_headers: HashMap<String, String>,
}

/// Operation kind of a delegated call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn keyword(self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

/// One delegated call: a single root field with arguments and a rendered
/// selection. Structured so tests can inspect it and transports can render
/// it to wire form.
#[derive(Clone, Debug)]
pub struct DelegatedRequest {
    pub kind: OperationKind,
    pub query_name: String,
    pub args: Map<String, Value>,
    /// `(name, SDL type)` declarations for the arguments actually sent,
    /// taken from the target schema so the service coerces values itself.
    pub variables: Vec<(String, String)>,
    /// Rendered selection text, e.g. `{ id owner_id }`.
    pub selection: String,
}

impl DelegatedRequest {
    /// Renders the call as GraphQL text plus a variables object. Arguments
    /// travel as variables so enum and scalar coercion happens against the
    /// target schema's own argument types.
    pub fn render(&self) -> (String, Value) {
        let mut query = String::from(self.kind.keyword());
        query.push_str(" Delegated");
        if !self.variables.is_empty() {
            query.push('(');
            for (position, (name, variable_type)) in self.variables.iter().enumerate() {
                if position > 0 {
                    query.push_str(", ");
                }
                query.push('$');
                query.push_str(name);
                query.push_str(": ");
                query.push_str(variable_type);
            }
            query.push(')');
        }
        query.push_str(" { ");
        query.push_str(&self.query_name);
        if !self.variables.is_empty() {
            query.push('(');
            for (position, (name, _)) in self.variables.iter().enumerate() {
                if position > 0 {
                    query.push_str(", ");
                }
                query.push_str(name);
                query.push_str(": $");
                query.push_str(name);
            }
            query.push(')');
        }
        if !self.selection.is_empty() {
            query.push(' ');
            query.push_str(&self.selection);
        }
        query.push_str(" }");

        let variables: Map<String, Value> = self
            .variables
            .iter()
            .filter_map(|(name, _)| self.args.get(name).map(|value| (name.clone(), value.clone())))
            .collect();
        (query, Value::Object(variables))
    }
}

/// Executes delegated calls against backend services. The engine only ever
/// talks to backends through this trait; tests substitute in-process fakes.
#[async_trait]
pub trait QueryDelegate: Send + Sync {
    /// Runs one delegated call against the named service and returns the raw
    /// GraphQL response body.
    async fn delegate(
        &self,
        service: &str,
        request: &DelegatedRequest,
        context: &RequestContext,
    ) -> Result<Value, UpstreamError>;
}

/// HTTP transport: posts rendered calls to each service's routing URL.
pub struct HttpQueryDelegate {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

impl HttpQueryDelegate {
    pub fn new(endpoints: HashMap<String, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        HttpQueryDelegate { client, endpoints }
    }
}

#[async_trait]
impl QueryDelegate for HttpQueryDelegate {
    async fn delegate(
        &self,
        service: &str,
        request: &DelegatedRequest,
        context: &RequestContext,
    ) -> Result<Value, UpstreamError> {
        let url = self.endpoints.get(service).ok_or_else(|| UpstreamError {
            service: service.to_string(),
            message: "no routing url configured".to_string(),
        })?;
        let (query, variables) = request.render();
        debug!(service = %service, query_name = %request.query_name, "delegating to service");

        let mut http_request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&json!({ "query": query, "variables": variables }));
        for (name, value) in &context.forwarded_headers {
            http_request = http_request.header(name.as_str(), value.as_str());
        }

        let response = http_request.send().await.map_err(|send_error| UpstreamError {
            service: service.to_string(),
            message: format!("request failed: {send_error}"),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError {
                service: service.to_string(),
                message: format!("service responded with {status}"),
            });
        }
        response.json::<Value>().await.map_err(|body_error| UpstreamError {
            service: service.to_string(),
            message: format!("invalid response body: {body_error}"),
        })
    }
}
