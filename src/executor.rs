use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, join_all};
use graphql_parser::parse_query;
use graphql_parser::query::{Definition, Document, Field, OperationDefinition, SelectionSet};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::GraphQLRequest;
use crate::error::{GraphQLError, PathSegment, RelationResolutionError, UpstreamError};
use crate::merge::ComposedSchema;
use crate::opencrud;
use crate::pushdown::{self, FilterPushdownSpec};
use crate::relation::{RelationDescriptor, RelationKind};
use crate::resolver::{DelegationPlan, StitchedField};
use crate::schema::ServiceSchema;
use crate::selection::{self, FragmentMap, SelectionNode};
use crate::transport::{DelegatedRequest, OperationKind, QueryDelegate, RequestContext};

/// Serves a composed schema: routes root fields to their owning services,
/// resolves stitched relation fields, and rewrites pushdown filters before
/// delegating. Holds no mutable state; one executor serves all requests
/// concurrently.
pub struct Executor {
    schemas: HashMap<String, ServiceSchema>,
    composed: ComposedSchema,
    delegate: Arc<dyn QueryDelegate>,
}

impl Executor {
    pub fn new(
        schemas: Vec<ServiceSchema>,
        composed: ComposedSchema,
        delegate: Arc<dyn QueryDelegate>,
    ) -> Self {
        let schemas = schemas
            .into_iter()
            .map(|schema| (schema.name().to_string(), schema))
            .collect();
        Executor {
            schemas,
            composed,
            delegate,
        }
    }

    pub fn composed(&self) -> &ComposedSchema {
        &self.composed
    }

    /// Executes one request against the composed schema and returns a full
    /// GraphQL response body. Errors never escape as `Err`; they surface in
    /// the response's `errors` array.
    pub async fn execute(&self, request: &GraphQLRequest, context: &RequestContext) -> Value {
        let document = match parse_query::<String>(&request.query) {
            Ok(document) => document,
            Err(parse_error) => return error_response(format!("query parse error: {parse_error}")),
        };
        let fragments = selection::fragment_map(&document);
        let operation = match select_operation(&document, request.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(message) => return error_response(message),
        };

        match operation {
            OperationDefinition::SelectionSet(selection_set) => {
                let variables = selection::resolve_variables(&[], request.variables.as_ref());
                self.execute_roots(OperationKind::Query, selection_set, &fragments, &variables, context)
                    .await
            }
            OperationDefinition::Query(query) => {
                let variables =
                    selection::resolve_variables(&query.variable_definitions, request.variables.as_ref());
                self.execute_roots(
                    OperationKind::Query,
                    &query.selection_set,
                    &fragments,
                    &variables,
                    context,
                )
                .await
            }
            OperationDefinition::Mutation(mutation) => {
                let variables = selection::resolve_variables(
                    &mutation.variable_definitions,
                    request.variables.as_ref(),
                );
                self.execute_roots(
                    OperationKind::Mutation,
                    &mutation.selection_set,
                    &fragments,
                    &variables,
                    context,
                )
                .await
            }
            OperationDefinition::Subscription(_) => {
                error_response("subscriptions are not supported".to_string())
            }
        }
    }

    /// Root query fields resolve concurrently; mutation fields run one at a
    /// time in document order, as the GraphQL execution model requires.
    async fn execute_roots<'a>(
        &'a self,
        kind: OperationKind,
        selection_set: &'a SelectionSet<'a, String>,
        fragments: &'a FragmentMap<'a>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
    ) -> Value {
        let root_type = root_type_name(kind);
        let fields = selection::flatten_fields(selection_set, fragments, root_type);

        let mut data = Map::new();
        let mut errors = Vec::new();
        match kind {
            OperationKind::Query => {
                let resolutions = join_all(
                    fields
                        .iter()
                        .copied()
                        .map(|field| self.execute_root_field(kind, field, fragments, variables, context)),
                )
                .await;
                for (key, value, field_errors) in resolutions {
                    data.insert(key, value);
                    errors.extend(field_errors);
                }
            }
            OperationKind::Mutation => {
                for field in fields.iter().copied() {
                    let (key, value, field_errors) = self
                        .execute_root_field(kind, field, fragments, variables, context)
                        .await;
                    data.insert(key, value);
                    errors.extend(field_errors);
                }
            }
        }

        let mut response = json!({ "data": data });
        if !errors.is_empty() {
            response["errors"] = serde_json::to_value(&errors).unwrap_or_default();
        }
        response
    }

    async fn execute_root_field<'a>(
        &'a self,
        kind: OperationKind,
        field: &'a Field<'a, String>,
        fragments: &'a FragmentMap<'a>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
    ) -> (String, Value, Vec<GraphQLError>) {
        let key = response_key(field).to_string();
        let path = vec![PathSegment::Field(key.clone())];
        let root_type = root_type_name(kind);
        if field.name == "__typename" {
            return (key, Value::String(root_type.to_string()), Vec::new());
        }

        let route = match kind {
            OperationKind::Query => self.composed.query_route(&field.name),
            OperationKind::Mutation => self.composed.mutation_route(&field.name),
        };
        let Some(route) = route else {
            let message = format!("cannot query field `{}` on type `{root_type}`", field.name);
            return (key, Value::Null, vec![GraphQLError::new(message, &path)]);
        };

        let mut args = selection::arguments_to_json(field, variables);
        if kind == OperationKind::Query {
            if let Err(upstream) = self.apply_pushdowns(&field.name, &mut args, context).await {
                return (key, Value::Null, vec![GraphQLError::upstream(&upstream, &path)]);
            }
        }

        let Some(service) = self.schemas.get(&route.service) else {
            let message = format!("subgraph `{}` is not available", route.service);
            return (key, Value::Null, vec![GraphQLError::new(message, &path)]);
        };
        let request = self.delegated_request(
            kind,
            service,
            &field.name,
            args,
            &route.named_type,
            &field.selection_set,
            fragments,
            variables,
        );
        debug!(service = %route.service, field = %field.name, "delegating root field");

        let body = match self.delegate.delegate(&route.service, &request, context).await {
            Ok(body) => body,
            Err(upstream) => {
                return (key, Value::Null, vec![GraphQLError::upstream(&upstream, &path)]);
            }
        };
        let (value, remote_messages) = match unwrap_delegated(body, &route.service, &field.name) {
            Ok(unwrapped) => unwrapped,
            Err(upstream) => {
                return (key, Value::Null, vec![GraphQLError::upstream(&upstream, &path)]);
            }
        };
        let mut errors: Vec<GraphQLError> = remote_messages
            .into_iter()
            .map(|message| GraphQLError::remote(&route.service, message, &path))
            .collect();

        let (value, mut completion_errors) = self
            .complete_value(
                value,
                &route.named_type,
                &field.selection_set,
                fragments,
                variables,
                context,
                path,
            )
            .await;
        errors.append(&mut completion_errors);
        (key, value, errors)
    }

    /// Rewrites a root query's filter before delegation: for each pushdown
    /// whose nested key is present, resolve the sub-filter remotely to a key
    /// set, then replace the sub-filter with a membership constraint. An
    /// empty key set still constrains; a failed resolution aborts the field
    /// before the primary query runs.
    async fn apply_pushdowns(
        &self,
        query_name: &str,
        args: &mut Map<String, Value>,
        context: &RequestContext,
    ) -> Result<(), UpstreamError> {
        for spec in self.composed.pushdowns_for(query_name) {
            let Some(sub_filter) = pushdown::take_sub_filter(args, &spec.nested_filter_key) else {
                continue;
            };
            let keys = self.resolve_membership(spec, sub_filter, context).await?;
            pushdown::inject_membership(args, &spec.local_membership_field, keys);
        }
        Ok(())
    }

    /// Pushdown phase one: evaluate the nested sub-filter on its owning
    /// schema, selecting only the key field, and collect the matching keys.
    async fn resolve_membership(
        &self,
        spec: &FilterPushdownSpec,
        sub_filter: Value,
        context: &RequestContext,
    ) -> Result<Vec<Value>, UpstreamError> {
        let service = self
            .schemas
            .get(&spec.resolution_schema)
            .ok_or_else(|| UpstreamError {
                service: spec.resolution_schema.clone(),
                message: "subgraph is not available".to_string(),
            })?;

        let mut args = Map::new();
        args.insert(opencrud::FILTER_ARG.to_string(), sub_filter);
        let variable_declarations = service
            .query_field(&spec.resolution_query_name)
            .map(|index| {
                index
                    .arguments
                    .iter()
                    .filter(|(name, _)| args.contains_key(name.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let request = DelegatedRequest {
            kind: OperationKind::Query,
            query_name: spec.resolution_query_name.clone(),
            args,
            variables: variable_declarations,
            selection: format!("{{ {} }}", spec.resolution_result_key_field),
        };
        debug!(
            service = %spec.resolution_schema,
            query = %spec.resolution_query_name,
            "resolving pushdown membership"
        );

        let body = self
            .delegate
            .delegate(&spec.resolution_schema, &request, context)
            .await?;
        let (value, remote_messages) =
            unwrap_delegated(body, &spec.resolution_schema, &spec.resolution_query_name)?;
        // A partial phase-one result cannot produce a correct membership
        // set, so any remote error fails the pushdown.
        if !remote_messages.is_empty() {
            return Err(UpstreamError {
                service: spec.resolution_schema.clone(),
                message: remote_messages.join("; "),
            });
        }
        let records = match value {
            Value::Array(records) => records,
            Value::Null => Vec::new(),
            _ => {
                return Err(UpstreamError {
                    service: spec.resolution_schema.clone(),
                    message: format!("`{}` did not return a list", spec.resolution_query_name),
                });
            }
        };
        Ok(pushdown::collect_keys(&records, &spec.resolution_result_key_field))
    }

    /// Completes a delegated value against the caller's selection: lists
    /// complete item-wise (concurrently), objects field-wise, scalars pass
    /// through. Stitched fields encountered along the way delegate again.
    fn complete_value<'a>(
        &'a self,
        value: Value,
        type_name: &'a str,
        selection_set: &'a SelectionSet<'a, String>,
        fragments: &'a FragmentMap<'a>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'a, (Value, Vec<GraphQLError>)> {
        async move {
            match value {
                Value::Array(items) => {
                    let resolutions = join_all(items.into_iter().enumerate().map(|(index, item)| {
                        let mut item_path = path.clone();
                        item_path.push(PathSegment::Index(index));
                        self.complete_value(
                            item, type_name, selection_set, fragments, variables, context, item_path,
                        )
                    }))
                    .await;
                    let mut errors = Vec::new();
                    let items = resolutions
                        .into_iter()
                        .map(|(item, mut item_errors)| {
                            errors.append(&mut item_errors);
                            item
                        })
                        .collect();
                    (Value::Array(items), errors)
                }
                Value::Object(object) => {
                    // No sub-selection means the field is scalar-typed at
                    // this level (a JSON scalar, say); pass it through.
                    if selection_set.items.is_empty() {
                        return (Value::Object(object), Vec::new());
                    }
                    self.complete_object(
                        object, type_name, selection_set, fragments, variables, context, path,
                    )
                    .await
                }
                scalar => (scalar, Vec::new()),
            }
        }
        .boxed()
    }

    /// Builds the response object for one parent value. Sibling fields,
    /// stitched ones included, resolve concurrently; only requested fields
    /// appear in the output.
    async fn complete_object<'a>(
        &'a self,
        object: Map<String, Value>,
        type_name: &'a str,
        selection_set: &'a SelectionSet<'a, String>,
        fragments: &'a FragmentMap<'a>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
        path: Vec<PathSegment>,
    ) -> (Value, Vec<GraphQLError>) {
        let fields = selection::flatten_fields(selection_set, fragments, type_name);
        let resolutions = join_all(fields.iter().copied().map(|field| {
            self.complete_field(&object, type_name, field, fragments, variables, context, &path)
        }))
        .await;

        let mut out = Map::new();
        let mut errors = Vec::new();
        for (key, value, mut field_errors) in resolutions {
            out.insert(key, value);
            errors.append(&mut field_errors);
        }
        (Value::Object(out), errors)
    }

    async fn complete_field<'a>(
        &'a self,
        parent: &Map<String, Value>,
        type_name: &'a str,
        field: &'a Field<'a, String>,
        fragments: &'a FragmentMap<'a>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
        path: &[PathSegment],
    ) -> (String, Value, Vec<GraphQLError>) {
        let key = response_key(field).to_string();
        let mut field_path = path.to_vec();
        field_path.push(PathSegment::Field(key.clone()));

        if field.name == "__typename" {
            return (key, Value::String(type_name.to_string()), Vec::new());
        }
        if let Some(stitched) = self.composed.resolver(type_name, &field.name) {
            let (value, errors) = self
                .resolve_stitched(stitched, parent, field, fragments, variables, context, field_path)
                .await;
            return (key, value, errors);
        }

        let Some(field_type) = self.composed.field_type(type_name, &field.name) else {
            let message = format!("cannot query field `{}` on type `{type_name}`", field.name);
            return (key, Value::Null, vec![GraphQLError::new(message, &field_path)]);
        };
        let raw = parent.get(&key).cloned().unwrap_or(Value::Null);
        if self.composed.is_object_type(field_type) {
            let (value, errors) = self
                .complete_value(
                    raw,
                    field_type,
                    &field.selection_set,
                    fragments,
                    variables,
                    context,
                    field_path,
                )
                .await;
            (key, value, errors)
        } else {
            (key, raw, Vec::new())
        }
    }

    /// Resolves one stitched field on one parent value by delegating to the
    /// relation's target schema. Failures stay local to this field.
    async fn resolve_stitched<'a>(
        &'a self,
        stitched: &'a StitchedField,
        parent: &Map<String, Value>,
        field: &'a Field<'a, String>,
        fragments: &'a FragmentMap<'a>,
        variables: &'a Map<String, Value>,
        context: &'a RequestContext,
        path: Vec<PathSegment>,
    ) -> (Value, Vec<GraphQLError>) {
        let descriptor = &stitched.descriptor;
        let caller_args = selection::arguments_to_json(field, variables);

        let Some(plan) = stitched.plan(parent, &caller_args) else {
            // No usable key on the parent: an empty set for to-many, a
            // missing record for to-one.
            return match descriptor.kind {
                RelationKind::Many => (Value::Array(Vec::new()), Vec::new()),
                RelationKind::One if descriptor.nullable => (Value::Null, Vec::new()),
                RelationKind::One => {
                    (Value::Null, vec![resolution_error(descriptor, &Value::Null, &path)])
                }
            };
        };

        let target_schema = plan.target_schema.clone();
        let target_query_name = plan.target_query_name.clone();
        let Some(service) = self.schemas.get(&target_schema) else {
            let message = format!("subgraph `{target_schema}` is not available");
            return (Value::Null, vec![GraphQLError::new(message, &path)]);
        };
        let request =
            self.stitched_request(service, stitched, plan, &field.selection_set, fragments, variables);

        let body = match self.delegate.delegate(&target_schema, &request, context).await {
            Ok(body) => body,
            Err(upstream) => {
                warn!(
                    service = %target_schema,
                    field = %descriptor.field_name,
                    "stitched delegation failed: {upstream}"
                );
                return (Value::Null, vec![GraphQLError::upstream(&upstream, &path)]);
            }
        };
        let (value, remote_messages) = match unwrap_delegated(body, &target_schema, &target_query_name)
        {
            Ok(unwrapped) => unwrapped,
            Err(upstream) => return (Value::Null, vec![GraphQLError::upstream(&upstream, &path)]),
        };
        let mut errors: Vec<GraphQLError> = remote_messages
            .into_iter()
            .map(|message| GraphQLError::remote(&target_schema, message, &path))
            .collect();

        match descriptor.kind {
            RelationKind::One => match value {
                Value::Null => {
                    if !descriptor.nullable {
                        let key = parent
                            .get(&descriptor.local_key_field)
                            .cloned()
                            .unwrap_or(Value::Null);
                        errors.push(resolution_error(descriptor, &key, &path));
                    }
                    (Value::Null, errors)
                }
                found => {
                    let (completed, mut completion_errors) = self
                        .complete_value(
                            found,
                            &descriptor.target_type,
                            &field.selection_set,
                            fragments,
                            variables,
                            context,
                            path,
                        )
                        .await;
                    errors.append(&mut completion_errors);
                    (completed, errors)
                }
            },
            RelationKind::Many => match value {
                // A list relation is never null: no matches is an empty list.
                Value::Null => (Value::Array(Vec::new()), errors),
                Value::Array(items) => {
                    let (completed, mut completion_errors) = self
                        .complete_value(
                            Value::Array(items),
                            &descriptor.target_type,
                            &field.selection_set,
                            fragments,
                            variables,
                            context,
                            path,
                        )
                        .await;
                    errors.append(&mut completion_errors);
                    (completed, errors)
                }
                _ => {
                    let upstream = UpstreamError {
                        service: target_schema.clone(),
                        message: format!("`{target_query_name}` did not return a list"),
                    };
                    errors.push(GraphQLError::upstream(&upstream, &path));
                    (Value::Null, errors)
                }
            },
        }
    }

    fn delegated_request<'q>(
        &self,
        kind: OperationKind,
        service: &ServiceSchema,
        query_name: &str,
        args: Map<String, Value>,
        result_type: &str,
        selection_set: &'q SelectionSet<'q, String>,
        fragments: &FragmentMap<'q>,
        variables: &Map<String, Value>,
    ) -> DelegatedRequest {
        let selection = if selection_set.items.is_empty() {
            String::new()
        } else {
            let mut nodes = selection::project(
                service,
                &self.composed,
                result_type,
                selection_set,
                fragments,
                variables,
            );
            if nodes.is_empty() {
                nodes.push(SelectionNode::field("__typename"));
            }
            selection::render_selection(&nodes)
        };
        let declared = match kind {
            OperationKind::Query => service.query_field(query_name),
            OperationKind::Mutation => service.mutation_field(query_name),
        };
        let variable_declarations = declared
            .map(|index| {
                index
                    .arguments
                    .iter()
                    .filter(|(name, _)| args.contains_key(name.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        DelegatedRequest {
            kind,
            query_name: query_name.to_string(),
            args,
            variables: variable_declarations,
            selection,
        }
    }

    fn stitched_request<'q>(
        &self,
        service: &ServiceSchema,
        stitched: &StitchedField,
        plan: DelegationPlan,
        selection_set: &'q SelectionSet<'q, String>,
        fragments: &FragmentMap<'q>,
        variables: &Map<String, Value>,
    ) -> DelegatedRequest {
        let mut nodes = selection::project(
            service,
            &self.composed,
            &stitched.descriptor.target_type,
            selection_set,
            fragments,
            variables,
        );
        if nodes.is_empty() {
            nodes.push(SelectionNode::field("__typename"));
        }
        let variable_declarations = service
            .query_field(&plan.target_query_name)
            .map(|index| {
                index
                    .arguments
                    .iter()
                    .filter(|(name, _)| plan.remote_args.contains_key(name.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        DelegatedRequest {
            kind: OperationKind::Query,
            query_name: plan.target_query_name,
            args: plan.remote_args,
            variables: variable_declarations,
            selection: selection::render_selection(&nodes),
        }
    }
}

fn root_type_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => "Query",
        OperationKind::Mutation => "Mutation",
    }
}

fn response_key<'a>(field: &'a Field<'a, String>) -> &'a str {
    field.alias.as_deref().unwrap_or(&field.name)
}

fn select_operation<'a>(
    document: &'a Document<'a, String>,
    name: Option<&str>,
) -> Result<&'a OperationDefinition<'a, String>, String> {
    let mut operations = document.definitions.iter().filter_map(|definition| match definition {
        Definition::Operation(operation) => Some(operation),
        _ => None,
    });
    match name {
        Some(wanted) => operations
            .find(|operation| operation_name(operation) == Some(wanted))
            .ok_or_else(|| format!("unknown operation `{wanted}`")),
        None => {
            let first = operations
                .next()
                .ok_or_else(|| "document contains no operations".to_string())?;
            if operations.next().is_some() {
                return Err(
                    "operationName is required when the document defines multiple operations"
                        .to_string(),
                );
            }
            Ok(first)
        }
    }
}

fn operation_name<'a>(operation: &'a OperationDefinition<'a, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

/// Pulls the requested root field's value out of a raw response body,
/// separating errors the service reported alongside data from failures
/// that void the whole call.
fn unwrap_delegated(
    body: Value,
    service: &str,
    query_name: &str,
) -> Result<(Value, Vec<String>), UpstreamError> {
    let mut body = match body {
        Value::Object(map) => map,
        _ => {
            return Err(UpstreamError {
                service: service.to_string(),
                message: "malformed response body".to_string(),
            });
        }
    };
    let remote_messages = collect_messages(body.remove("errors"));
    match body.remove("data") {
        Some(Value::Object(mut data)) => Ok((
            data.remove(query_name).unwrap_or(Value::Null),
            remote_messages,
        )),
        _ => {
            let message = if remote_messages.is_empty() {
                "response contained no data".to_string()
            } else {
                remote_messages.join("; ")
            };
            Err(UpstreamError {
                service: service.to_string(),
                message,
            })
        }
    }
}

fn collect_messages(errors: Option<Value>) -> Vec<String> {
    match errors {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|entry| {
                entry
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream error")
                    .to_string()
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn resolution_error(
    descriptor: &RelationDescriptor,
    key: &Value,
    path: &[PathSegment],
) -> GraphQLError {
    let error = RelationResolutionError {
        owner_type: descriptor.owner_type.clone(),
        field: descriptor.field_name.clone(),
        target_type: descriptor.target_type.clone(),
        key: key.clone(),
    };
    GraphQLError::new(error.to_string(), path)
}

fn error_response(message: String) -> Value {
    json!({ "errors": [{ "message": message }] })
}
