use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ConfigurationError;
use crate::opencrud;
use crate::relation::{RelationDescriptor, RelationKind};
use crate::schema::ServiceSchema;

/// Resolvers for stitched fields, keyed by owner type then field name.
pub type ResolverMap = BTreeMap<String, BTreeMap<String, StitchedField>>;

/// Everything needed to resolve one stitched field, fixed at composition
/// time. The target query is chosen here, once, so per-request planning is
/// a pure lookup.
#[derive(Clone, Debug)]
pub struct StitchedField {
    pub descriptor: RelationDescriptor,
    pub target_query_name: String,
    /// Fields of the owner type the resolver reads; injected into every
    /// delegated selection that produces parents for this field.
    pub required_fields: Vec<String>,
}

/// One delegated fetch, built per parent value and discarded after the call.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegationPlan {
    pub target_schema: String,
    pub target_query_name: String,
    pub remote_args: Map<String, Value>,
    pub required_local_fields: Vec<String>,
}

impl StitchedField {
    /// Builds the delegated fetch for one parent value. Returns `None` when
    /// the parent carries no usable connecting key.
    pub fn plan(
        &self,
        parent: &Map<String, Value>,
        caller_args: &Map<String, Value>,
    ) -> Option<DelegationPlan> {
        let key = match parent.get(&self.descriptor.local_key_field) {
            None | Some(Value::Null) => return None,
            Some(value) => value.clone(),
        };

        // To-one ignores caller arguments; to-many forwards them and layers
        // the key constraint on top of any caller-supplied filter.
        let mut remote_args = match self.descriptor.kind {
            RelationKind::One => Map::new(),
            RelationKind::Many => caller_args.clone(),
        };
        let mut filter = match remote_args.remove(opencrud::FILTER_ARG) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        filter.insert(self.descriptor.target_key_field.clone(), key);
        remote_args.insert(opencrud::FILTER_ARG.to_string(), Value::Object(filter));

        Some(DelegationPlan {
            target_schema: self.descriptor.target_schema.clone(),
            target_query_name: self.target_query_name.clone(),
            remote_args,
            required_local_fields: self.required_fields.clone(),
        })
    }
}

/// Binds each relation descriptor to a concrete query on its target schema.
/// Fails when the target schema exposes no query of the needed shape.
pub fn build_resolvers(
    descriptors: &[RelationDescriptor],
    schemas: &[ServiceSchema],
) -> Result<ResolverMap, ConfigurationError> {
    let mut resolvers: ResolverMap = BTreeMap::new();

    for descriptor in descriptors {
        let target = schemas
            .iter()
            .find(|schema| schema.name() == descriptor.target_schema)
            .ok_or_else(|| ConfigurationError::UnknownTargetSchema {
                owner_type: descriptor.owner_type.clone(),
                field: descriptor.field_name.clone(),
                schema: descriptor.target_schema.clone(),
            })?;

        let target_query_name = match descriptor.kind {
            RelationKind::One => target.single_query_for(&descriptor.target_type).ok_or_else(|| {
                ConfigurationError::MissingQueryOperation {
                    schema: descriptor.target_schema.clone(),
                    target_type: descriptor.target_type.clone(),
                    operation: "single-record",
                }
            })?,
            RelationKind::Many => target.list_query_for(&descriptor.target_type).ok_or_else(|| {
                ConfigurationError::MissingQueryOperation {
                    schema: descriptor.target_schema.clone(),
                    target_type: descriptor.target_type.clone(),
                    operation: "list",
                }
            })?,
        };

        let stitched = StitchedField {
            required_fields: vec![descriptor.local_key_field.clone()],
            target_query_name,
            descriptor: descriptor.clone(),
        };
        resolvers
            .entry(descriptor.owner_type.clone())
            .or_default()
            .insert(descriptor.field_name.clone(), stitched);
    }

    Ok(resolvers)
}
