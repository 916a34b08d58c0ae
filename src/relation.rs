use std::collections::HashSet;

use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::opencrud;
use crate::schema::ServiceSchema;

/// Whether a relation yields at most one related record or a list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    One,
    Many,
}

/// A relation declaration as written in the gateway configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RawRelation {
    /// Type that gains the stitched field.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Name of the stitched field.
    pub field: String,
    /// Field on the owning type that holds the connecting key.
    /// Defaults to the field name plus `_id`.
    #[serde(default)]
    pub from_field: Option<String>,
    /// Declare the field nullable and resolve missing records to null
    /// instead of an error. Only meaningful for to-one relations.
    #[serde(default)]
    pub nullable: bool,
    pub relation: RawRelationTarget,
}

/// The remote end of a relation declaration.
#[derive(Clone, Debug, Deserialize)]
pub struct RawRelationTarget {
    /// Defaults to `one`.
    #[serde(default)]
    pub kind: Option<RelationKind>,
    /// Subgraph that owns the related records.
    pub schema: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Key field on the target type. Defaults to `id`.
    #[serde(default)]
    pub field: Option<String>,
}

/// A fully defaulted and validated relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub owner_type: String,
    pub field_name: String,
    pub local_key_field: String,
    pub kind: RelationKind,
    pub nullable: bool,
    pub target_schema: String,
    pub target_type: String,
    pub target_key_field: String,
}

/// Applies defaults to every declaration and validates it against the
/// subgraph schemas. The first invalid declaration aborts.
pub fn normalize(
    raw: &[RawRelation],
    schemas: &[ServiceSchema],
) -> Result<Vec<RelationDescriptor>, ConfigurationError> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut descriptors = Vec::with_capacity(raw.len());

    for declaration in raw {
        let descriptor = RelationDescriptor {
            owner_type: declaration.type_name.clone(),
            field_name: declaration.field.clone(),
            local_key_field: declaration
                .from_field
                .clone()
                .unwrap_or_else(|| opencrud::default_local_key(&declaration.field)),
            kind: declaration.relation.kind.unwrap_or(RelationKind::One),
            nullable: declaration.nullable,
            target_schema: declaration.relation.schema.clone(),
            target_type: declaration.relation.type_name.clone(),
            target_key_field: declaration
                .relation
                .field
                .clone()
                .unwrap_or_else(|| opencrud::DEFAULT_KEY_FIELD.to_string()),
        };

        if !seen.insert((descriptor.owner_type.clone(), descriptor.field_name.clone())) {
            return Err(ConfigurationError::DuplicateRelation {
                owner_type: descriptor.owner_type,
                field: descriptor.field_name,
            });
        }
        if !schemas.iter().any(|schema| schema.has_type(&descriptor.owner_type)) {
            return Err(ConfigurationError::UnknownOwnerType {
                owner_type: descriptor.owner_type,
                field: descriptor.field_name,
            });
        }
        let target = schemas
            .iter()
            .find(|schema| schema.name() == descriptor.target_schema)
            .ok_or_else(|| ConfigurationError::UnknownTargetSchema {
                owner_type: descriptor.owner_type.clone(),
                field: descriptor.field_name.clone(),
                schema: descriptor.target_schema.clone(),
            })?;
        if !target.has_type(&descriptor.target_type) {
            return Err(ConfigurationError::UnknownTargetType {
                owner_type: descriptor.owner_type,
                field: descriptor.field_name,
                schema: descriptor.target_schema,
                target_type: descriptor.target_type,
            });
        }

        descriptors.push(descriptor);
    }

    Ok(descriptors)
}
