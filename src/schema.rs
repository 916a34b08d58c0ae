use std::collections::BTreeMap;

use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, Type, TypeDefinition};

use crate::error::ConfigurationError;
use crate::opencrud;

/// One backend service's type system, parsed once at startup and indexed
/// for lookup during composition and execution.
pub struct ServiceSchema {
    name: String,
    sdl: String,
    query_root: String,
    mutation_root: String,
    types: BTreeMap<String, ObjectIndex>,
    query_fields: BTreeMap<String, FieldIndex>,
    mutation_fields: BTreeMap<String, FieldIndex>,
}

/// Field table of one object type.
#[derive(Clone, Debug, Default)]
pub struct ObjectIndex {
    fields: BTreeMap<String, FieldIndex>,
}

impl ObjectIndex {
    pub fn field(&self, name: &str) -> Option<&FieldIndex> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldIndex)> {
        self.fields.iter()
    }
}

/// Shape of one declared field: its innermost named type, whether any type
/// wrapper is a list, and its argument declarations in source order.
#[derive(Clone, Debug)]
pub struct FieldIndex {
    pub named_type: String,
    pub is_list: bool,
    /// `(name, SDL type)` pairs, e.g. `("where", "UserWhereInput")`.
    pub arguments: Vec<(String, String)>,
}

impl ServiceSchema {
    pub fn parse(name: impl Into<String>, sdl: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let sdl = sdl.into();
        let document = parse_schema::<String>(&sdl).map_err(|parse_error| {
            ConfigurationError::InvalidSchemaDocument {
                service: name.clone(),
                message: parse_error.to_string(),
            }
        })?;

        let mut query_root = "Query".to_string();
        let mut mutation_root = "Mutation".to_string();
        let mut types: BTreeMap<String, ObjectIndex> = BTreeMap::new();

        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(schema_definition) => {
                    if let Some(query) = &schema_definition.query {
                        query_root = query.clone();
                    }
                    if let Some(mutation) = &schema_definition.mutation {
                        mutation_root = mutation.clone();
                    }
                }
                Definition::TypeDefinition(TypeDefinition::Object(object)) => {
                    let mut fields = BTreeMap::new();
                    for field in &object.fields {
                        fields.insert(
                            field.name.clone(),
                            FieldIndex {
                                named_type: named_type_of(&field.field_type),
                                is_list: is_list_type(&field.field_type),
                                arguments: field
                                    .arguments
                                    .iter()
                                    .map(|argument| {
                                        (argument.name.clone(), type_text(&argument.value_type))
                                    })
                                    .collect(),
                            },
                        );
                    }
                    types.insert(object.name.clone(), ObjectIndex { fields });
                }
                _ => {}
            }
        }

        let query_fields = types
            .get(&query_root)
            .map(|object| object.fields.clone())
            .unwrap_or_default();
        let mutation_fields = types
            .get(&mutation_root)
            .map(|object| object.fields.clone())
            .unwrap_or_default();

        Ok(ServiceSchema {
            name,
            sdl,
            query_root,
            mutation_root,
            types,
            query_fields,
            mutation_fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn object_field(&self, type_name: &str, field: &str) -> Option<&FieldIndex> {
        self.types.get(type_name)?.field(field)
    }

    /// Iterates object types, skipping the root operation types whose fields
    /// are surfaced through [`Self::query_fields`] and [`Self::mutation_fields`].
    pub fn object_types(&self) -> impl Iterator<Item = (&String, &ObjectIndex)> {
        self.types
            .iter()
            .filter(|(name, _)| **name != self.query_root && **name != self.mutation_root)
    }

    pub fn query_field(&self, name: &str) -> Option<&FieldIndex> {
        self.query_fields.get(name)
    }

    pub fn mutation_field(&self, name: &str) -> Option<&FieldIndex> {
        self.mutation_fields.get(name)
    }

    pub fn query_fields(&self) -> impl Iterator<Item = (&String, &FieldIndex)> {
        self.query_fields.iter()
    }

    pub fn mutation_fields(&self) -> impl Iterator<Item = (&String, &FieldIndex)> {
        self.mutation_fields.iter()
    }

    /// Finds the single-record query for a type. The conventional name
    /// (`user` for `User`) wins when it fits; otherwise the first root field
    /// returning exactly one record of the type, in name order.
    pub fn single_query_for(&self, type_name: &str) -> Option<String> {
        self.query_returning(type_name, false)
    }

    /// Finds the list query for a type, preferring the conventional plural
    /// (`users` for `User`).
    pub fn list_query_for(&self, type_name: &str) -> Option<String> {
        self.query_returning(type_name, true)
    }

    fn query_returning(&self, type_name: &str, want_list: bool) -> Option<String> {
        let convention = if want_list {
            opencrud::list_query_name(type_name)
        } else {
            opencrud::single_query_name(type_name)
        };
        if let Some(index) = self.query_fields.get(&convention) {
            if index.named_type == type_name && index.is_list == want_list {
                return Some(convention);
            }
        }
        self.query_fields
            .iter()
            .find(|(_, index)| index.named_type == type_name && index.is_list == want_list)
            .map(|(name, _)| name.clone())
    }
}

/// Innermost named type of a possibly wrapped type: `[User!]!` -> `User`.
pub(crate) fn named_type_of(field_type: &Type<'_, String>) -> String {
    match field_type {
        Type::NamedType(name) => name.clone(),
        Type::ListType(inner) | Type::NonNullType(inner) => named_type_of(inner),
    }
}

/// Whether any wrapper of the type is a list.
pub(crate) fn is_list_type(field_type: &Type<'_, String>) -> bool {
    match field_type {
        Type::NamedType(_) => false,
        Type::ListType(_) => true,
        Type::NonNullType(inner) => is_list_type(inner),
    }
}

/// Renders a type reference back to SDL text: `[User!]!`.
pub(crate) fn type_text(field_type: &Type<'_, String>) -> String {
    match field_type {
        Type::NamedType(name) => name.clone(),
        Type::ListType(inner) => format!("[{}]", type_text(inner)),
        Type::NonNullType(inner) => format!("{}!", type_text(inner)),
    }
}
