use std::collections::BTreeMap;
use std::fmt::Write;

use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, TypeExtension};
use tracing::warn;

use crate::error::MergeError;
use crate::pushdown::FilterPushdownSpec;
use crate::resolver::{ResolverMap, StitchedField};
use crate::schema::{self, ServiceSchema};

/// Where a composed root field executes and what it returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRoute {
    pub service: String,
    pub named_type: String,
    pub is_list: bool,
}

/// The executable composed schema: the union of every subgraph's types and
/// root fields, the synthesized relation fields, their resolvers, and the
/// pushdown table. Immutable once composed; served via shared reference.
pub struct ComposedSchema {
    types: BTreeMap<String, BTreeMap<String, String>>,
    query_routes: BTreeMap<String, FieldRoute>,
    mutation_routes: BTreeMap<String, FieldRoute>,
    resolvers: ResolverMap,
    pushdowns: BTreeMap<String, Vec<FilterPushdownSpec>>,
    sdl: String,
}

impl ComposedSchema {
    pub fn query_route(&self, field: &str) -> Option<&FieldRoute> {
        self.query_routes.get(field)
    }

    pub fn mutation_route(&self, field: &str) -> Option<&FieldRoute> {
        self.mutation_routes.get(field)
    }

    /// Named result type of a field on a composed object type, including
    /// stitched fields.
    pub fn field_type(&self, type_name: &str, field: &str) -> Option<&str> {
        self.types
            .get(type_name)?
            .get(field)
            .map(String::as_str)
    }

    pub fn is_object_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn resolver(&self, type_name: &str, field: &str) -> Option<&StitchedField> {
        self.resolvers.get(type_name)?.get(field)
    }

    pub fn pushdowns_for(&self, query: &str) -> &[FilterPushdownSpec] {
        self.pushdowns.get(query).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The composed schema as SDL, for serving to clients and tooling.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub(crate) fn attach_pushdowns(&mut self, specs: Vec<FilterPushdownSpec>) {
        for spec in specs {
            self.pushdowns
                .entry(spec.query_name.clone())
                .or_default()
                .push(spec);
        }
    }
}

/// Merges subgraph schemas and an extension document into one composed
/// schema. The seam exists so composition can be tested, and eventually
/// swapped, independently of the stitching layers above it.
pub trait SchemaMerger {
    fn merge(
        &self,
        schemas: &[ServiceSchema],
        extensions: &str,
        resolvers: ResolverMap,
    ) -> Result<ComposedSchema, MergeError>;
}

/// Document-level merger: unions type and root-field definitions across
/// subgraphs, the last definition winning on name conflicts, then applies
/// `extend type` fragments on top.
pub struct SdlMerger;

impl SchemaMerger for SdlMerger {
    fn merge(
        &self,
        schemas: &[ServiceSchema],
        extensions: &str,
        resolvers: ResolverMap,
    ) -> Result<ComposedSchema, MergeError> {
        let mut types: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut query_routes: BTreeMap<String, FieldRoute> = BTreeMap::new();
        let mut mutation_routes: BTreeMap<String, FieldRoute> = BTreeMap::new();

        for schema in schemas {
            for (type_name, object) in schema.object_types() {
                let fields = object
                    .fields()
                    .map(|(field, index)| (field.clone(), index.named_type.clone()))
                    .collect();
                if types.insert(type_name.clone(), fields).is_some() {
                    warn!(
                        type_name = %type_name,
                        service = %schema.name(),
                        "type defined in multiple subgraphs, last definition wins"
                    );
                }
            }
            for (field, index) in schema.query_fields() {
                let route = FieldRoute {
                    service: schema.name().to_string(),
                    named_type: index.named_type.clone(),
                    is_list: index.is_list,
                };
                if query_routes.insert(field.clone(), route).is_some() {
                    warn!(
                        field = %field,
                        service = %schema.name(),
                        "root query field defined in multiple subgraphs, last definition wins"
                    );
                }
            }
            for (field, index) in schema.mutation_fields() {
                let route = FieldRoute {
                    service: schema.name().to_string(),
                    named_type: index.named_type.clone(),
                    is_list: index.is_list,
                };
                if mutation_routes.insert(field.clone(), route).is_some() {
                    warn!(
                        field = %field,
                        service = %schema.name(),
                        "root mutation field defined in multiple subgraphs, last definition wins"
                    );
                }
            }
        }

        if !extensions.trim().is_empty() {
            let document = parse_schema::<String>(extensions)
                .map_err(|parse_error| MergeError::InvalidExtension(parse_error.to_string()))?;
            for definition in &document.definitions {
                match definition {
                    Definition::TypeExtension(TypeExtension::Object(extension)) => {
                        let fields = types.get_mut(&extension.name).ok_or_else(|| {
                            MergeError::UnknownExtendedType {
                                type_name: extension.name.clone(),
                            }
                        })?;
                        for field in &extension.fields {
                            fields.insert(
                                field.name.clone(),
                                schema::named_type_of(&field.field_type),
                            );
                        }
                    }
                    // Input extensions widen filter inputs; they carry no
                    // executable fields and surface through the SDL only.
                    Definition::TypeExtension(_) => {}
                    _ => {}
                }
            }
        }

        let sdl = render_sdl(schemas, extensions);

        Ok(ComposedSchema {
            types,
            query_routes,
            mutation_routes,
            resolvers,
            pushdowns: BTreeMap::new(),
            sdl,
        })
    }
}

fn render_sdl(schemas: &[ServiceSchema], extensions: &str) -> String {
    let mut sdl = String::new();
    for schema in schemas {
        let _ = writeln!(sdl, "# subgraph: {}", schema.name());
        sdl.push_str(schema.sdl().trim());
        sdl.push_str("\n\n");
    }
    if !extensions.trim().is_empty() {
        sdl.push_str("# stitched extensions\n");
        sdl.push_str(extensions.trim());
        sdl.push('\n');
    }
    sdl
}
