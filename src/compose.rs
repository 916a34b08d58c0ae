use tracing::info;

use crate::error::CompositionError;
use crate::extension;
use crate::merge::{ComposedSchema, SchemaMerger};
use crate::pushdown::{self, RawPushdown};
use crate::relation::{self, RawRelation};
use crate::resolver;
use crate::schema::ServiceSchema;

/// Runs the composition pipeline: normalize declarations, synthesize
/// extensions, build resolvers, merge. Any stage error aborts the whole
/// composition; a gateway never serves a partially stitched schema.
pub fn compose(
    schemas: &[ServiceSchema],
    relations: &[RawRelation],
    pushdowns: &[RawPushdown],
    merger: &dyn SchemaMerger,
) -> Result<ComposedSchema, CompositionError> {
    let descriptors = relation::normalize(relations, schemas)?;
    let specs = pushdown::normalize(pushdowns, schemas)?;

    let mut extensions = extension::synthesize(&descriptors);
    let filter_extensions = extension::synthesize_filter_extensions(&specs);
    if !filter_extensions.is_empty() {
        if !extensions.is_empty() {
            extensions.push('\n');
        }
        extensions.push_str(&filter_extensions);
    }

    let resolvers = resolver::build_resolvers(&descriptors, schemas)?;

    let mut composed = merger.merge(schemas, &extensions, resolvers)?;
    let pushdown_count = specs.len();
    composed.attach_pushdowns(specs);

    info!(
        subgraphs = schemas.len(),
        relations = descriptors.len(),
        pushdowns = pushdown_count,
        "composed stitched schema"
    );
    Ok(composed)
}
