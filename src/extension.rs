use std::fmt::Write;

use crate::opencrud;
use crate::pushdown::FilterPushdownSpec;
use crate::relation::{RelationDescriptor, RelationKind};

/// Renders the `extend type` fragments for a set of relations, one block per
/// descriptor in declaration order. The output is deterministic so composed
/// schemas can be diffed across restarts.
pub fn synthesize(descriptors: &[RelationDescriptor]) -> String {
    let mut sdl = String::new();
    for descriptor in descriptors {
        if !sdl.is_empty() {
            sdl.push('\n');
        }
        let _ = writeln!(sdl, "extend type {} {{", descriptor.owner_type);
        match descriptor.kind {
            RelationKind::One => {
                let required = if descriptor.nullable { "" } else { "!" };
                let _ = writeln!(
                    sdl,
                    "  {}: {}{}",
                    descriptor.field_name, descriptor.target_type, required
                );
            }
            RelationKind::Many => {
                let _ = writeln!(sdl, "  {}(", descriptor.field_name);
                let _ = writeln!(
                    sdl,
                    "    {}: {}",
                    opencrud::FILTER_ARG,
                    opencrud::where_input_name(&descriptor.target_type)
                );
                let _ = writeln!(
                    sdl,
                    "    {}: {}",
                    opencrud::ORDER_BY_ARG,
                    opencrud::order_by_input_name(&descriptor.target_type)
                );
                for (argument, argument_type) in opencrud::PAGINATION_ARGS {
                    let _ = writeln!(sdl, "    {argument}: {argument_type}");
                }
                let _ = writeln!(sdl, "  ): [{}!]!", descriptor.target_type);
            }
        }
        let _ = writeln!(sdl, "}}");
    }
    sdl
}

/// Renders the `extend input` fragments that open each pushdown's nested
/// filter key on the primary query's filter input.
pub fn synthesize_filter_extensions(specs: &[FilterPushdownSpec]) -> String {
    let mut sdl = String::new();
    for spec in specs {
        if !sdl.is_empty() {
            sdl.push('\n');
        }
        let _ = writeln!(
            sdl,
            "extend input {} {{",
            opencrud::where_input_name(&spec.local_type)
        );
        let _ = writeln!(
            sdl,
            "  {}: {}",
            spec.nested_filter_key,
            opencrud::where_input_name(&spec.resolution_type)
        );
        let _ = writeln!(sdl, "}}");
    }
    sdl
}
