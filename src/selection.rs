use std::collections::HashMap;

use graphql_parser::query::{
    Definition, Document, Field, FragmentDefinition, Selection, SelectionSet, TypeCondition,
    Value as AstValue, VariableDefinition,
};
use serde_json::{Map, Value};

use crate::merge::ComposedSchema;
use crate::schema::ServiceSchema;

/// Fragment definitions of one parsed document, by name.
pub type FragmentMap<'a> = HashMap<&'a str, &'a FragmentDefinition<'a, String>>;

pub fn fragment_map<'a>(document: &'a Document<'a, String>) -> FragmentMap<'a> {
    let mut fragments = HashMap::new();
    for definition in &document.definitions {
        if let Definition::Fragment(fragment) = definition {
            fragments.insert(fragment.name.as_str(), fragment);
        }
    }
    fragments
}

/// Resolves the operation's variables: provided values win, declaration
/// defaults fill the gaps.
pub fn resolve_variables(
    definitions: &[VariableDefinition<'_, String>],
    provided: Option<&Value>,
) -> Map<String, Value> {
    let mut variables = match provided {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let empty = Map::new();
    for definition in definitions {
        if !variables.contains_key(&definition.name) {
            if let Some(default) = &definition.default_value {
                variables.insert(definition.name.clone(), ast_value_to_json(default, &empty));
            }
        }
    }
    variables
}

/// Converts a query AST value to JSON, substituting variables. Enum values
/// become strings; the receiving service coerces them back through its own
/// argument types.
pub fn ast_value_to_json(value: &AstValue<'_, String>, variables: &Map<String, Value>) -> Value {
    match value {
        AstValue::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        AstValue::Int(number) => number.as_i64().map(Value::from).unwrap_or(Value::Null),
        AstValue::Float(float) => serde_json::Number::from_f64(*float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AstValue::String(string) => Value::String(string.clone()),
        AstValue::Boolean(boolean) => Value::Bool(*boolean),
        AstValue::Null => Value::Null,
        AstValue::Enum(name) => Value::String(name.clone()),
        AstValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| ast_value_to_json(item, variables))
                .collect(),
        ),
        AstValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.clone(), ast_value_to_json(item, variables)))
                .collect(),
        ),
    }
}

/// The caller's arguments on one field, as JSON.
pub fn arguments_to_json(
    field: &Field<'_, String>,
    variables: &Map<String, Value>,
) -> Map<String, Value> {
    field
        .arguments
        .iter()
        .map(|(name, value)| (name.clone(), ast_value_to_json(value, variables)))
        .collect()
}

/// Expands fragment spreads and matching inline fragments into a flat field
/// list for one object type, in document order.
pub fn flatten_fields<'a>(
    selection_set: &'a SelectionSet<'a, String>,
    fragments: &FragmentMap<'a>,
    type_name: &str,
) -> Vec<&'a Field<'a, String>> {
    let mut fields = Vec::new();
    collect_fields(selection_set, fragments, type_name, &mut fields);
    fields
}

fn collect_fields<'a>(
    selection_set: &'a SelectionSet<'a, String>,
    fragments: &FragmentMap<'a>,
    type_name: &str,
    out: &mut Vec<&'a Field<'a, String>>,
) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => out.push(field),
            Selection::InlineFragment(fragment) => {
                if condition_matches(fragment.type_condition.as_ref(), type_name) {
                    collect_fields(&fragment.selection_set, fragments, type_name, out);
                }
            }
            Selection::FragmentSpread(spread) => {
                if let Some(fragment) = fragments.get(spread.fragment_name.as_str()) {
                    if condition_matches(Some(&fragment.type_condition), type_name) {
                        collect_fields(&fragment.selection_set, fragments, type_name, out);
                    }
                }
            }
        }
    }
}

fn condition_matches(condition: Option<&TypeCondition<'_, String>>, type_name: &str) -> bool {
    match condition {
        None => true,
        Some(TypeCondition::On(on_type)) => on_type.as_str() == type_name,
    }
}

/// One field of a delegated selection, already rendered down to argument
/// literals so it can travel without the source document.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionNode {
    pub alias: Option<String>,
    pub name: String,
    /// `(name, GraphQL literal)` pairs.
    pub arguments: Vec<(String, String)>,
    pub children: Vec<SelectionNode>,
}

impl SelectionNode {
    pub fn field(name: &str) -> Self {
        SelectionNode {
            alias: None,
            name: name.to_string(),
            arguments: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Projects the caller's selection over one type onto what the owning
/// service can answer: stitched fields are replaced by the key fields their
/// resolvers read, fields the service does not know are dropped, and
/// everything else is forwarded with its arguments rendered to literals.
pub fn project<'a>(
    service: &ServiceSchema,
    composed: &ComposedSchema,
    type_name: &str,
    selection_set: &'a SelectionSet<'a, String>,
    fragments: &FragmentMap<'a>,
    variables: &Map<String, Value>,
) -> Vec<SelectionNode> {
    let mut nodes: Vec<SelectionNode> = Vec::new();

    for field in flatten_fields(selection_set, fragments, type_name) {
        if let Some(stitched) = composed.resolver(type_name, &field.name) {
            for required in &stitched.required_fields {
                push_unique(&mut nodes, SelectionNode::field(required));
            }
            continue;
        }
        if field.name == "__typename" {
            continue;
        }
        let Some(index) = service.object_field(type_name, &field.name) else {
            continue;
        };

        let children = if service.has_type(&index.named_type) {
            let children = project(
                service,
                composed,
                &index.named_type,
                &field.selection_set,
                fragments,
                variables,
            );
            // An object field whose entire sub-selection was stripped would
            // delegate as an empty braces pair; drop it instead.
            if children.is_empty() {
                continue;
            }
            children
        } else {
            Vec::new()
        };

        let node = SelectionNode {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field
                .arguments
                .iter()
                .map(|(name, value)| (name.clone(), render_ast_literal(value, variables)))
                .collect(),
            children,
        };
        push_unique(&mut nodes, node);
    }

    nodes
}

fn push_unique(nodes: &mut Vec<SelectionNode>, node: SelectionNode) {
    if !nodes
        .iter()
        .any(|existing| existing.response_key() == node.response_key())
    {
        nodes.push(node);
    }
}

/// Renders projected nodes as selection text: `{ id name owner_id }`.
pub fn render_selection(nodes: &[SelectionNode]) -> String {
    let mut out = String::new();
    write_selection(nodes, &mut out);
    out
}

fn write_selection(nodes: &[SelectionNode], out: &mut String) {
    out.push('{');
    for node in nodes {
        out.push(' ');
        if let Some(alias) = &node.alias {
            out.push_str(alias);
            out.push_str(": ");
        }
        out.push_str(&node.name);
        if !node.arguments.is_empty() {
            out.push('(');
            for (position, (name, literal)) in node.arguments.iter().enumerate() {
                if position > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                out.push_str(literal);
            }
            out.push(')');
        }
        if !node.children.is_empty() {
            out.push(' ');
            write_selection(&node.children, out);
        }
    }
    out.push_str(" }");
}

/// Renders an argument value as a GraphQL literal, substituting variables.
/// Enum names stay bare; everything arriving through a variable renders as
/// its JSON value.
fn render_ast_literal(value: &AstValue<'_, String>, variables: &Map<String, Value>) -> String {
    match value {
        AstValue::Variable(name) => {
            render_json_literal(variables.get(name.as_str()).unwrap_or(&Value::Null))
        }
        AstValue::Enum(name) => name.clone(),
        AstValue::Int(number) => number
            .as_i64()
            .map(|int| int.to_string())
            .unwrap_or_else(|| "null".to_string()),
        AstValue::Float(float) => float.to_string(),
        AstValue::String(string) => Value::String(string.clone()).to_string(),
        AstValue::Boolean(boolean) => boolean.to_string(),
        AstValue::Null => "null".to_string(),
        AstValue::List(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| render_ast_literal(item, variables))
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        AstValue::Object(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(key, item)| format!("{}: {}", key, render_ast_literal(item, variables)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

/// Renders a JSON value as a GraphQL input literal. JSON string quoting is
/// valid GraphQL string quoting, so scalars serialize directly.
pub fn render_json_literal(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_json_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(key, item)| format!("{}: {}", key, render_json_literal(item)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}
