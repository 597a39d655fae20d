//! GraphQL request normalization.
//!
//! Turns a raw GraphQL request (POST body or GET query parameters, single
//! or batched) into a canonical list of top-level fields with all
//! variables substituted and all fragments inlined. The canonical field
//! serialization doubles as the request-key payload and the dedup key.

use std::collections::{HashMap, HashSet};
use std::fmt;

use graphql_parser::query::{
    parse_query, Definition, Field, FragmentDefinition, OperationDefinition, Selection,
    SelectionSet, Value as AstValue,
};

use crate::error::GraphqlParseError;

/// A fully-substituted argument value.
///
/// The recursive sum of the JSON-ish values a GraphQL argument can take
/// after variable substitution. Enums are kept distinct from strings so
/// `OPEN` and `"OPEN"` never cross-match.
#[derive(Debug, Clone, PartialEq)]
pub enum GqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum(String),
    List(Vec<GqlValue>),
    Object(Vec<(String, GqlValue)>),
}

impl fmt::Display for GqlValue {
    /// GraphQL literal syntax, e.g. `{branch: "main", drafts: [1, 2]}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GqlValue::Null => f.write_str("null"),
            GqlValue::Bool(b) => write!(f, "{b}"),
            GqlValue::Int(n) => write!(f, "{n}"),
            GqlValue::Float(x) => write!(f, "{x}"),
            GqlValue::String(s) => write_quoted(f, s),
            GqlValue::Enum(e) => f.write_str(e),
            GqlValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            GqlValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// A top-level field with its substituted arguments in original order.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphqlField {
    pub name: String,
    pub args: Vec<(String, GqlValue)>,
}

impl GraphqlField {
    /// Canonical serialization: `name` or `name(arg: value, ...)`.
    #[must_use]
    pub fn canonical(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

/// Operation type of a top-level field. Subscriptions normalize to
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Query,
    Mutation,
}

impl OpType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Query => "query",
            OpType::Mutation => "mutation",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical request key for a normalized field:
/// `GRAPHQL <query|mutation> <field(args...)>`.
#[must_use]
pub fn request_key(op: OpType, field: &GraphqlField) -> String {
    format!("GRAPHQL {} {}", op, field.canonical())
}

/// Normalization output: deduplicated top-level fields, first-seen order
/// across the whole batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedGraphql {
    pub queries: Vec<GraphqlField>,
    pub mutations: Vec<GraphqlField>,
}

impl NormalizedGraphql {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.mutations.is_empty()
    }

    /// All fields with their operation type and canonical request key, in
    /// output order (queries first, then mutations).
    #[must_use]
    pub fn keys(&self) -> Vec<(OpType, &GraphqlField, String)> {
        self.queries
            .iter()
            .map(|f| (OpType::Query, f, request_key(OpType::Query, f)))
            .chain(
                self.mutations
                    .iter()
                    .map(|f| (OpType::Mutation, f, request_key(OpType::Mutation, f))),
            )
            .collect()
    }

    fn push(&mut self, op: OpType, field: GraphqlField, seen: &mut HashSet<String>) {
        let key = request_key(op, &field);
        if seen.insert(key) {
            match op {
                OpType::Query => self.queries.push(field),
                OpType::Mutation => self.mutations.push(field),
            }
        }
    }
}

/// One `{query, variables?, operationName?}` unit of a request.
struct RawUnit {
    query: String,
    variables: Option<serde_json::Map<String, serde_json::Value>>,
    operation_name: Option<String>,
}

/// Normalize a POST request body: a single request object or a batch
/// array of them.
pub fn normalize_post_body(body: &str) -> Result<NormalizedGraphql, GraphqlParseError> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| GraphqlParseError::Json(e.to_string()))?;

    let units = match json {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(unit_from_json)
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![unit_from_json(other)?],
    };

    let mut out = NormalizedGraphql::default();
    let mut seen = HashSet::new();
    for unit in &units {
        normalize_unit(unit, &mut out, &mut seen)?;
    }
    Ok(out)
}

/// Normalize a GET request from its raw query string (`query`,
/// `variables` as encoded JSON, `operationName`).
pub fn normalize_get_query(raw_query: &str) -> Result<NormalizedGraphql, GraphqlParseError> {
    let mut query = None;
    let mut variables = None;
    let mut operation_name = None;

    for (name, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        match name.as_ref() {
            "query" => query = Some(value.into_owned()),
            "variables" if !value.is_empty() => {
                let parsed: serde_json::Value = serde_json::from_str(&value)
                    .map_err(|e| GraphqlParseError::Json(e.to_string()))?;
                variables = Some(variables_map(parsed)?);
            }
            "operationName" if !value.is_empty() => operation_name = Some(value.into_owned()),
            _ => {}
        }
    }

    let unit = RawUnit {
        query: query.ok_or(GraphqlParseError::MissingQuery)?,
        variables: variables.flatten(),
        operation_name,
    };

    let mut out = NormalizedGraphql::default();
    let mut seen = HashSet::new();
    normalize_unit(&unit, &mut out, &mut seen)?;
    Ok(out)
}

fn unit_from_json(value: serde_json::Value) -> Result<RawUnit, GraphqlParseError> {
    let serde_json::Value::Object(mut obj) = value else {
        return Err(GraphqlParseError::Json(
            "request must be an object or an array of objects".to_string(),
        ));
    };

    let query = match obj.remove("query") {
        Some(serde_json::Value::String(q)) => q,
        _ => return Err(GraphqlParseError::MissingQuery),
    };
    let variables = match obj.remove("variables") {
        Some(v) => variables_map(v)?,
        None => None,
    };
    let operation_name = match obj.remove("operationName") {
        Some(serde_json::Value::String(n)) => Some(n),
        Some(serde_json::Value::Null) | None => None,
        Some(_) => {
            return Err(GraphqlParseError::Json(
                "operationName must be a string".to_string(),
            ))
        }
    };

    Ok(RawUnit {
        query,
        variables,
        operation_name,
    })
}

fn variables_map(
    value: serde_json::Value,
) -> Result<Option<serde_json::Map<String, serde_json::Value>>, GraphqlParseError> {
    match value {
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::Null => Ok(None),
        _ => Err(GraphqlParseError::Json(
            "variables must be an object".to_string(),
        )),
    }
}

fn normalize_unit(
    unit: &RawUnit,
    out: &mut NormalizedGraphql,
    seen: &mut HashSet<String>,
) -> Result<(), GraphqlParseError> {
    let doc = parse_query::<String>(&unit.query)
        .map_err(|e| GraphqlParseError::Syntax(e.to_string()))?;

    let mut fragments: HashMap<String, FragmentDefinition<'_, String>> = HashMap::new();
    let mut operations = Vec::new();
    for def in doc.definitions {
        match def {
            Definition::Fragment(frag) => {
                fragments.insert(frag.name.clone(), frag);
            }
            Definition::Operation(op) => operations.push(op),
        }
    }
    if operations.is_empty() {
        return Err(GraphqlParseError::NoOperations);
    }

    let selected: Vec<&OperationDefinition<'_, String>> = match &unit.operation_name {
        Some(wanted) => {
            let selected: Vec<_> = operations
                .iter()
                .filter(|op| operation_name(op) == Some(wanted.as_str()))
                .collect();
            if selected.is_empty() {
                return Err(GraphqlParseError::UnknownOperation(wanted.clone()));
            }
            selected
        }
        None => operations.iter().collect(),
    };

    for op in selected {
        let (op_type, selection_set) = operation_parts(op);
        let mut fields = Vec::new();
        collect_fields(selection_set, &fragments, &mut Vec::new(), &mut fields)?;
        for field in fields {
            let args = field
                .arguments
                .iter()
                .map(|(name, value)| {
                    (name.clone(), substitute(value, unit.variables.as_ref()))
                })
                .collect();
            out.push(
                op_type,
                GraphqlField {
                    name: field.name.clone(),
                    args,
                },
                seen,
            );
        }
    }
    Ok(())
}

fn operation_name<'a>(op: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match op {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

fn operation_parts<'a, 'd>(
    op: &'a OperationDefinition<'d, String>,
) -> (OpType, &'a SelectionSet<'d, String>) {
    match op {
        OperationDefinition::SelectionSet(set) => (OpType::Query, set),
        OperationDefinition::Query(q) => (OpType::Query, &q.selection_set),
        OperationDefinition::Mutation(m) => (OpType::Mutation, &m.selection_set),
        // Subscriptions are read-shaped; treat them as queries.
        OperationDefinition::Subscription(s) => (OpType::Query, &s.selection_set),
    }
}

/// Expand a selection set into its top-level fields, inlining fragment
/// spreads and inline fragments recursively. The visiting stack catches
/// fragment cycles.
fn collect_fields<'a, 'd>(
    set: &'a SelectionSet<'d, String>,
    fragments: &'a HashMap<String, FragmentDefinition<'d, String>>,
    visiting: &mut Vec<String>,
    out: &mut Vec<&'a Field<'d, String>>,
) -> Result<(), GraphqlParseError> {
    for selection in &set.items {
        match selection {
            Selection::Field(field) => out.push(field),
            Selection::FragmentSpread(spread) => {
                if visiting.contains(&spread.fragment_name) {
                    return Err(GraphqlParseError::FragmentCycle(
                        spread.fragment_name.clone(),
                    ));
                }
                let frag = fragments.get(&spread.fragment_name).ok_or_else(|| {
                    GraphqlParseError::UnknownFragment(spread.fragment_name.clone())
                })?;
                visiting.push(spread.fragment_name.clone());
                collect_fields(&frag.selection_set, fragments, visiting, out)?;
                visiting.pop();
            }
            Selection::InlineFragment(inline) => {
                collect_fields(&inline.selection_set, fragments, visiting, out)?;
            }
        }
    }
    Ok(())
}

/// Substitute variables into an argument value. A variable missing from
/// the request's variables map resolves to `null`.
fn substitute(
    value: &AstValue<'_, String>,
    variables: Option<&serde_json::Map<String, serde_json::Value>>,
) -> GqlValue {
    match value {
        AstValue::Variable(name) => variables
            .and_then(|vars| vars.get(name.as_str()))
            .map(json_to_gql)
            .unwrap_or(GqlValue::Null),
        AstValue::Int(n) => GqlValue::Int(n.as_i64().unwrap_or_default()),
        AstValue::Float(x) => GqlValue::Float(*x),
        AstValue::String(s) => GqlValue::String(s.clone()),
        AstValue::Boolean(b) => GqlValue::Bool(*b),
        AstValue::Null => GqlValue::Null,
        AstValue::Enum(e) => GqlValue::Enum(e.clone()),
        AstValue::List(items) => {
            GqlValue::List(items.iter().map(|v| substitute(v, variables)).collect())
        }
        AstValue::Object(map) => GqlValue::Object(
            map.iter()
                .map(|(name, v)| (name.clone(), substitute(v, variables)))
                .collect(),
        ),
    }
}

fn json_to_gql(value: &serde_json::Value) -> GqlValue {
    match value {
        serde_json::Value::Null => GqlValue::Null,
        serde_json::Value::Bool(b) => GqlValue::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => GqlValue::Int(i),
            None => GqlValue::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => GqlValue::String(s.clone()),
        serde_json::Value::Array(items) => GqlValue::List(items.iter().map(json_to_gql).collect()),
        serde_json::Value::Object(map) => GqlValue::Object(
            map.iter()
                .map(|(name, v)| (name.clone(), json_to_gql(v)))
                .collect(),
        ),
    }
}
