//! Grant/rejection pattern matching.
//!
//! Patterns are persisted as strings and re-parsed at match time; the
//! string form is the canonical representation. Two dialects share one
//! entry point, dispatched on the method token:
//!
//! - HTTP: `METHOD <path>` where a path segment `*` matches exactly one
//!   segment and a bare `*` path matches everything. Query strings are
//!   never part of a request key.
//! - GraphQL: `GRAPHQL <query|mutation> <*|field-expression>` where the
//!   variable `$ANY` matches any argument value. Any other variable in a
//!   pattern is an error surfaced to the caller, never a silent match.
//!
//! The dialect intentionally stops there: no regexes, no prefix forms.
//! A persisted pattern should be auditable at a glance.

use graphql_parser::query::{
    parse_query, Definition, OperationDefinition, Selection, Value as AstValue,
};

use crate::error::{CoreError, Result};

/// Method token that switches a pattern into the GraphQL dialect.
pub const GRAPHQL_METHOD: &str = "GRAPHQL";

/// Match a stored pattern against a canonical request key.
///
/// Exact string equality is the fast path. Returns an error for a
/// malformed pattern or a pattern variable other than `$ANY`; callers
/// treat errored patterns as non-matching and log the diagnostic.
pub fn matches(pattern: &str, request_key: &str) -> Result<bool> {
    if pattern == request_key {
        return Ok(true);
    }

    let (p_method, p_rest) = split_method(pattern)?;
    let Some((k_method, k_rest)) = request_key.split_once(' ') else {
        return Ok(false);
    };
    if p_method != k_method {
        return Ok(false);
    }

    if p_method == GRAPHQL_METHOD {
        matches_graphql(pattern, p_rest, k_rest)
    } else {
        Ok(matches_http_path(p_rest, k_rest))
    }
}

/// Validate a pattern without matching it against anything.
///
/// Used when loading or inspecting a config so that a typo'd pattern is
/// reported up front instead of silently never matching.
pub fn validate(pattern: &str) -> Result<()> {
    let (method, rest) = split_method(pattern)?;
    if method != GRAPHQL_METHOD {
        return Ok(());
    }

    let (op, expr) = split_graphql_rest(pattern, rest)?;
    if op != "query" && op != "mutation" {
        return Err(malformed(pattern, "operation must be 'query' or 'mutation'"));
    }
    if expr == "*" {
        return Ok(());
    }
    let field = parse_field_expr(expr).map_err(|reason| malformed(pattern, &reason))?;
    for (_, value) in &field.args {
        check_variables(value)?;
    }
    Ok(())
}

fn split_method(pattern: &str) -> Result<(&str, &str)> {
    match pattern.split_once(' ') {
        Some((method, rest)) if !method.is_empty() && !rest.is_empty() => Ok((method, rest)),
        _ => Err(malformed(pattern, "expected 'METHOD <resource>'")),
    }
}

fn split_graphql_rest<'a>(pattern: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    match rest.split_once(' ') {
        Some((op, expr)) if !expr.is_empty() => Ok((op, expr)),
        _ => Err(malformed(
            pattern,
            "expected 'GRAPHQL <query|mutation> <field>'",
        )),
    }
}

fn malformed(pattern: &str, reason: &str) -> CoreError {
    CoreError::MalformedPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// HTTP dialect
// ---------------------------------------------------------------------------

/// Segment-wise glob match. `*` as the whole pattern path matches any
/// path; `*` as a segment matches exactly one segment.
fn matches_http_path(pattern_path: &str, request_path: &str) -> bool {
    if pattern_path == "*" {
        return true;
    }

    let pattern_segs: Vec<&str> = segments(pattern_path);
    let request_segs: Vec<&str> = segments(request_path);
    if pattern_segs.len() != request_segs.len() {
        return false;
    }
    pattern_segs
        .iter()
        .zip(&request_segs)
        .all(|(p, r)| *p == "*" || p == r)
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

// ---------------------------------------------------------------------------
// GraphQL dialect
// ---------------------------------------------------------------------------

fn matches_graphql(pattern: &str, p_rest: &str, k_rest: &str) -> Result<bool> {
    let (p_op, p_expr) = split_graphql_rest(pattern, p_rest)?;
    if p_op != "query" && p_op != "mutation" {
        return Err(malformed(pattern, "operation must be 'query' or 'mutation'"));
    }

    let Some((k_op, k_expr)) = k_rest.split_once(' ') else {
        return Ok(false);
    };
    if p_op != k_op {
        return Ok(false);
    }
    if p_expr == "*" {
        return Ok(true);
    }

    let p_field = parse_field_expr(p_expr).map_err(|reason| malformed(pattern, &reason))?;
    // Request keys are generated from normalized fields; one that fails to
    // parse cannot match anything.
    let Ok(k_field) = parse_field_expr(k_expr) else {
        return Ok(false);
    };
    field_matches(&p_field, &k_field)
}

/// A field expression lowered out of the GraphQL AST for matching.
struct MatchField {
    name: String,
    args: Vec<(String, MatchValue)>,
}

/// Argument value lowered for matching. `Any` is the `$ANY` wildcard;
/// `Var` is any other variable and errors when reached.
enum MatchValue {
    Any,
    Var(String),
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Enum(String),
    List(Vec<MatchValue>),
    Object(Vec<(String, MatchValue)>),
}

/// Parse a field expression like `createIssue(input: {title: $ANY})` by
/// wrapping it in a selection set and running the GraphQL grammar over it.
fn parse_field_expr(expr: &str) -> std::result::Result<MatchField, String> {
    let wrapped = format!("{{ {expr} }}");
    let doc =
        parse_query::<String>(&wrapped).map_err(|e| format!("invalid field expression: {e}"))?;

    let mut defs = doc.definitions.into_iter();
    let set = match defs.next() {
        Some(Definition::Operation(OperationDefinition::SelectionSet(set))) => set,
        _ => return Err("expected a bare field expression".to_string()),
    };
    if defs.next().is_some() {
        return Err("expected a single field expression".to_string());
    }

    let mut items = set.items.into_iter();
    let field = match items.next() {
        Some(Selection::Field(field)) => field,
        _ => return Err("expected a field".to_string()),
    };
    if items.next().is_some() {
        return Err("expected exactly one field".to_string());
    }
    if !field.selection_set.items.is_empty() {
        return Err("sub-selections are not part of field expressions".to_string());
    }

    Ok(MatchField {
        name: field.name,
        args: field
            .arguments
            .into_iter()
            .map(|(name, value)| (name, lower_value(value)))
            .collect(),
    })
}

fn lower_value(value: AstValue<'_, String>) -> MatchValue {
    match value {
        AstValue::Variable(name) if name == "ANY" => MatchValue::Any,
        AstValue::Variable(name) => MatchValue::Var(name),
        AstValue::Int(n) => MatchValue::Int(n.as_i64().unwrap_or_default()),
        AstValue::Float(f) => MatchValue::Float(f),
        AstValue::String(s) => MatchValue::Str(s),
        AstValue::Boolean(b) => MatchValue::Bool(b),
        AstValue::Null => MatchValue::Null,
        AstValue::Enum(e) => MatchValue::Enum(e),
        AstValue::List(items) => MatchValue::List(items.into_iter().map(lower_value).collect()),
        AstValue::Object(map) => MatchValue::Object(
            map.into_iter()
                .map(|(name, value)| (name, lower_value(value)))
                .collect(),
        ),
    }
}

/// Field names must be equal and argument counts identical; every pattern
/// argument must find a same-named request argument whose value matches.
fn field_matches(pattern: &MatchField, request: &MatchField) -> Result<bool> {
    if pattern.name != request.name || pattern.args.len() != request.args.len() {
        return Ok(false);
    }
    for (name, p_value) in &pattern.args {
        let Some((_, r_value)) = request.args.iter().find(|(n, _)| n == name) else {
            return Ok(false);
        };
        if !value_matches(p_value, r_value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn value_matches(pattern: &MatchValue, request: &MatchValue) -> Result<bool> {
    match (pattern, request) {
        (MatchValue::Any, _) => Ok(true),
        (MatchValue::Var(name), _) => Err(CoreError::UnknownPatternVariable { name: name.clone() }),
        (MatchValue::Null, MatchValue::Null) => Ok(true),
        (MatchValue::Bool(a), MatchValue::Bool(b)) => Ok(a == b),
        (MatchValue::Int(a), MatchValue::Int(b)) => Ok(a == b),
        (MatchValue::Float(a), MatchValue::Float(b)) => Ok(a == b),
        (MatchValue::Str(a), MatchValue::Str(b)) => Ok(a == b),
        (MatchValue::Enum(a), MatchValue::Enum(b)) => Ok(a == b),
        (MatchValue::List(a), MatchValue::List(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (av, bv) in a.iter().zip(b) {
                if !value_matches(av, bv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (MatchValue::Object(a), MatchValue::Object(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (name, av) in a {
                let Some((_, bv)) = b.iter().find(|(n, _)| n == name) else {
                    return Ok(false);
                };
                if !value_matches(av, bv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn check_variables(value: &MatchValue) -> Result<()> {
    match value {
        MatchValue::Var(name) => Err(CoreError::UnknownPatternVariable { name: name.clone() }),
        MatchValue::List(items) => items.iter().try_for_each(check_variables),
        MatchValue::Object(fields) => fields.iter().try_for_each(|(_, v)| check_variables(v)),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_fast_path() {
        assert!(matches("GET /repos/acme/widget", "GET /repos/acme/widget").unwrap());
        assert!(matches("GRAPHQL query user", "GRAPHQL query user").unwrap());
    }

    #[test]
    fn test_http_wildcard_segment() {
        assert!(matches("GET /repos/*/actions", "GET /repos/acme/actions").unwrap());
        assert!(!matches("GET /repos/*/actions", "GET /repos/a/b/actions").unwrap());
        assert!(!matches("GET /repos/*/actions", "POST /repos/acme/actions").unwrap());
    }

    #[test]
    fn test_http_multiple_wildcards() {
        assert!(matches("GET /repos/*/*/actions", "GET /repos/a/b/actions").unwrap());
        assert!(!matches("GET /repos/*/*/actions", "GET /repos/a/actions").unwrap());
    }

    #[test]
    fn test_http_catch_all() {
        assert!(matches("GET *", "GET /").unwrap());
        assert!(matches("GET *", "GET /any/deep/path").unwrap());
        assert!(!matches("GET *", "POST /any").unwrap());
    }

    #[test]
    fn test_http_segment_count_must_match() {
        assert!(!matches("GET /a/b", "GET /a/b/c").unwrap());
        assert!(!matches("GET /a/b/c", "GET /a/b").unwrap());
    }

    #[test]
    fn test_http_method_verbatim() {
        assert!(!matches("get /a", "GET /a").unwrap());
    }

    #[test]
    fn test_graphql_star_matches_op_type() {
        assert!(matches("GRAPHQL query *", "GRAPHQL query user").unwrap());
        assert!(matches("GRAPHQL query *", "GRAPHQL query user(id: 1)").unwrap());
        assert!(!matches("GRAPHQL query *", "GRAPHQL mutation deleteUser(id: 1)").unwrap());
    }

    #[test]
    fn test_graphql_exact_args() {
        assert!(matches(
            "GRAPHQL mutation deleteUser(id: \"1\")",
            "GRAPHQL mutation deleteUser(id: \"1\")"
        )
        .unwrap());
        assert!(!matches(
            "GRAPHQL mutation deleteUser(id: \"1\")",
            "GRAPHQL mutation deleteUser(id: \"2\")"
        )
        .unwrap());
    }

    #[test]
    fn test_graphql_any_wildcard() {
        assert!(matches(
            "GRAPHQL mutation deleteUser(id: $ANY)",
            "GRAPHQL mutation deleteUser(id: \"1\")"
        )
        .unwrap());
        assert!(matches(
            "GRAPHQL mutation deleteUser(id: $ANY)",
            "GRAPHQL mutation deleteUser(id: 42)"
        )
        .unwrap());
    }

    #[test]
    fn test_graphql_any_in_nested_object() {
        let pattern =
            "GRAPHQL mutation createPullRequest(input: {branch: \"main\", title: $ANY})";
        assert!(matches(
            pattern,
            "GRAPHQL mutation createPullRequest(input: {branch: \"main\", title: \"x\"})"
        )
        .unwrap());
        assert!(!matches(
            pattern,
            "GRAPHQL mutation createPullRequest(input: {branch: \"dev\", title: \"x\"})"
        )
        .unwrap());
    }

    #[test]
    fn test_graphql_argument_count_must_match() {
        assert!(!matches(
            "GRAPHQL mutation createUser(name: $ANY)",
            "GRAPHQL mutation createUser(name: \"a\", admin: true)"
        )
        .unwrap());
        assert!(!matches(
            "GRAPHQL mutation createUser(name: $ANY, admin: $ANY)",
            "GRAPHQL mutation createUser(name: \"a\")"
        )
        .unwrap());
    }

    #[test]
    fn test_graphql_unknown_variable_is_error() {
        let err = matches(
            "GRAPHQL mutation createUser(name: $FOO)",
            "GRAPHQL mutation createUser(name: \"a\")",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnknownPatternVariable { ref name } if name == "FOO"
        ));
    }

    #[test]
    fn test_graphql_scalar_kinds_do_not_cross_match() {
        assert!(!matches(
            "GRAPHQL query user(id: \"1\")",
            "GRAPHQL query user(id: 1)"
        )
        .unwrap());
        // An enum literal is not a string literal.
        assert!(!matches(
            "GRAPHQL query search(state: OPEN)",
            "GRAPHQL query search(state: \"OPEN\")"
        )
        .unwrap());
    }

    #[test]
    fn test_graphql_string_dollar_any_is_not_a_wildcard() {
        assert!(matches(
            "GRAPHQL query user(tag: \"$ANY\")",
            "GRAPHQL query user(tag: \"$ANY\")"
        )
        .unwrap());
        assert!(!matches(
            "GRAPHQL query user(tag: \"$ANY\")",
            "GRAPHQL query user(tag: \"other\")"
        )
        .unwrap());
    }

    #[test]
    fn test_graphql_list_matching() {
        assert!(matches(
            "GRAPHQL mutation addLabels(ids: [1, $ANY])",
            "GRAPHQL mutation addLabels(ids: [1, 2])"
        )
        .unwrap());
        assert!(!matches(
            "GRAPHQL mutation addLabels(ids: [1, $ANY])",
            "GRAPHQL mutation addLabels(ids: [1, 2, 3])"
        )
        .unwrap());
    }

    #[test]
    fn test_malformed_pattern_is_error() {
        assert!(matches("GET", "GET /a").is_err());
        assert!(matches("GRAPHQL query", "GRAPHQL query user").is_err());
        assert!(matches("GRAPHQL subscription user", "GRAPHQL query user").is_err());
        assert!(matches("GRAPHQL query user(", "GRAPHQL query user").is_err());
    }

    #[test]
    fn test_reflexivity_of_literal_patterns() {
        // A pattern without wildcards matches exactly itself.
        let keys = [
            "GET /repos/acme/widget",
            "DELETE /repos/acme/widget/branches/main",
            "GRAPHQL mutation deleteUser(id: \"1\")",
            "GRAPHQL query viewer",
        ];
        for pattern in &keys {
            for key in &keys {
                assert_eq!(matches(pattern, key).unwrap(), pattern == key);
            }
        }
    }

    #[test]
    fn test_validate() {
        assert!(validate("GET /a/*/c").is_ok());
        assert!(validate("GRAPHQL query *").is_ok());
        assert!(validate("GRAPHQL mutation createUser(name: $ANY)").is_ok());
        assert!(validate("GRAPHQL mutation createUser(name: $FOO)").is_err());
        assert!(validate("GET").is_err());
        assert!(validate("GRAPHQL frobnicate *").is_err());
    }
}
