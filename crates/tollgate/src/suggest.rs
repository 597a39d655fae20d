//! Pattern suggestion engine.
//!
//! From an observed request, proposes an ordered list of candidate
//! patterns, most specific first and a catch-all last. Generalization
//! runs right to left: the rightmost identifiers of a REST path or a
//! GraphQL argument list are the volatile ones (run IDs, row IDs,
//! free-text fields), while the leftmost are stable scopes.

use crate::graphql::{GqlValue, GraphqlField, OpType};
use crate::openapi::OpenApiPath;

/// A candidate pattern shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternOption {
    pub pattern: String,
    pub description: String,
}

/// Suggestions for an HTTP request.
///
/// Always starts with the exact request key and ends with `METHOD *`.
/// When an OpenAPI template matched the path, intermediate candidates
/// replace parameter segments with `*`, rightmost first.
#[must_use]
pub fn http_options(
    method: &str,
    path_with_query: &str,
    template: Option<&OpenApiPath>,
) -> Vec<PatternOption> {
    let path = path_with_query
        .split_once('?')
        .map_or(path_with_query, |(p, _)| p);
    let mut options = Vec::new();

    push_unique(
        &mut options,
        format!("{method} {path}"),
        "only this exact path".to_string(),
    );

    if let Some(template) = template {
        let concrete: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if concrete.len() == template.segments.len() {
            let params: Vec<usize> = template
                .segments
                .iter()
                .enumerate()
                .filter(|(_, seg)| seg.is_parameter)
                .map(|(i, _)| i)
                .collect();

            // Widen the rightmost parameter first, then progressively more.
            for cut in (0..params.len()).rev() {
                let widened = &params[cut..];
                let segs: Vec<&str> = concrete
                    .iter()
                    .enumerate()
                    .map(|(i, seg)| if widened.contains(&i) { "*" } else { *seg })
                    .collect();
                let names: Vec<&str> = widened
                    .iter()
                    .map(|&i| template.segments[i].value.as_str())
                    .collect();
                push_unique(
                    &mut options,
                    format!("{method} /{}", segs.join("/")),
                    format!("any {}", names.join(", ")),
                );
            }
        }
    }

    push_unique(
        &mut options,
        format!("{method} *"),
        format!("any {method} request on this host"),
    );
    options
}

/// Suggestions for a GraphQL top-level field.
///
/// Starts with the exact field invocation, widens argument values to
/// `$ANY` right to left, and ends with `GRAPHQL <op> *`.
#[must_use]
pub fn graphql_options(op: OpType, field: &GraphqlField) -> Vec<PatternOption> {
    let mut options = Vec::new();

    push_unique(
        &mut options,
        format!("GRAPHQL {} {}", op, field.canonical()),
        "only this exact invocation".to_string(),
    );

    for cut in (0..field.args.len()).rev() {
        let names: Vec<&str> = field.args[cut..]
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        push_unique(
            &mut options,
            format!("GRAPHQL {} {}", op, widened_field(field, cut)),
            format!("any value for {}", names.join(", ")),
        );
    }

    push_unique(
        &mut options,
        format!("GRAPHQL {op} *"),
        format!("any {op} on this host"),
    );
    options
}

/// Serialize a field with arguments at positions `cut..` replaced by `$ANY`.
fn widened_field(field: &GraphqlField, cut: usize) -> String {
    let args: Vec<String> = field
        .args
        .iter()
        .enumerate()
        .map(|(i, (name, value))| {
            if i >= cut {
                format!("{name}: $ANY")
            } else {
                format!("{name}: {value}")
            }
        })
        .collect();
    if args.is_empty() {
        field.name.clone()
    } else {
        format!("{}({})", field.name, args.join(", "))
    }
}

fn push_unique(options: &mut Vec<PatternOption>, pattern: String, description: String) {
    if options.iter().any(|o| o.pattern == pattern) {
        return;
    }
    options.push(PatternOption {
        pattern,
        description,
    });
}
