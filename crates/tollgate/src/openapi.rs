//! OpenAPI path-template index.
//!
//! Indexes the `paths` object of an OpenAPI document (JSON or YAML) per
//! host so the suggestion engine can widen a concrete path along its
//! parameter positions. Document fetching and caching are the caller's
//! concern; this module only consumes parsed documents.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, Result};

/// HTTP methods an OpenAPI path item can declare.
const PATH_ITEM_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// One segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Literal value, or the parameter name with braces stripped.
    pub value: String,
    pub is_parameter: bool,
}

/// An indexed path template with the methods declared on it.
#[derive(Debug, Clone)]
pub struct OpenApiPath {
    /// The template as written in the document, e.g. `/repos/{owner}/{repo}`.
    pub template: String,
    pub segments: Vec<PathSegment>,
    pub methods: HashSet<String>,
}

/// Host-keyed index of path templates, in document order.
#[derive(Debug, Default)]
pub struct OpenApiIndex {
    by_host: HashMap<String, Vec<OpenApiPath>>,
}

impl OpenApiIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an OpenAPI document from text, accepting JSON first and
    /// falling back to YAML.
    pub fn parse_document(text: &str) -> Result<serde_json::Value> {
        if let Ok(json) = serde_json::from_str(text) {
            return Ok(json);
        }
        serde_yaml::from_str(text)
            .map_err(|e| CoreError::Config(format!("OpenAPI document is neither JSON nor YAML: {e}")))
    }

    /// Index the `paths` object of a parsed document under `host`.
    /// Returns the number of templates indexed.
    pub fn insert_document(&mut self, host: &str, doc: &serde_json::Value) -> Result<usize> {
        let paths = doc
            .get("paths")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| CoreError::Config("OpenAPI document has no 'paths' object".to_string()))?;

        // serde_json's preserve_order keeps the map in document order, so
        // first-match-wins lookup follows the order templates were
        // declared in the source document.
        let entry = self.by_host.entry(host.to_string()).or_default();
        let before = entry.len();
        for (template, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            let methods: HashSet<String> = item
                .keys()
                .filter(|k| PATH_ITEM_METHODS.contains(&k.as_str()))
                .map(|k| k.to_uppercase())
                .collect();
            if methods.is_empty() {
                continue;
            }
            entry.push(OpenApiPath {
                template: template.clone(),
                segments: template_segments(template),
                methods,
            });
        }
        Ok(entry.len() - before)
    }

    /// Find the template matching a concrete request, if any.
    ///
    /// Linear scan in load order: the method must be declared, segment
    /// counts must be equal, and every non-parameter segment must match
    /// byte-for-byte. First match wins.
    #[must_use]
    pub fn lookup(&self, host: &str, method: &str, concrete_path: &str) -> Option<&OpenApiPath> {
        let templates = self.by_host.get(host)?;
        let path = concrete_path
            .split_once('?')
            .map_or(concrete_path, |(p, _)| p);
        let concrete: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        templates.iter().find(|t| {
            t.methods.contains(method)
                && t.segments.len() == concrete.len()
                && t.segments
                    .iter()
                    .zip(&concrete)
                    .all(|(seg, c)| seg.is_parameter || seg.value == **c)
        })
    }

    /// Number of templates indexed for a host.
    #[must_use]
    pub fn template_count(&self, host: &str) -> usize {
        self.by_host.get(host).map_or(0, Vec::len)
    }
}

fn template_segments(template: &str) -> Vec<PathSegment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                PathSegment {
                    value: name.to_string(),
                    is_parameter: true,
                }
            } else {
                PathSegment {
                    value: s.to_string(),
                    is_parameter: false,
                }
            }
        })
        .collect()
}
