//! Prompt template rendering.
//!
//! Templates reference variables as `{{ name }}` or `{{ name.path }}`.
//! Rendering goes through the [`PromptRenderer`] trait so the pipeline can
//! swap in a richer engine; [`PlaceholderRenderer`] is the built-in one.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Matches a `{{ ... }}` placeholder, capturing its trimmed body.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid regex"));

/// A valid dotted variable path.
static VARIABLE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders a prompt template against a variable map.
///
/// Implementations fail with [`CoreError::Template`] on syntax errors and
/// undefined variables.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &Value) -> Result<String, CoreError>;
}

/// Strict `{{ var.path }}` substitution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl PromptRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, vars: &Value) -> Result<String, CoreError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            check_plain_segment(&template[last..whole.start()])?;
            out.push_str(&template[last..whole.start()]);

            let path = &caps[1];
            if !VARIABLE_PATH_RE.is_match(path) {
                return Err(CoreError::Template(format!(
                    "Invalid variable name '{path}'"
                )));
            }
            let value = lookup(vars, path)
                .ok_or_else(|| CoreError::Template(format!("Undefined variable '{path}'")))?;
            push_value(&mut out, value);
            last = whole.end();
        }

        check_plain_segment(&template[last..])?;
        out.push_str(&template[last..]);
        Ok(out)
    }
}

fn check_plain_segment(segment: &str) -> Result<(), CoreError> {
    if segment.contains("{{") {
        return Err(CoreError::Template(
            "Unterminated '{{' placeholder".to_string(),
        ));
    }
    Ok(())
}

fn lookup<'a>(vars: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(vars, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => {}
        other => out.push_str(&other.to_string()),
    }
}

/// Extract the distinct variable paths a template references, in order.
pub fn referenced_variables(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

// ---------------------------------------------------------------------------
// Variable layering
// ---------------------------------------------------------------------------

/// Builds the variable map for a render, later layers overriding earlier.
///
/// The pipeline layers operator globals, then project metadata, then the
/// stage input.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: Map<String, Value>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every top-level key of `layer` over the current map.
    ///
    /// Non-object layers are ignored.
    pub fn layer(mut self, layer: &Value) -> Self {
        if let Value::Object(map) = layer {
            for (key, value) in map {
                self.vars.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Set a single variable.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.vars)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn substitutes_nested_paths_and_scalars() {
        let vars = json!({"project": {"name": "Moon"}, "count": 3, "flag": true});
        let out = PlaceholderRenderer
            .render("{{project.name}} x{{ count }} {{flag}}", &vars)
            .unwrap();
        assert_eq!(out, "Moon x3 true");
    }

    #[test]
    fn undefined_variable_is_template_error() {
        let err = PlaceholderRenderer
            .render("Hello {{ missing }}", &json!({}))
            .unwrap_err();
        assert_matches!(err, CoreError::Template(msg) if msg.contains("missing"));
    }

    #[test]
    fn unterminated_placeholder_is_template_error() {
        assert_matches!(
            PlaceholderRenderer.render("Hello {{ name", &json!({"name": "x"})),
            Err(CoreError::Template(_))
        );
    }

    #[test]
    fn invalid_name_is_template_error() {
        assert_matches!(
            PlaceholderRenderer.render("{{ 1abc }}", &json!({})),
            Err(CoreError::Template(_))
        );
    }

    #[test]
    fn plain_json_braces_pass_through() {
        let out = PlaceholderRenderer
            .render(r#"Reply as {"scenes": [{"a": 1}]}"#, &json!({}))
            .unwrap();
        assert_eq!(out, r#"Reply as {"scenes": [{"a": 1}]}"#);
    }

    #[test]
    fn later_layers_override_earlier() {
        let vars = TemplateVars::new()
            .layer(&json!({"style": "global", "tone": "calm"}))
            .layer(&json!({"style": "project"}))
            .set("topic", "X")
            .into_value();
        assert_eq!(vars["style"], "project");
        assert_eq!(vars["tone"], "calm");
        assert_eq!(vars["topic"], "X");
    }

    #[test]
    fn lists_referenced_variables_once() {
        assert_eq!(
            referenced_variables("{{a}} {{ b.c }} {{a}}"),
            vec!["a".to_string(), "b.c".to_string()]
        );
    }
}
