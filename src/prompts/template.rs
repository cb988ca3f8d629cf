//! Prompt templates: `{{var}}` rendering and output validation.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::Domain;
use crate::errors::{PromptError, Violation};
use crate::llm::{ModelParams, RenderedPrompt};

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Template variables. Sorted so fingerprints are canonical.
pub type Variables = BTreeMap<String, String>;

/// Whether a template's output is parsed as JSON or kept as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

/// Structural rules a JSON output must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Field name to minimum number of elements.
    #[serde(default)]
    pub min_counts: BTreeMap<String, usize>,
    /// Feature flags that must be present and truthy.
    #[serde(default)]
    pub required_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub params: ModelParams,
    pub system: String,
    pub user: String,
    #[serde(default)]
    pub output: OutputFormat,
    #[serde(default)]
    pub validation: ValidationRules,
}

fn default_version() -> u32 {
    1
}

impl PromptTemplate {
    pub fn new(id: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: None,
            version: default_version(),
            params: ModelParams::default(),
            system: system.into(),
            user: user.into(),
            output: OutputFormat::Json,
            validation: ValidationRules::default(),
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn require_min(mut self, field: impl Into<String>, min: usize) -> Self {
        self.validation.min_counts.insert(field.into(), min);
        self
    }

    pub fn require_flag(mut self, flag: impl Into<String>) -> Self {
        self.validation.required_flags.push(flag.into());
        self
    }

    /// Distinct placeholder names across system and user text, in order of
    /// first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for text in [&self.system, &self.user] {
            for caps in PLACEHOLDER_REGEX.captures_iter(text) {
                let name = caps[1].to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every `{{name}}` from `vars`.
    ///
    /// Extra variables are ignored; a placeholder without a value is an error.
    pub fn render(&self, vars: &Variables) -> Result<RenderedPrompt, PromptError> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !vars.contains_key(name))
        {
            return Err(PromptError::Render {
                prompt_id: self.id.clone(),
                variable: missing,
            });
        }

        let fill = |text: &str| -> String {
            PLACEHOLDER_REGEX
                .replace_all(text, |caps: &Captures| {
                    vars.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        };

        Ok(RenderedPrompt::new(
            self.id.clone(),
            fill(&self.system),
            fill(&self.user),
        ))
    }

    /// Check `output` against this template's rules. Empty means valid.
    pub fn validate(&self, output: &Value) -> Vec<Violation> {
        match self.output {
            OutputFormat::Text => match output.as_str() {
                Some(text) if !text.trim().is_empty() => Vec::new(),
                _ => vec![Violation::EmptyText],
            },
            OutputFormat::Json => self.validate_object(output),
        }
    }

    fn validate_object(&self, output: &Value) -> Vec<Violation> {
        let Some(object) = output.as_object() else {
            return vec![Violation::NotAnObject];
        };

        let mut violations = Vec::new();
        for (field, &min) in &self.validation.min_counts {
            let found = object.get(field).map(element_count).unwrap_or(0);
            if found < min {
                violations.push(Violation::TooFew {
                    field: field.clone(),
                    min,
                    found,
                });
            }
        }

        for flag in &self.validation.required_flags {
            if !has_flag(output, flag) {
                violations.push(Violation::MissingFlag(flag.clone()));
            }
        }
        violations
    }
}

/// Element count of an array or object field. Scalars count as zero.
pub(crate) fn element_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// A flag is set at the top level, in a `features` object, or listed by
/// name in a `features` array.
fn has_flag(output: &Value, flag: &str) -> bool {
    if output.get(flag).is_some_and(truthy) {
        return true;
    }
    match output.get("features") {
        Some(Value::Object(features)) => features.get(flag).is_some_and(truthy),
        Some(Value::Array(features)) => features.iter().any(|f| f.as_str() == Some(flag)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_system_and_user() {
        let template = PromptTemplate::new(
            "greet",
            "You build {{kind}} apps.",
            "Request: {{ prompt }}",
        );
        let rendered = template
            .render(&vars(&[("kind", "saas"), ("prompt", "team wiki")]))
            .unwrap();
        assert_eq!(rendered.task, "greet");
        assert_eq!(rendered.system, "You build saas apps.");
        assert_eq!(rendered.user, "Request: team wiki");
    }

    #[test]
    fn test_render_missing_variable_is_error() {
        let template = PromptTemplate::new("t", "", "{{prompt}} for {{audience}}");
        let err = template.render(&vars(&[("prompt", "x")])).unwrap_err();
        match err {
            PromptError::Render {
                prompt_id,
                variable,
            } => {
                assert_eq!(prompt_id, "t");
                assert_eq!(variable, "audience");
            }
            other => panic!("expected Render, got {other:?}"),
        }
    }

    #[test]
    fn test_render_ignores_extra_variables_and_single_braces() {
        let template = PromptTemplate::new("t", "", "Return {\"a\": {{v}}}");
        let rendered = template
            .render(&vars(&[("v", "1"), ("unused", "zzz")]))
            .unwrap();
        assert_eq!(rendered.user, "Return {\"a\": 1}");
    }

    #[test]
    fn test_placeholders_are_distinct_and_ordered() {
        let template = PromptTemplate::new("t", "{{b}} {{a}}", "{{a}} {{c}} {{b}}");
        assert_eq!(template.placeholders(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_validate_min_counts() {
        let template = PromptTemplate::new("t", "", "")
            .require_min("components", 3)
            .require_min("pages", 1);
        let violations = template.validate(&json!({"components": ["A", "B"], "pages": ["Home"]}));
        assert_eq!(
            violations,
            vec![Violation::TooFew {
                field: "components".into(),
                min: 3,
                found: 2
            }]
        );
    }

    #[test]
    fn test_validate_missing_field_counts_as_zero() {
        let template = PromptTemplate::new("t", "", "").require_min("pages", 1);
        let violations = template.validate(&json!({"pages": "Home"}));
        assert!(matches!(violations[0], Violation::TooFew { found: 0, .. }));
    }

    #[test]
    fn test_validate_flags_top_level_and_features() {
        let template = PromptTemplate::new("t", "", "")
            .require_flag("cart")
            .require_flag("checkout")
            .require_flag("wishlist");
        let output = json!({"cart": true, "features": {"checkout": {"steps": 2}, "wishlist": false}});
        assert_eq!(
            template.validate(&output),
            vec![Violation::MissingFlag("wishlist".into())]
        );
    }

    #[test]
    fn test_validate_flags_listed_in_features_array() {
        let template = PromptTemplate::new("t", "", "").require_flag("billing");
        assert!(template.validate(&json!({"features": ["billing", "sso"]})).is_empty());
        assert!(!template.validate(&json!({"features": ["sso"]})).is_empty());
    }

    #[test]
    fn test_validate_null_flag_is_missing() {
        let template = PromptTemplate::new("t", "", "").require_flag("hero");
        assert_eq!(
            template.validate(&json!({"hero": null})),
            vec![Violation::MissingFlag("hero".into())]
        );
    }

    #[test]
    fn test_validate_json_requires_object() {
        let template = PromptTemplate::new("t", "", "");
        assert_eq!(template.validate(&json!([1, 2])), vec![Violation::NotAnObject]);
    }

    #[test]
    fn test_validate_text_rejects_blank() {
        let template = PromptTemplate::new("t", "", "").with_output(OutputFormat::Text);
        assert!(template.validate(&json!("some text")).is_empty());
        assert_eq!(template.validate(&json!("  \n")), vec![Violation::EmptyText]);
    }

    #[test]
    fn test_template_deserializes_with_defaults() {
        let template: PromptTemplate = toml::from_str(
            r#"
id = "custom"
system = "s"
user = "u {{prompt}}"

[validation]
required_flags = ["hero"]
"#,
        )
        .unwrap();
        assert_eq!(template.version, 1);
        assert_eq!(template.output, OutputFormat::Json);
        assert_eq!(template.params, ModelParams::default());
        assert_eq!(template.validation.required_flags, vec!["hero"]);
    }
}
