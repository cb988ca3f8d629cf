//! Templates registered at startup: one blueprint and one quick-app
//! template per domain.

use crate::classifier::Domain;
use crate::llm::ModelParams;

use super::registry::PromptRegistry;
use super::template::PromptTemplate;

const BLUEPRINT_SYSTEM: &str = "You are a senior product architect. \
You turn short product requests into precise application blueprints for a React + TypeScript front end. \
Respond with a single JSON object and nothing else.";

const APP_SYSTEM: &str = "You are a senior React + TypeScript engineer. \
You produce small, complete, runnable applications. \
Respond with a single JSON object and nothing else.";

pub fn blueprint_id(domain: Domain) -> String {
    format!("blueprint.{}", domain)
}

pub fn app_id(domain: Domain) -> String {
    format!("app.{}", domain)
}

/// Domain-specific blueprint fields and the flags that must be enabled.
fn domain_contract(domain: Domain) -> (&'static str, &'static [&'static str]) {
    match domain {
        Domain::Ecommerce => (
            r#""productCategories": [string], "paymentProviders": [string]"#,
            &["cart", "checkout", "productCatalog"],
        ),
        Domain::Saas => (
            r#""plans": [string], "integrations": [string]"#,
            &["authentication", "billing"],
        ),
        Domain::Dashboard => (
            r#""widgets": [string], "dataSources": [string]"#,
            &["charts", "dataTables"],
        ),
        Domain::Landing => (
            r#""sections": [string], "callToAction": string"#,
            &["hero", "callToAction"],
        ),
    }
}

fn blueprint_template(domain: Domain, params: ModelParams) -> PromptTemplate {
    let (extra_fields, flags) = domain_contract(domain);
    let flag_list = flags
        .iter()
        .map(|f| format!("\"{}\": true", f))
        .collect::<Vec<_>>()
        .join(", ");
    let min_pages = if domain == Domain::Landing { 1 } else { 2 };

    let user = format!(
        "Design a {domain} application for this request:\n\n{{{{prompt}}}}\n\n\
Return JSON with exactly these keys:\n\
{{\"name\": string, \"description\": string, \"components\": [string], \"pages\": [string], \
\"features\": {{{flag_list}}}, {extra_fields}}}\n\n\
Rules:\n\
- at least 3 components and {min_pages} page(s), named in PascalCase\n\
- every feature listed above must be present and true\n"
    );

    let mut template = PromptTemplate::new(blueprint_id(domain), BLUEPRINT_SYSTEM, user)
        .with_domain(domain)
        .with_params(params)
        .require_min("components", 3)
        .require_min("pages", min_pages);
    for flag in flags {
        template = template.require_flag(*flag);
    }
    template
}

fn app_template(domain: Domain, params: ModelParams) -> PromptTemplate {
    let user = format!(
        "Build a complete {domain} application for this request:\n\n{{{{prompt}}}}\n\n\
Return JSON: {{\"files\": [{{\"path\": string, \"content\": string}}]}}\n\
Include src/App.tsx, at least one component under src/components/ and one page under src/pages/. \
Paths are relative to the project root.\n"
    );
    PromptTemplate::new(app_id(domain), APP_SYSTEM, user)
        .with_domain(domain)
        .with_params(params)
        .require_min("files", 3)
}

pub fn builtin_templates(params: ModelParams) -> Vec<PromptTemplate> {
    Domain::ALL
        .iter()
        .flat_map(|&domain| [blueprint_template(domain, params), app_template(domain, params)])
        .collect()
}

pub fn register_builtins(registry: &PromptRegistry, params: ModelParams) {
    for template in builtin_templates(params) {
        registry.register(template);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::Variables;
    use serde_json::json;

    #[test]
    fn test_every_domain_has_both_templates() {
        let templates = builtin_templates(ModelParams::default());
        assert_eq!(templates.len(), Domain::ALL.len() * 2);
        for domain in Domain::ALL {
            assert!(templates.iter().any(|t| t.id == blueprint_id(domain)));
            assert!(templates.iter().any(|t| t.id == app_id(domain)));
        }
    }

    #[test]
    fn test_templates_only_need_the_prompt_variable() {
        for template in builtin_templates(ModelParams::default()) {
            assert_eq!(template.placeholders(), vec!["prompt"], "{}", template.id);
            let vars = Variables::from([("prompt".to_string(), "a shoe shop".to_string())]);
            let rendered = template.render(&vars).unwrap();
            assert!(rendered.user.contains("a shoe shop"));
            assert!(!rendered.user.contains("{{"));
        }
    }

    #[test]
    fn test_ecommerce_blueprint_requires_commerce_flags() {
        let template = blueprint_template(Domain::Ecommerce, ModelParams::default());
        assert_eq!(
            template.validation.required_flags,
            vec!["cart", "checkout", "productCatalog"]
        );
        let violations = template.validate(&json!({
            "components": ["A", "B", "C"],
            "pages": ["Home", "Cart"],
            "features": {"cart": true, "checkout": true}
        }));
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_landing_needs_a_single_page() {
        let template = blueprint_template(Domain::Landing, ModelParams::default());
        assert_eq!(template.validation.min_counts.get("pages"), Some(&1));
    }

    #[test]
    fn test_params_are_applied() {
        let params = ModelParams {
            temperature: 0.2,
            max_tokens: 1000,
        };
        assert!(builtin_templates(params).iter().all(|t| t.params == params));
    }
}
