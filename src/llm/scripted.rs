//! Deterministic model double.
//!
//! Serves queued responses first, then falls back to an optional responder
//! closure. [`ScriptedModel::demo`] wires a responder that recognizes every
//! task label the engine sends, so `--offline` runs produce a complete app
//! without touching a real model.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use super::{FragmentStream, LanguageModel, ModelParams, RenderedPrompt};
use crate::classifier::Domain;
use crate::errors::ModelError;

type Responder = Box<dyn Fn(&RenderedPrompt) -> Result<String, ModelError> + Send + Sync>;

/// Model double returning canned responses in order.
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Result<String, String>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<RenderedPrompt>>,
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("calls", &self.call_count())
            .field("has_responder", &self.responder.is_some())
            .finish()
    }
}

impl ScriptedModel {
    fn empty() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Successful responses, served in order.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|s| Ok(s.into())))
    }

    /// Mixed script: `Err(msg)` entries fail the call with a stream error.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        let model = Self::empty();
        lock(&model.queue).extend(results);
        model
    }

    /// Answer every call through `responder`.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&RenderedPrompt) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::empty()
        }
    }

    /// Responder that produces a plausible app for any task the engine sends.
    pub fn demo() -> Self {
        Self::from_fn(|prompt| Ok(demo_response(&prompt.task)))
    }

    /// The text [`ScriptedModel::demo`] answers for `task`.
    pub fn demo_text(task: &str) -> String {
        demo_response(task)
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        lock(&self.queue).push_back(Ok(response.into()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<RenderedPrompt> {
        lock(&self.prompts).clone()
    }

    /// Task labels received so far, in call order.
    pub fn tasks(&self) -> Vec<String> {
        lock(&self.prompts).iter().map(|p| p.task.clone()).collect()
    }

    fn next_response(&self, prompt: &RenderedPrompt) -> Result<String, ModelError> {
        if let Some(scripted) = lock(&self.queue).pop_front() {
            return scripted.map_err(ModelError::Stream);
        }
        match &self.responder {
            Some(responder) => responder(prompt),
            None => Err(ModelError::Stream(format!(
                "no scripted response left for '{}'",
                prompt.task
            ))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        prompt: &RenderedPrompt,
        _params: &ModelParams,
    ) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response(prompt)
    }

    async fn invoke_streaming(
        &self,
        prompt: &RenderedPrompt,
        params: &ModelParams,
    ) -> Result<FragmentStream, ModelError> {
        let text = self.invoke(prompt, params).await?;
        let fragments: Vec<Result<String, ModelError>> =
            chunk_chars(&text, 24).into_iter().map(Ok).collect();
        Ok(futures::stream::iter(fragments).boxed())
    }
}

fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

// ── Demo responses ──────────────────────────────────────────────────

fn demo_response(task: &str) -> String {
    if let Some(domain) = task.strip_prefix("blueprint.") {
        let domain = domain.parse().unwrap_or(Domain::Landing);
        return demo_blueprint(domain).to_string();
    }
    if let Some(domain) = task.strip_prefix("app.") {
        let domain = domain.parse().unwrap_or(Domain::Landing);
        return demo_app(domain).to_string();
    }
    if let Some(name) = task.strip_prefix("code:") {
        return demo_component(name);
    }
    if let Some(name) = task.strip_prefix("test:unit:") {
        return demo_unit_test(name);
    }
    match task {
        "analysis" => demo_blueprint(Domain::Landing).to_string(),
        "design" => json!({
            "palette": {
                "primary": "#4f46e5",
                "secondary": "#0ea5e9",
                "accent": "#f59e0b",
                "background": "#ffffff",
                "text": "#111827"
            },
            "typography": {"heading": "Inter", "body": "Inter", "baseSize": 16},
            "spacing": [4, 8, 12, 16, 24, 32, 48],
            "radius": 8
        })
        .to_string(),
        "review" => json!({
            "score": 86,
            "issues": ["Buttons lack visible focus styles"],
            "improvements": ["Extract shared layout into a component"]
        })
        .to_string(),
        "test:e2e" => "import { test, expect } from '@playwright/test';\n\n\
test('home page renders', async ({ page }) => {\n  await page.goto('/');\n  await expect(page.locator('main')).toBeVisible();\n});\n"
            .to_string(),
        other => format!("// no demo output for {}\n", other),
    }
}

fn demo_blueprint(domain: Domain) -> serde_json::Value {
    match domain {
        Domain::Ecommerce => json!({
            "name": "Storefront",
            "description": "Online store with catalog, cart and checkout",
            "components": ["Header", "ProductCard", "CartDrawer", "Footer"],
            "pages": ["Home", "Catalog", "Checkout"],
            "features": {"cart": true, "checkout": true, "productCatalog": true},
            "productCategories": ["Shoes", "Accessories"],
            "paymentProviders": ["stripe"]
        }),
        Domain::Saas => json!({
            "name": "TeamSpace",
            "description": "Subscription workspace for small teams",
            "components": ["Navbar", "PricingTable", "SignupForm", "Footer"],
            "pages": ["Home", "Pricing", "Dashboard"],
            "features": {"authentication": true, "billing": true},
            "plans": ["Free", "Pro", "Enterprise"],
            "integrations": ["slack"]
        }),
        Domain::Dashboard => json!({
            "name": "Insights",
            "description": "Analytics dashboard with charts and tables",
            "components": ["Sidebar", "KpiCard", "LineChart", "DataTable"],
            "pages": ["Overview", "Reports", "Settings"],
            "features": {"charts": true, "dataTables": true},
            "widgets": ["revenue", "activeUsers"],
            "dataSources": ["postgres"]
        }),
        Domain::Landing => json!({
            "name": "Launchpad",
            "description": "Marketing landing page with waitlist signup",
            "components": ["Hero", "FeatureGrid", "Testimonials", "Footer"],
            "pages": ["Home", "About"],
            "features": {"hero": true, "callToAction": true},
            "sections": ["hero", "features", "testimonials"],
            "callToAction": "Join the waitlist"
        }),
    }
}

fn demo_app(domain: Domain) -> serde_json::Value {
    let title = match domain {
        Domain::Ecommerce => "Storefront",
        Domain::Saas => "TeamSpace",
        Domain::Dashboard => "Insights",
        Domain::Landing => "Launchpad",
    };
    json!({
        "files": [
            {"path": "src/App.tsx", "content": demo_component("App")},
            {"path": "src/components/Header.tsx", "content": demo_component("Header")},
            {"path": "src/pages/Home.tsx", "content": demo_component("Home")},
            {"path": "README.md", "content": format!("# {}\n\nGenerated {} app.\n", title, domain)}
        ]
    })
}

fn demo_component(name: &str) -> String {
    format!(
        "import React from 'react';\n\n\
export default function {name}() {{\n  return (\n    <section aria-label=\"{name}\">\n      <h2>{name}</h2>\n    </section>\n  );\n}}\n"
    )
}

fn demo_unit_test(name: &str) -> String {
    format!(
        "import {{ render, screen }} from '@testing-library/react';\n\
import {name} from '../../src/components/{name}';\n\n\
test('{name} renders its heading', () => {{\n  render(<{name} />);\n  expect(screen.getByText('{name}')).toBeInTheDocument();\n}});\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::collect_stream;

    fn prompt(task: &str) -> RenderedPrompt {
        RenderedPrompt::new(task, "", "")
    }

    #[tokio::test]
    async fn test_responses_served_in_order_then_exhausted() {
        let model = ScriptedModel::with_responses(["first", "second"]);
        let params = ModelParams::default();
        assert_eq!(model.invoke(&prompt("a"), &params).await.unwrap(), "first");
        assert_eq!(model.invoke(&prompt("b"), &params).await.unwrap(), "second");
        assert!(model.invoke(&prompt("c"), &params).await.is_err());
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.tasks(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scripted_errors_become_stream_errors() {
        let model = ScriptedModel::from_results([Err("boom".to_string()), Ok("ok".to_string())]);
        let params = ModelParams::default();
        let err = model.invoke(&prompt("a"), &params).await.unwrap_err();
        assert!(matches!(err, ModelError::Stream(msg) if msg == "boom"));
        assert_eq!(model.invoke(&prompt("a"), &params).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_queue_takes_priority_over_responder() {
        let model = ScriptedModel::from_fn(|_| Ok("fallback".into()));
        model.push_response("queued");
        let params = ModelParams::default();
        assert_eq!(model.invoke(&prompt("x"), &params).await.unwrap(), "queued");
        assert_eq!(model.invoke(&prompt("x"), &params).await.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_streaming_splits_into_fragments() {
        let text = "x".repeat(60);
        let model = ScriptedModel::with_responses([text.clone()]);
        let stream = model
            .invoke_streaming(&prompt("s"), &ModelParams::default())
            .await
            .unwrap();
        let fragments: Vec<_> = stream.collect().await;
        assert_eq!(fragments.len(), 3);

        let model = ScriptedModel::with_responses([text.clone()]);
        let stream = model
            .invoke_streaming(&prompt("s"), &ModelParams::default())
            .await
            .unwrap();
        assert_eq!(collect_stream(stream).await.unwrap(), text);
    }

    #[tokio::test]
    async fn test_demo_blueprint_is_valid_json_for_every_domain() {
        let model = ScriptedModel::demo();
        for domain in Domain::ALL {
            let task = format!("blueprint.{}", domain);
            let raw = model
                .invoke(&prompt(&task), &ModelParams::default())
                .await
                .unwrap();
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert!(value["components"].as_array().unwrap().len() >= 3);
        }
    }

    #[tokio::test]
    async fn test_demo_code_names_the_component() {
        let model = ScriptedModel::demo();
        let code = model
            .invoke(&prompt("code:Header"), &ModelParams::default())
            .await
            .unwrap();
        assert!(code.contains("export default function Header()"));
    }
}
