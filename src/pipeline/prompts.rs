//! Prompt builders for the pipeline phases that call the model directly.
//!
//! Task labels: `analysis`, `design`, `code:<Name>`, `review`, `test:e2e`,
//! `test:unit:<Name>`.

use std::sync::LazyLock;

use regex::Regex;

use super::artifacts::{Blueprint, DesignSystem, FileSet};
use crate::classifier::Domain;
use crate::llm::RenderedPrompt;

static CODE_FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\n(.*?)(?:\n?```|$)").unwrap());

/// Per-file cap when showing code to the reviewer.
const REVIEW_FILE_CHARS: usize = 4000;

const CODE_SYSTEM: &str = "You are a senior React + TypeScript engineer. \
Output only the file contents, no explanations and no markdown fences.";

const JSON_SYSTEM: &str = "Respond with a single JSON object and nothing else.";

/// The contents of the first fenced block, or the trimmed text if there is none.
pub fn strip_code_fences(text: &str) -> String {
    match CODE_FENCE_REGEX.captures(text) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn blueprint_context(blueprint: &Blueprint) -> String {
    format!(
        "App: {name}\nDomain: {domain}\nDescription: {description}\nComponents: {components}\n\
Pages: {pages}\nFeatures: {features}\nDetails: {details}",
        name = blueprint.name,
        domain = blueprint.domain(),
        description = blueprint.description,
        components = blueprint.components.join(", "),
        pages = blueprint.pages.join(", "),
        features = blueprint.enabled_features().join(", "),
        details = blueprint.details.summary(),
    )
}

pub fn analysis(prompt: &str, domain: Domain) -> RenderedPrompt {
    RenderedPrompt::new(
        "analysis",
        JSON_SYSTEM,
        format!(
            "Analyze this request for a {domain} web application:\n\n{prompt}\n\n\
Return JSON: {{\"name\": string, \"description\": string, \"components\": [string], \
\"pages\": [string], \"features\": {{string: bool}}}}"
        ),
    )
}

pub fn design(blueprint: &Blueprint) -> RenderedPrompt {
    RenderedPrompt::new(
        "design",
        JSON_SYSTEM,
        format!(
            "Create a design system for this application.\n\n{}\n\n\
Return JSON: {{\"palette\": {{\"primary\", \"secondary\", \"accent\", \"background\", \"text\"}} as hex colors, \
\"typography\": {{\"heading\": string, \"body\": string, \"baseSize\": number}}, \
\"spacing\": [number], \"radius\": number}}",
            blueprint_context(blueprint)
        ),
    )
}

fn design_context(design: &DesignSystem) -> String {
    format!(
        "Colors: primary {}, secondary {}, accent {}, background {}, text {}. \
Fonts: {} / {} at {}px. Border radius {}px. Import tokens from './theme.json' where useful.",
        design.palette.primary,
        design.palette.secondary,
        design.palette.accent,
        design.palette.background,
        design.palette.text,
        design.typography.heading,
        design.typography.body,
        design.typography.base_size,
        design.radius,
    )
}

pub fn root_component(blueprint: &Blueprint, design: &DesignSystem) -> RenderedPrompt {
    RenderedPrompt::new(
        "code:App",
        CODE_SYSTEM,
        format!(
            "Write src/App.tsx for this application. It must route between the pages \
({pages}) which live in src/pages/<Name>.tsx and export a default App component.\n\n{context}\n\n{design}",
            pages = blueprint.pages.join(", "),
            context = blueprint_context(blueprint),
            design = design_context(design),
        ),
    )
}

pub fn component(blueprint: &Blueprint, design: &DesignSystem, name: &str) -> RenderedPrompt {
    RenderedPrompt::new(
        format!("code:{}", name),
        CODE_SYSTEM,
        format!(
            "Write src/components/{name}.tsx: a reusable, accessible `{name}` component \
with a default export.\n\n{context}\n\n{design}",
            context = blueprint_context(blueprint),
            design = design_context(design),
        ),
    )
}

pub fn page(blueprint: &Blueprint, design: &DesignSystem, name: &str) -> RenderedPrompt {
    RenderedPrompt::new(
        format!("code:{}", name),
        CODE_SYSTEM,
        format!(
            "Write src/pages/{name}.tsx: the `{name}` page with a default export. \
Compose it from these components in src/components/: {components}.\n\n{context}\n\n{design}",
            components = blueprint.components.join(", "),
            context = blueprint_context(blueprint),
            design = design_context(design),
        ),
    )
}

pub fn review(blueprint: &Blueprint, files: &FileSet) -> RenderedPrompt {
    let mut listing = String::new();
    for file in files.iter() {
        let content: String = file.content.chars().take(REVIEW_FILE_CHARS).collect();
        listing.push_str(&format!("--- {} ---\n{}\n\n", file.path, content));
    }
    RenderedPrompt::new(
        "review",
        JSON_SYSTEM,
        format!(
            "Review this generated application for correctness, accessibility and consistency.\n\n\
{context}\n\n{listing}\
Return JSON: {{\"score\": number 0-100, \"issues\": [string], \"improvements\": [string], \
\"fixes\": {{path: full corrected file content}}}}. Only include fixes for files listed above.",
            context = blueprint_context(blueprint),
        ),
    )
}

pub fn e2e_tests(blueprint: &Blueprint) -> RenderedPrompt {
    RenderedPrompt::new(
        "test:e2e",
        CODE_SYSTEM,
        format!(
            "Write tests/e2e/app.spec.ts: Playwright end-to-end tests that visit every page \
({pages}) and exercise the main user flows.\n\n{context}",
            pages = blueprint.pages.join(", "),
            context = blueprint_context(blueprint),
        ),
    )
}

pub fn unit_tests(name: &str, code: &str) -> RenderedPrompt {
    RenderedPrompt::new(
        format!("test:unit:{}", name),
        CODE_SYSTEM,
        format!(
            "Write tests/unit/{name}.test.tsx: React Testing Library unit tests for this component \
from src/components/{name}.tsx.\n\n{code}"
        ),
    )
}

/// Fixed accessibility suite added to every pipeline run.
pub const ACCESSIBILITY_SUITE: &str = r#"import { test, expect } from '@playwright/test';
import AxeBuilder from '@axe-core/playwright';

test.describe('accessibility', () => {
  test('home page has no detectable violations', async ({ page }) => {
    await page.goto('/');
    const results = await new AxeBuilder({ page }).analyze();
    expect(results.violations).toEqual([]);
  });

  test('every image has alt text', async ({ page }) => {
    await page.goto('/');
    const missing = await page.locator('img:not([alt])').count();
    expect(missing).toBe(0);
  });

  test('page is keyboard navigable', async ({ page }) => {
    await page.goto('/');
    await page.keyboard.press('Tab');
    const focused = await page.evaluate(() => document.activeElement?.tagName);
    expect(focused).not.toBe('BODY');
  });
});
"#;
