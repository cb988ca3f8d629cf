//! Typed artifacts produced by the pipeline phases.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classifier::Domain;

// ── Blueprint ───────────────────────────────────────────────────────

/// Domain-specific part of a blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum DomainBlueprint {
    Ecommerce {
        product_categories: Vec<String>,
        payment_providers: Vec<String>,
    },
    Saas {
        plans: Vec<String>,
        integrations: Vec<String>,
    },
    Dashboard {
        widgets: Vec<String>,
        data_sources: Vec<String>,
    },
    Landing {
        sections: Vec<String>,
        call_to_action: Option<String>,
    },
}

impl DomainBlueprint {
    pub fn domain(&self) -> Domain {
        match self {
            DomainBlueprint::Ecommerce { .. } => Domain::Ecommerce,
            DomainBlueprint::Saas { .. } => Domain::Saas,
            DomainBlueprint::Dashboard { .. } => Domain::Dashboard,
            DomainBlueprint::Landing { .. } => Domain::Landing,
        }
    }

    fn from_object(domain: Domain, object: &Map<String, Value>) -> Self {
        match domain {
            Domain::Ecommerce => DomainBlueprint::Ecommerce {
                product_categories: string_list(object, &["productCategories", "product_categories"]),
                payment_providers: string_list(object, &["paymentProviders", "payment_providers"]),
            },
            Domain::Saas => DomainBlueprint::Saas {
                plans: string_list(object, &["plans"]),
                integrations: string_list(object, &["integrations"]),
            },
            Domain::Dashboard => DomainBlueprint::Dashboard {
                widgets: string_list(object, &["widgets"]),
                data_sources: string_list(object, &["dataSources", "data_sources"]),
            },
            Domain::Landing => DomainBlueprint::Landing {
                sections: string_list(object, &["sections"]),
                call_to_action: ["callToAction", "call_to_action", "cta"]
                    .iter()
                    .find_map(|key| object.get(*key).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            },
        }
    }

    /// One-line summary for prompts.
    pub fn summary(&self) -> String {
        match self {
            DomainBlueprint::Ecommerce {
                product_categories,
                payment_providers,
            } => format!(
                "product categories: {}; payment providers: {}",
                list_or_none(product_categories),
                list_or_none(payment_providers)
            ),
            DomainBlueprint::Saas {
                plans,
                integrations,
            } => format!(
                "plans: {}; integrations: {}",
                list_or_none(plans),
                list_or_none(integrations)
            ),
            DomainBlueprint::Dashboard {
                widgets,
                data_sources,
            } => format!(
                "widgets: {}; data sources: {}",
                list_or_none(widgets),
                list_or_none(data_sources)
            ),
            DomainBlueprint::Landing {
                sections,
                call_to_action,
            } => format!(
                "sections: {}; call to action: {}",
                list_or_none(sections),
                call_to_action.as_deref().unwrap_or("none")
            ),
        }
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Application architecture derived from the analysis phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub description: String,
    /// PascalCase, unique.
    pub components: Vec<String>,
    /// PascalCase, unique, never empty.
    pub pages: Vec<String>,
    pub features: BTreeMap<String, bool>,
    pub details: DomainBlueprint,
}

impl Blueprint {
    /// Build a blueprint from loosely structured model output.
    ///
    /// Names may be strings or objects with a `name` field. Blank names are
    /// dropped, the rest converted to PascalCase and de-duplicated. A
    /// blueprint without pages gets `Home`.
    pub fn from_value(domain: Domain, value: &Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            bail!("blueprint must be a JSON object");
        };

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Generated App")
            .to_string();
        let description = object
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let components = identifiers(object.get("components"));
        let mut pages = identifiers(object.get("pages"));
        if pages.is_empty() {
            pages.push("Home".to_string());
        }

        Ok(Self {
            name,
            description,
            components,
            pages,
            features: feature_map(object.get("features")),
            details: DomainBlueprint::from_object(domain, object),
        })
    }

    pub fn domain(&self) -> Domain {
        self.details.domain()
    }

    pub fn enabled_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Convert free text to a PascalCase identifier. Leading digits are dropped.
pub fn pascal_case(raw: &str) -> String {
    let mut out = String::new();
    for word in raw.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    out.trim_start_matches(|c: char| c.is_ascii_digit()).to_string()
}

fn identifiers(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let raw = match item {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).unwrap_or(""),
            _ => "",
        };
        let ident = pascal_case(raw);
        if !ident.is_empty() && !out.contains(&ident) {
            out.push(ident);
        }
    }
    out
}

fn feature_map(value: Option<&Value>) -> BTreeMap<String, bool> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), !matches!(v, Value::Null | Value::Bool(false))))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| (s.to_string(), true))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn string_list(object: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ── Design system ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
    pub text: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            primary: "#2563eb".into(),
            secondary: "#64748b".into(),
            accent: "#f97316".into(),
            background: "#ffffff".into(),
            text: "#0f172a".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typography {
    pub heading: String,
    pub body: String,
    pub base_size: u32,
}

impl Default for Typography {
    fn default() -> Self {
        Self {
            heading: "system-ui".into(),
            body: "system-ui".into(),
            base_size: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignSystem {
    pub palette: Palette,
    pub typography: Typography,
    pub spacing: Vec<u32>,
    pub radius: u32,
}

impl Default for DesignSystem {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            typography: Typography::default(),
            spacing: vec![4, 8, 16, 24, 32],
            radius: 6,
        }
    }
}

impl DesignSystem {
    /// Read whatever fields are usable; defaults fill the rest.
    pub fn from_value(value: &Value) -> Self {
        let mut design = DesignSystem::default();

        if let Some(palette) = value.get("palette").or_else(|| value.get("colors")) {
            let slots: [(&str, &mut String); 5] = [
                ("primary", &mut design.palette.primary),
                ("secondary", &mut design.palette.secondary),
                ("accent", &mut design.palette.accent),
                ("background", &mut design.palette.background),
                ("text", &mut design.palette.text),
            ];
            for (key, slot) in slots {
                if let Some(color) = palette.get(key).and_then(Value::as_str)
                    && !color.trim().is_empty()
                {
                    *slot = color.trim().to_string();
                }
            }
        }

        if let Some(typography) = value.get("typography") {
            if let Some(heading) = typography.get("heading").and_then(Value::as_str) {
                design.typography.heading = heading.to_string();
            }
            if let Some(body) = typography.get("body").and_then(Value::as_str) {
                design.typography.body = body.to_string();
            }
            if let Some(size) = typography
                .get("baseSize")
                .or_else(|| typography.get("base_size"))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
            {
                design.typography.base_size = size;
            }
        }

        if let Some(spacing) = value.get("spacing").and_then(Value::as_array) {
            let steps: Vec<u32> = spacing
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|n| u32::try_from(n).ok())
                .collect();
            if !steps.is_empty() {
                design.spacing = steps;
            }
        }

        if let Some(radius) = value
            .get("radius")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
        {
            design.radius = radius;
        }

        design
    }

    pub fn to_theme_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ── File sets ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// Ordered `(path, content)` list with unique paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: Vec<GeneratedFile>,
}

/// Normalize separators and strip leading `./` and `/`.
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.to_string()
}

/// Relative, without `..`, and not a drive path.
pub fn is_safe_path(path: &str) -> bool {
    let path = path.trim();
    if path.is_empty() || path.contains(':') || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    Path::new(&path.replace('\\', "/"))
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file. An existing path is overwritten in place.
    /// Returns `true` if a file was replaced.
    pub fn insert(&mut self, path: impl AsRef<str>, content: impl Into<String>) -> bool {
        let path = normalize_path(path.as_ref());
        let content = content.into();
        if let Some(existing) = self.files.iter_mut().find(|f| f.path == path) {
            existing.content = content;
            true
        } else {
            self.files.push(GeneratedFile { path, content });
            false
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        let path = normalize_path(path);
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Merge `other` into `self`; its files win on path conflicts.
    pub fn merge(&mut self, other: FileSet) {
        for file in other.files {
            self.insert(file.path, file.content);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratedFile> {
        self.files.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read `files` from model output, either a list of `{path, content}`
    /// objects or a `{path: content}` map. Unsafe paths are skipped.
    pub fn from_value(value: &Value) -> Result<Self> {
        let files = value.get("files").unwrap_or(value);
        let mut set = FileSet::new();
        let mut push = |path: &str, content: &str| {
            if is_safe_path(path) {
                set.insert(path, content);
            } else {
                tracing::warn!(path, "skipping generated file with unsafe path");
            }
        };

        match files {
            Value::Array(items) => {
                for item in items {
                    if let (Some(path), Some(content)) = (
                        item.get("path").and_then(Value::as_str),
                        item.get("content").and_then(Value::as_str),
                    ) {
                        push(path, content);
                    }
                }
            }
            Value::Object(map) => {
                for (path, content) in map {
                    if let Some(content) = content.as_str() {
                        push(path, content);
                    }
                }
            }
            _ => bail!("model output has no files"),
        }

        if set.is_empty() {
            bail!("model output has no usable files");
        }
        Ok(set)
    }

    /// Write every file below `root`, creating directories as needed.
    pub fn write_to(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            if !is_safe_path(&file.path) {
                bail!("refusing to write outside the output directory: {}", file.path);
            }
            let target = root.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&target, &file.content)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            written.push(target);
        }
        Ok(written)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Root,
    Components,
    Pages,
    Styles,
    Tests,
}

impl FileCategory {
    pub fn of(path: &str) -> Self {
        let path = normalize_path(path);
        if path.starts_with("tests/") || path.contains(".test.") || path.contains(".spec.") {
            FileCategory::Tests
        } else if path.starts_with("src/components/") {
            FileCategory::Components
        } else if path.starts_with("src/pages/") {
            FileCategory::Pages
        } else if path.starts_with("src/styles/")
            || path.ends_with(".css")
            || path.ends_with("theme.json")
        {
            FileCategory::Styles
        } else {
            FileCategory::Root
        }
    }
}

// ── Review ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// 0-100.
    pub score: u8,
    pub issues: Vec<String>,
    pub improvements: Vec<String>,
    /// Replacement content keyed by path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fixes: BTreeMap<String, String>,
}

impl ReviewReport {
    /// Missing or unreadable score becomes 0; out-of-range scores are clamped.
    pub fn from_value(value: &Value) -> Self {
        let score = match value.get("score") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
            _ => 0.0,
        };
        let score = if score.is_finite() {
            score.clamp(0.0, 100.0).round() as u8
        } else {
            0
        };

        let mut fixes = BTreeMap::new();
        match value.get("fixes") {
            Some(Value::Object(map)) => {
                for (path, content) in map {
                    if let Some(content) = content.as_str() {
                        fixes.insert(normalize_path(path), content.to_string());
                    }
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let (Some(path), Some(content)) = (
                        item.get("path").and_then(Value::as_str),
                        item.get("content").and_then(Value::as_str),
                    ) {
                        fixes.insert(normalize_path(path), content.to_string());
                    }
                }
            }
            _ => {}
        }

        Self {
            score,
            issues: text_list(value.get("issues")),
            improvements: text_list(value.get("improvements").or_else(|| value.get("suggestions"))),
            fixes,
        }
    }
}

fn text_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => ["description", "message", "issue", "text"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .map(String::from),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

// ── Bundle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_files: usize,
    pub root_files: usize,
    pub component_files: usize,
    pub page_files: usize,
    pub style_files: usize,
    pub test_files: usize,
    pub components: usize,
    pub pages: usize,
    pub review_score: u8,
}

impl PipelineStats {
    pub fn compute(blueprint: &Blueprint, files: &FileSet, review: &ReviewReport) -> Self {
        let mut stats = PipelineStats {
            total_files: files.len(),
            components: blueprint.components.len(),
            pages: blueprint.pages.len(),
            review_score: review.score,
            ..Default::default()
        };
        for file in files.iter() {
            match FileCategory::of(&file.path) {
                FileCategory::Root => stats.root_files += 1,
                FileCategory::Components => stats.component_files += 1,
                FileCategory::Pages => stats.page_files += 1,
                FileCategory::Styles => stats.style_files += 1,
                FileCategory::Tests => stats.test_files += 1,
            }
        }
        stats
    }
}

/// Everything a full pipeline run produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppBundle {
    pub domain: Domain,
    pub blueprint: Blueprint,
    pub design_system: DesignSystem,
    pub files: FileSet,
    pub review: ReviewReport,
    pub stats: PipelineStats,
}
