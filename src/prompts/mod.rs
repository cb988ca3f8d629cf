//! Prompt templates, the execution registry and its quality gate.
//!
//! Templates are registered once at startup and read-only afterwards.
//! [`PromptRegistry::execute`] is the only way engine code talks to the
//! model for templated work: it checks the fingerprint cache, renders,
//! invokes, repairs, validates and scores, and retries once when the
//! first attempt is not accepted.

pub mod builtin;
pub mod quality;
pub mod registry;
pub mod template;

pub use builtin::{app_id, blueprint_id, builtin_templates, register_builtins};
pub use quality::{
    AttemptOutcome, Candidate, HeuristicEvaluator, MAX_RETRIES, QUALITY_THRESHOLD,
    QualityEvaluator,
};
pub use registry::{Execution, PromptRegistry, fingerprint};
pub use template::{OutputFormat, PromptTemplate, ValidationRules, Variables};
