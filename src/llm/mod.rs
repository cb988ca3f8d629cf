//! Contract with the external generative model.
//!
//! Everything above this module talks to the model through the
//! [`LanguageModel`] trait: give it a rendered prompt and sampling
//! parameters, get text back, either in one piece or as a stream of
//! fragments the caller accumulates.
//!
//! | Backend | Use |
//! |---|---|
//! | [`ClaudeCli`] | spawns the `claude` CLI in stream-json mode |
//! | [`ScriptedModel`] | canned responses for tests and offline runs |

pub mod claude;
pub mod scripted;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

pub use claude::ClaudeCli;
pub use scripted::ScriptedModel;

/// Stream of text fragments produced by a streaming invocation.
pub type FragmentStream = BoxStream<'static, Result<String, ModelError>>;

/// Sampling parameters attached to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// A fully rendered prompt, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// Short label naming what the call is for, e.g. `blueprint.saas` or
    /// `code:Header`. Used in logs; never sent to the model.
    pub task: String,
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    pub fn new(task: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Abstraction over the generative model for testability.
/// Real implementation: `ClaudeCli`. Test double: `ScriptedModel`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Produce a complete text response.
    async fn invoke(
        &self,
        prompt: &RenderedPrompt,
        params: &ModelParams,
    ) -> Result<String, ModelError>;

    /// Produce the response as incremental fragments.
    ///
    /// The default yields the whole [`invoke`](Self::invoke) result as a
    /// single fragment.
    async fn invoke_streaming(
        &self,
        prompt: &RenderedPrompt,
        params: &ModelParams,
    ) -> Result<FragmentStream, ModelError> {
        let text = self.invoke(prompt, params).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }
}

/// Accumulate a fragment stream into the full response.
///
/// Stops at the first failed fragment; text received before it is dropped
/// along with the error.
pub async fn collect_stream(mut stream: FragmentStream) -> Result<String, ModelError> {
    let mut accumulated = String::new();
    while let Some(fragment) = stream.next().await {
        accumulated.push_str(&fragment?);
    }
    Ok(accumulated)
}
