//! Language model collaborator
//!
//! The planner, the index embedding step and the web content validator all talk
//! to the model through [`LanguageModel`], so tests can swap in a fake.

mod http;

pub use http::HttpLanguageModel;

use crate::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;

/// Text completion and embedding capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` with `model`, returning the generated text
    async fn complete(&self, ctx: &RequestContext, model: &str, prompt: &str) -> Result<String>;

    /// Embed each text; the output has one vector per input, in input order
    async fn embed(
        &self,
        ctx: &RequestContext,
        model: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>>;
}
