//! Request-scoped context
//!
//! Every public async operation takes a [`RequestContext`] explicitly. It carries
//! the correlation id of the logical request, the cancellation signal shared by
//! all of the request's sub-dispatches, and the `tracing` span that stamps the
//! correlation id onto every log line emitted while the request runs.

mod cancellation;
mod correlation;

pub use cancellation::Cancellation;
pub use correlation::CorrelationId;

use crate::error::Result;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info_span, Instrument, Span};

/// Context passed through every async call belonging to one logical request
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: Cancellation,
    span: Span,
}

impl RequestContext {
    /// Fresh context with a newly generated correlation id
    pub fn new() -> Self {
        Self::with_correlation_id(CorrelationId::new())
    }

    pub fn with_correlation_id(correlation_id: CorrelationId) -> Self {
        let span = request_span(&correlation_id);
        Self {
            correlation_id,
            cancellation: Cancellation::new(),
            span,
        }
    }

    /// Reuse an inbound id (e.g. an `x-correlation-id` header) or create one
    pub fn get_or_create(existing: Option<&str>) -> Self {
        Self::with_correlation_id(CorrelationId::get_or_create(existing))
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Signal cancellation to every holder of this context
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Run `fut` inside this request's span so its log lines carry the correlation id
    pub fn bind<F: Future>(&self, fut: F) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span.clone())
    }

    /// Run `operation` with `id` bound for its duration.
    ///
    /// The scoped context shares this context's cancellation signal. The caller's
    /// own binding is untouched, so sibling tasks never observe each other's ids.
    pub async fn with_id<F, Fut, T>(&self, id: CorrelationId, operation: F) -> T
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let scoped = Self {
            span: request_span(&id),
            correlation_id: id,
            cancellation: self.cancellation.clone(),
        };
        let span = scoped.span.clone();
        operation(scoped).instrument(span).await
    }

    /// Child span carrying extra fields on top of the correlation id.
    ///
    /// The scope is released when the returned handle is dropped.
    pub fn logging_scope<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> LoggingScope
    where
        K: Into<String>,
        V: ToString,
    {
        let fields: BTreeMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        let rendered = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        let span = info_span!(parent: &self.span, "scope", fields = %rendered);
        LoggingScope { span, fields }
    }

    /// Race `fut` against this context's cancellation signal.
    ///
    /// On cancellation `fut` is dropped, not awaited to completion.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.cancellation.run(fut).await
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn request_span(id: &CorrelationId) -> Span {
    info_span!("request", correlation_id = %id)
}

/// Handle for a logging scope opened with [`RequestContext::logging_scope`]
#[derive(Debug)]
pub struct LoggingScope {
    span: Span,
    fields: BTreeMap<String, String>,
}

impl LoggingScope {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Run a synchronous closure inside the scope
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }

    /// Instrument a future with the scope
    pub fn bind<F: Future>(&self, fut: F) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span.clone())
    }
}
