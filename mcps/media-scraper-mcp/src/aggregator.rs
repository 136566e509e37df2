//! Multi-source search with per-backend failure isolation
//!
//! Each requested media type fans out to its backend set concurrently. A
//! failing or slow backend only contributes a line to `errors`; its siblings
//! and the rest of the request carry on.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;

use crate::backends::{BackendRegistry, MediaBackend};
use crate::config::SearchConfig;
use crate::error::{MediaError, Result};
use crate::types::{
    AggregatedSearchResult, MediaBuckets, MediaResult, MediaType, SearchOptions, SearchScope,
};

/// Backends tried when the caller names none
pub fn default_sources(media_type: MediaType, region_restricted: bool) -> &'static [&'static str] {
    match (media_type, region_restricted) {
        (MediaType::Video, true) => &["mixkit", "bilibili"],
        (MediaType::Video, false) => &["mixkit", "youtube", "bilibili"],
        (MediaType::Music | MediaType::SoundEffect, _) => &["mixkit", "incompetech"],
        (MediaType::Image, true) => &["bing", "baidu"],
        (MediaType::Image, false) => &["bing", "baidu", "duckduckgo"],
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub scope: SearchScope,
    pub sources: Option<Vec<String>>,
    pub max_results: usize,
    pub region_restricted: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            query: query.into(),
            scope,
            sources: None,
            max_results: 10,
            region_restricted: true,
        }
    }

    /// True when the caller named sources instead of relying on the defaults
    pub fn has_explicit_sources(&self) -> bool {
        self.sources.as_ref().is_some_and(|sources| !sources.is_empty())
    }
}

/// Outcome of one media type's fan-out
#[derive(Default)]
struct TypeOutcome {
    items: Vec<MediaResult>,
    errors: Vec<String>,
}

pub struct Aggregator {
    registry: Arc<BackendRegistry>,
    backend_timeout: Duration,
    max_concurrency: usize,
}

impl Aggregator {
    pub fn new(registry: Arc<BackendRegistry>, config: &SearchConfig) -> Self {
        Self::with_limits(
            registry,
            Duration::from_secs(config.backend_timeout_secs),
            config.max_concurrency,
        )
    }

    pub fn with_limits(
        registry: Arc<BackendRegistry>,
        backend_timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            backend_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Backends queried for one type, in invocation order
    ///
    /// Explicit sources are kept only when registered and able to serve the
    /// type; the region policy shapes the default set only.
    pub fn candidate_sources(
        &self,
        media_type: MediaType,
        request: &SearchRequest,
    ) -> Vec<Arc<dyn MediaBackend>> {
        let names: Vec<&str> = match &request.sources {
            Some(sources) if request.has_explicit_sources() => {
                sources.iter().map(String::as_str).collect()
            }
            _ => default_sources(media_type, request.region_restricted).to_vec(),
        };

        let mut backends: Vec<Arc<dyn MediaBackend>> = Vec::new();
        for name in names {
            if backends.iter().any(|b| b.name() == name) {
                continue;
            }
            match self.registry.get(name) {
                Some(backend) if backend.supports(media_type) => backends.push(backend),
                Some(_) => {}
                None => tracing::debug!("Ignoring unknown source '{}'", name),
            }
        }
        backends
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<AggregatedSearchResult> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(MediaError::InvalidRequest("query is required".to_string()));
        }

        let options = SearchOptions::with_max_results(request.max_results);
        let media_types = request.scope.media_types();

        let outcomes = join_all(
            media_types
                .iter()
                .map(|media_type| self.search_type(query, *media_type, request, &options)),
        )
        .await;

        let mut results = MediaBuckets::default();
        let mut errors = Vec::new();
        for (media_type, outcome) in media_types.into_iter().zip(outcomes) {
            results.bucket_mut(media_type).extend(outcome.items);
            errors.extend(outcome.errors);
        }

        let counts = results.counts();
        tracing::info!(
            "Search '{}' ({:?}): {} results, {} backend errors",
            query,
            request.scope,
            counts.total,
            errors.len()
        );

        Ok(AggregatedSearchResult {
            query: query.to_string(),
            scope: request.scope,
            region_policy: request.region_restricted,
            counts,
            results,
            errors: if errors.is_empty() { None } else { Some(errors) },
        })
    }

    /// Single named backend; failures propagate to the caller
    pub async fn search_source(
        &self,
        source: &str,
        query: &str,
        media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>> {
        if query.trim().is_empty() {
            return Err(MediaError::InvalidRequest("query is required".to_string()));
        }
        let backend = self
            .registry
            .get(source)
            .filter(|backend| backend.supports(media_type))
            .ok_or_else(|| MediaError::InvalidRequest(format!("Unsupported source: {}", source)))?;

        self.call(backend.as_ref(), query.trim(), media_type, options).await
    }

    async fn search_type(
        &self,
        query: &str,
        media_type: MediaType,
        request: &SearchRequest,
        options: &SearchOptions,
    ) -> TypeOutcome {
        let backends = self.candidate_sources(media_type, request);
        if backends.is_empty() {
            // An explicit source list that skips this type is a zero-result
            // state; only an empty default set is a failure.
            if request.has_explicit_sources() {
                return TypeOutcome::default();
            }
            return TypeOutcome {
                items: Vec::new(),
                errors: vec![format!("{}: no backend available for this type", media_type)],
            };
        }

        let pending: Vec<BoxFuture<'_, (Arc<dyn MediaBackend>, Result<Vec<MediaResult>>)>> = backends
            .into_iter()
            .map(|backend| {
                async move {
                    let outcome = self.call(backend.as_ref(), query, media_type, options).await;
                    (backend, outcome)
                }
                .boxed()
            })
            .collect();

        // `buffered` keeps invocation order while bounding fan-out
        let calls: Vec<_> = stream::iter(pending)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut outcome = TypeOutcome::default();
        for (backend, result) in calls {
            match result {
                Ok(items) => outcome.items.extend(items),
                Err(e) => {
                    tracing::warn!("Backend {} failed for {}: {}", backend.name(), media_type, e);
                    outcome
                        .errors
                        .push(format!("{} {}: {}", backend.name(), media_type, e));
                }
            }
        }
        outcome
    }

    async fn call(
        &self,
        backend: &dyn MediaBackend,
        query: &str,
        media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>> {
        tracing::debug!("Querying {} for {} '{}'", backend.name(), media_type, query);
        let mut items = tokio::time::timeout(
            self.backend_timeout,
            backend.search(query, media_type, options),
        )
        .await
        .map_err(|_| {
            MediaError::Backend(format!(
                "timed out after {}s",
                self.backend_timeout.as_secs_f32()
            ))
        })??;

        for item in &mut items {
            if item.source.is_empty() {
                item.source = backend.name().to_string();
            }
        }
        Ok(items)
    }
}
