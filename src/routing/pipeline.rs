//! Four-stage routing pipeline: classify, resolve, send, format
//!
//! Each request gets its own [`RequestContext`] and captures one
//! [`ConfigSnapshot`] for its whole lifetime, so a reload never changes the
//! config under an in-flight request. Stages run in order and stop at the
//! first error.
//!
//! ```text
//! Start -> Classified -> Resolved -> Sent -> Formatted
//!   \________\_____________\__________\____-> Failed
//! ```

use super::classifier::{Classifier, KeywordClassifier};
use super::context::{PipelineStage, RequestContext, RouterResponse};
use crate::agent::{
    A2AClient, DiscoveryClient, DiscoveryError, Endpoint, ForwardError, IdentifierCache,
    TransportSettings,
};
use crate::config::{ConfigSnapshot, ConfigStore};
use crate::error::{RouterError, RouterResult};
use crate::observability::metrics::metrics;
use crate::request_span;
use crate::transport::{HttpTransport, ReqwestTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Classification stage.
///
/// Uses the classifier, then `routing.default_agent`, then fails with a
/// classification error.
pub fn classify_stage(
    mut ctx: RequestContext,
    snapshot: &ConfigSnapshot,
    classifier: &dyn Classifier,
) -> RequestContext {
    if ctx.is_failed() {
        return ctx;
    }

    let agent_key = match classifier.classify(&ctx.input_text, snapshot) {
        Some(key) => key,
        None => match &snapshot.routing.default_agent {
            Some(default_agent) => {
                info!(agent_key = %default_agent, "No agent matched, using default agent");
                default_agent.clone()
            }
            None => {
                warn!("No agent matched and no default agent configured");
                return ctx.fail(RouterError::no_matching_agent());
            }
        },
    };

    ctx.agent_key = Some(agent_key);
    ctx.advance(PipelineStage::Classified)
}

/// Formatting stage: the reply text must be non-blank
pub fn format_stage(mut ctx: RequestContext) -> RequestContext {
    if ctx.is_failed() {
        return ctx;
    }

    match ctx.response_text.take().map(|text| text.trim().to_string()) {
        Some(text) if !text.is_empty() => {
            ctx.response_text = Some(text);
            ctx.advance(PipelineStage::Formatted)
        }
        _ => ctx.fail(ForwardError::Malformed {
            detail: "agent reply contained no text".to_string(),
        }),
    }
}

/// Routes requests from classification through to a formatted response
pub struct RoutingPipeline {
    store: Arc<ConfigStore>,
    classifier: Arc<dyn Classifier>,
    discovery: DiscoveryClient,
    a2a: A2AClient,
    cache: Arc<IdentifierCache>,
    permits: Arc<Semaphore>,
    agent_permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    per_agent_limit: usize,
}

impl RoutingPipeline {
    /// Build a pipeline over `transport` with the keyword classifier.
    ///
    /// The outbound concurrency bounds, global and per agent, are read from
    /// the current snapshot here and stay fixed for the pipeline's lifetime.
    pub fn new(store: Arc<ConfigStore>, transport: Arc<dyn HttpTransport>) -> Self {
        let snapshot = store.current();
        let cache = Arc::new(IdentifierCache::new(snapshot.routing.cache_ttl()));
        cache.apply_ttl(snapshot.version, snapshot.routing.cache_ttl());

        let per_agent_limit = snapshot.routing.per_agent_in_flight();
        if per_agent_limit >= snapshot.routing.max_in_flight && snapshot.agents.len() > 1 {
            warn!(
                max_in_flight = snapshot.routing.max_in_flight,
                per_agent_limit,
                "One unresponsive agent can hold every outbound slot"
            );
        }

        Self {
            discovery: DiscoveryClient::new(Arc::clone(&transport), Arc::clone(&cache)),
            a2a: A2AClient::new(transport),
            classifier: Arc::new(KeywordClassifier::new()),
            permits: Arc::new(Semaphore::new(snapshot.routing.max_in_flight)),
            agent_permits: Mutex::new(HashMap::new()),
            per_agent_limit,
            cache,
            store,
        }
    }

    /// Build a pipeline with a reqwest transport using the configured connect timeout
    pub fn from_store(store: Arc<ConfigStore>) -> RouterResult<Self> {
        let transport = ReqwestTransport::from_timeouts(&store.current().routing.timeouts)?;
        Ok(Self::new(store, Arc::new(transport)))
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<IdentifierCache> {
        &self.cache
    }

    /// Route one request with no overall deadline
    pub async fn run(&self, input_text: &str) -> RouterResponse {
        self.route(input_text, None).await
    }

    /// Route one request, bounded by `routing.timeouts.request_ms`.
    ///
    /// On expiry the in-flight HTTP calls are dropped and the response
    /// carries a timeout error. Nothing partial is cached.
    pub async fn run_with_timeout(&self, input_text: &str) -> RouterResponse {
        let deadline = self.store.current().routing.timeouts.request();
        self.route(input_text, Some(deadline)).await
    }

    /// Forget the stored thread for `agent_key` so the next turn starts fresh
    pub fn reset_thread(&self, agent_key: &str) -> bool {
        let cleared = self.cache.clear_thread(agent_key);
        info!(agent_key, cleared, "Conversation thread reset");
        cleared
    }

    async fn route(&self, input_text: &str, deadline: Option<Duration>) -> RouterResponse {
        let started = Instant::now();
        metrics().request_received();

        let snapshot = self.store.current();
        self.cache.apply_ttl(snapshot.version, snapshot.routing.cache_ttl());

        let span = request_span!(
            request_id = %Uuid::new_v4(),
            config_version = snapshot.version
        );

        // Classification makes no network calls, so it runs outside the deadline
        let classified = span.in_scope(|| {
            classify_stage(
                RequestContext::new(input_text),
                &snapshot,
                self.classifier.as_ref(),
            )
        });
        let agent_key = classified.agent_key.clone();
        let work = self.dispatch(classified, &snapshot).instrument(span.clone());

        let ctx = match deadline {
            None => work.await,
            Some(deadline) => match tokio::time::timeout(deadline, work).await {
                Ok(ctx) => ctx,
                Err(_) => {
                    span.in_scope(|| warn!(deadline_ms = deadline.as_millis() as u64, "Request timed out"));
                    let mut ctx = RequestContext::new(input_text);
                    ctx.agent_key = agent_key;
                    ctx.fail(RouterError::Timeout(deadline))
                }
            },
        };

        let response = ctx.into_response();
        let elapsed = started.elapsed();
        match response.error_kind() {
            None => {
                metrics().request_succeeded(elapsed);
                span.in_scope(|| {
                    info!(
                        agent_key = response.agent_key().unwrap_or_default(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Request routed"
                    )
                });
            }
            Some(kind) => {
                metrics().request_failed(kind, elapsed);
                span.in_scope(|| {
                    warn!(
                        kind = %kind,
                        message = response.error_message().unwrap_or_default(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Request failed"
                    )
                });
            }
        }

        response
    }

    /// Run every stage against `snapshot`
    pub async fn execute(&self, ctx: RequestContext, snapshot: &ConfigSnapshot) -> RequestContext {
        let ctx = classify_stage(ctx, snapshot, self.classifier.as_ref());
        self.dispatch(ctx, snapshot).await
    }

    /// Resolve, send and format a classified request.
    ///
    /// The agent's own permit is taken before a global one, so requests
    /// queued behind an unresponsive agent never hold global slots.
    pub async fn dispatch(&self, ctx: RequestContext, snapshot: &ConfigSnapshot) -> RequestContext {
        if ctx.is_failed() {
            return ctx;
        }
        let Some(agent_key) = ctx.agent_key.clone() else {
            return ctx.fail(RouterError::no_matching_agent());
        };

        // Neither semaphore is ever closed
        let agent_permits = self.agent_permits(&agent_key);
        let _agent_permit = agent_permits.acquire().await.ok();
        let _permit = self.permits.acquire().await.ok();

        let ctx = self.resolve_stage(ctx, snapshot).await;
        let ctx = self.send_stage(ctx, snapshot).await;
        format_stage(ctx)
    }

    fn agent_permits(&self, agent_key: &str) -> Arc<Semaphore> {
        let mut permits = self
            .agent_permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            permits
                .entry(agent_key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_agent_limit))),
        )
    }

    /// Resolution stage: assistant identifier and any thread to continue
    pub async fn resolve_stage(
        &self,
        mut ctx: RequestContext,
        snapshot: &ConfigSnapshot,
    ) -> RequestContext {
        if ctx.is_failed() {
            return ctx;
        }

        let Some(agent_key) = ctx.agent_key.clone() else {
            return ctx.fail(RouterError::no_matching_agent());
        };

        match self.discovery.resolve_key(&agent_key, snapshot).await {
            Ok(resolution) => {
                debug!(
                    agent_key = %agent_key,
                    assistant_id = %resolution.assistant_id,
                    source = ?resolution.source,
                    "Agent resolved"
                );
                ctx.assistant_id = Some(resolution.assistant_id);
                ctx.thread_id = resolution.thread_id;
                ctx.advance(PipelineStage::Resolved)
            }
            Err(e) => ctx.fail(e),
        }
    }

    /// Send stage: forward the input text and record the returned thread
    pub async fn send_stage(
        &self,
        mut ctx: RequestContext,
        snapshot: &ConfigSnapshot,
    ) -> RequestContext {
        if ctx.is_failed() {
            return ctx;
        }

        let (Some(agent_key), Some(assistant_id)) = (ctx.agent_key.clone(), ctx.assistant_id.clone())
        else {
            return ctx.fail(ForwardError::Malformed {
                detail: "send attempted before the agent was resolved".to_string(),
            });
        };

        let Some(agent) = snapshot.agent(&agent_key) else {
            return ctx.fail(DiscoveryError::UnknownAgent { agent_key });
        };

        let settings = TransportSettings::from_routing(&snapshot.routing);
        let result = self
            .a2a
            .send(
                &Endpoint::from(agent),
                &assistant_id,
                ctx.thread_id.as_deref(),
                &ctx.input_text,
                &settings,
            )
            .await;

        match result {
            Ok(reply) => {
                if let Some(thread_id) = &reply.thread_id {
                    self.cache
                        .record_thread(&agent_key, &assistant_id, snapshot.version, thread_id);
                }
                ctx.thread_id = reply.thread_id.or(ctx.thread_id);
                ctx.response_text = Some(reply.text);
                ctx.advance(PipelineStage::Sent)
            }
            Err(e) => {
                if e.is_not_found() {
                    warn!(agent_key = %agent_key, assistant_id = %assistant_id, "Assistant unknown to agent, invalidating cached identifier");
                    self.cache
                        .invalidate_assistant(&agent_key, &assistant_id, snapshot.version);
                }
                ctx.fail(e)
            }
        }
    }
}
