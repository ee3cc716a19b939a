//! Symposium LLM - Model Backend Abstraction
//!
//! One narrow async trait seam between agent runtimes and whatever language
//! model serves them, plus an HTTP-backed production implementation and the
//! deterministic test doubles the coordination tests are written against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

// ============================================================================
// GENERATION PARAMETERS
// ============================================================================

/// Knobs forwarded to the model backend with every generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Stop sequences; empty means backend default
    pub stop: Vec<String>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }
}

// ============================================================================
// FAILURE TAXONOMY
// ============================================================================

/// Why a single model call failed. The coordinator's retry policy branches
/// on the variant: RateLimited is retried once, Timeout and ModelError never.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelFailure {
    #[error("Rate limited by backend (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: i64 },

    #[error("Model call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: i64 },

    #[error("Model error: {detail}")]
    ModelError { detail: String },

    #[error("Backend unavailable: {name}")]
    BackendUnavailable { name: String },
}

impl ModelFailure {
    /// Whether the coordinator may retry this failure within the turn deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelFailure::RateLimited { .. })
    }
}

impl From<ModelFailure> for symposium_core::SymposiumError {
    fn from(failure: ModelFailure) -> Self {
        symposium_core::SymposiumError::Model {
            detail: failure.to_string(),
        }
    }
}

/// Result type for model backend calls.
pub type ModelResult<T> = Result<T, ModelFailure>;

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// The seam between agent runtimes and the model serving them.
/// Implementations must be cheap to share behind an `Arc`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str, params: &GenerateParams) -> ModelResult<String>;

    /// Stable identifier for logging and registry lookup.
    fn backend_id(&self) -> &str;
}

// ============================================================================
// BACKEND REGISTRY
// ============================================================================

/// Named backends plus a default, resolved at agent creation time.
pub struct BackendRegistry {
    default: Option<Arc<dyn ModelBackend>>,
    named: HashMap<String, Arc<dyn ModelBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            default: None,
            named: HashMap::new(),
        }
    }

    /// Set the backend used when no name is given.
    pub fn set_default(&mut self, backend: Arc<dyn ModelBackend>) {
        self.default = Some(backend);
    }

    /// Register a backend under its own `backend_id`.
    pub fn register(&mut self, backend: Arc<dyn ModelBackend>) {
        self.named.insert(backend.backend_id().to_string(), backend);
    }

    /// Resolve a backend by name, or the default when `name` is None.
    pub fn resolve(&self, name: Option<&str>) -> ModelResult<Arc<dyn ModelBackend>> {
        match name {
            Some(n) => self.named.get(n).cloned().ok_or_else(|| {
                ModelFailure::BackendUnavailable {
                    name: n.to_string(),
                }
            }),
            None => self
                .default
                .clone()
                .ok_or_else(|| ModelFailure::BackendUnavailable {
                    name: "default".to_string(),
                }),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.named.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("has_default", &self.default.is_some())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// HTTP BACKEND
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    completion: String,
}

/// Production backend speaking a simple JSON completion protocol over HTTP.
///
/// Maps transport outcomes onto the failure taxonomy: HTTP 429 becomes
/// RateLimited (honoring a `Retry-After` header when present), request
/// timeouts become Timeout, everything else a ModelError.
pub struct HttpModelBackend {
    backend_id: String,
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpModelBackend {
    pub fn new(
        backend_id: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn retry_after_ms(response: &reqwest::Response) -> i64 {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000)
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    async fn generate(&self, prompt: &str, params: &GenerateParams) -> ModelResult<String> {
        let started = std::time::Instant::now();

        let body = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stop: &params.stop,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelFailure::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as i64,
                }
            } else if e.is_connect() {
                ModelFailure::BackendUnavailable {
                    name: self.backend_id.clone(),
                }
            } else {
                ModelFailure::ModelError {
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelFailure::RateLimited {
                retry_after_ms: Self::retry_after_ms(&response),
            });
        }
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            return Err(ModelFailure::Timeout {
                elapsed_ms: started.elapsed().as_millis() as i64,
            });
        }
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return Err(ModelFailure::ModelError { detail });
        }

        let parsed: CompletionResponse =
            response.json().await.map_err(|e| ModelFailure::ModelError {
                detail: format!("malformed completion body: {}", e),
            })?;
        Ok(parsed.completion)
    }

    fn backend_id(&self) -> &str {
        &self.backend_id
    }
}

// ============================================================================
// DETERMINISTIC TEST DOUBLES
// ============================================================================

/// Deterministic backend: same prompt in, same text out. Answers echo a
/// bounded prefix of the prompt so assertions can inspect what the agent
/// actually asked.
pub struct MockModelBackend {
    backend_id: String,
    prefix: String,
}

impl MockModelBackend {
    pub fn new() -> Self {
        Self {
            backend_id: "mock".to_string(),
            prefix: "Answering".to_string(),
        }
    }

    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = backend_id.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl Default for MockModelBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    async fn generate(&self, prompt: &str, _params: &GenerateParams) -> ModelResult<String> {
        let snippet: String = prompt.chars().take(120).collect();
        Ok(format!("{}: {}", self.prefix, snippet))
    }

    fn backend_id(&self) -> &str {
        &self.backend_id
    }
}

/// Scripted backend: pops a queued outcome per call, so tests can drive
/// exact success/failure sequences (e.g. rate-limit then success) without a
/// live model. Records every prompt it sees.
pub struct ScriptedModelBackend {
    backend_id: String,
    outcomes: Mutex<VecDeque<ModelResult<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModelBackend {
    pub fn new(outcomes: Vec<ModelResult<String>>) -> Self {
        Self {
            backend_id: "scripted".to_string(),
            outcomes: Mutex::new(outcomes.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = backend_id.into();
        self
    }

    /// Number of generate calls seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts seen so far, in call order.
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for ScriptedModelBackend {
    async fn generate(&self, prompt: &str, _params: &GenerateParams) -> ModelResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.outcomes.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| {
            Err(ModelFailure::ModelError {
                detail: "script exhausted".to_string(),
            })
        })
    }

    fn backend_id(&self) -> &str {
        &self.backend_id
    }
}

// ============================================================================
// TEXT OVERLAP
// ============================================================================

/// Jaccard similarity over lowercase word sets.
/// Returns 1.0 when both texts are empty, 0.0 when only one is.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a: std::collections::HashSet<String> = a
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    let words_b: std::collections::HashSet<String> = b
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Mean pairwise Jaccard overlap across a slice of texts.
/// Returns 1.0 for fewer than two texts (a lone answer agrees with itself).
pub fn mean_pairwise_overlap(texts: &[&str]) -> f64 {
    if texts.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..texts.len() {
        for j in (i + 1)..texts.len() {
            total += word_overlap(texts[i], texts[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Overlap is bounded to [0, 1] and symmetric for any inputs.
        #[test]
        fn prop_overlap_bounded_and_symmetric(
            a in "[a-z ]{0,60}",
            b in "[a-z ]{0,60}",
        ) {
            let ab = word_overlap(&a, &b);
            let ba = word_overlap(&b, &a);
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert!((ab - ba).abs() < f64::EPSILON);
        }

        /// A text always has maximal overlap with itself.
        #[test]
        fn prop_overlap_reflexive(a in "[a-z ]{1,60}") {
            prop_assert!((word_overlap(&a, &a) - 1.0).abs() < f64::EPSILON);
        }

        /// Mean pairwise overlap stays within [0, 1] for any group size.
        #[test]
        fn prop_mean_overlap_bounded(texts in prop::collection::vec("[a-z ]{0,40}", 0..6)) {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let mean = mean_pairwise_overlap(&refs);
            prop_assert!((0.0..=1.0).contains(&mean));
        }
    }
}
