//! Optional advisory service for fitness weights and mutation strategy.
//!
//! The optimizer receives an [`Advisor`] at construction. Every call may
//! return `None`, and the optimizer then falls back to its deterministic
//! defaults. [`NoAdvisor`] never suggests anything; [`HttpAdvisor`] asks a
//! remote service over HTTP with a hard timeout.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::genome::{OperationFocus, PopulationStats};
use crate::metrics::MetricsBreakdown;

/// Smallest and largest mutation rate modifier an advisor may suggest.
pub const RATE_MODIFIER_RANGE: (f64, f64) = (-0.05, 0.2);

/// Aggregate facts about a packing problem, sent when asking for weights.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Total item volume over container volume, capped at 1.0.
    pub estimated_utilization: f64,
    pub item_count: usize,
    pub container_volume: f64,
    pub weight_capacity: Option<f64>,
    pub has_temperature_sensitive: bool,
    /// Metrics of the current best genome, when re-weighting mid-run.
    pub current: Option<MetricsBreakdown>,
}

/// A suggested mutation rate change and operator focus.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StrategySuggestion {
    pub rate_modifier: f64,
    pub focus: OperationFocus,
}

impl StrategySuggestion {
    /// `None` for non-finite modifiers; finite ones are clamped to
    /// [`RATE_MODIFIER_RANGE`].
    pub fn sanitized(self) -> Option<Self> {
        if !self.rate_modifier.is_finite() {
            return None;
        }
        let (lo, hi) = RATE_MODIFIER_RANGE;
        Some(Self {
            rate_modifier: self.rate_modifier.clamp(lo, hi),
            focus: self.focus,
        })
    }
}

/// Source of fitness weights and mutation strategies.
///
/// Implementations must be safe to ignore: returning `None` is always
/// acceptable and means "no suggestion".
pub trait Advisor: Send + Sync {
    fn suggest_fitness_weights(&self, _summary: &MetricsSummary) -> Option<HashMap<String, f64>> {
        None
    }

    fn suggest_mutation_strategy(
        &self,
        _generation: usize,
        _stats: &PopulationStats,
        _stagnation: usize,
    ) -> Option<StrategySuggestion> {
        None
    }
}

/// Advisor that never suggests anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAdvisor;

impl Advisor for NoAdvisor {}

#[derive(Debug, Error)]
enum AdvisorError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service answered with status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("runtime is gone")]
    RuntimeGone,
}

/// Extra wait on top of the request timeout before giving up on the runtime.
const RESPONSE_GRACE: Duration = Duration::from_millis(250);

fn user_agent() -> String {
    format!("stowage/{}", env!("CARGO_PKG_VERSION"))
}

/// Advisor backed by a remote HTTP service.
///
/// Expects `POST {base}/fitness-weights` and `POST {base}/mutation-strategy`
/// to answer with JSON. Requests run as tasks on `handle` while the calling
/// thread waits for the answer. Prefer calling from a blocking context such
/// as `tokio::task::spawn_blocking`. On a multi-threaded runtime worker the
/// wait moves off the worker; on a current-thread runtime the request cannot
/// make progress and the call ends with a timeout.
#[derive(Clone, Debug)]
pub struct HttpAdvisor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    handle: Handle,
}

impl HttpAdvisor {
    pub fn new(base_url: impl Into<String>, timeout: Duration, handle: Handle) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            handle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str, payload: &Value) -> Result<Value, AdvisorError> {
        let url = format!("{}/{}", self.base_url, path);
        let request = self.client.post(&url).json(payload);
        let timeout = self.timeout;

        let (tx, rx) = mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let exchange = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(AdvisorError::Status(status));
                }
                let body = response.text().await?;
                let value = serde_json::from_str::<Value>(&body)
                    .map_err(|err| AdvisorError::Malformed(err.to_string()))?;
                Ok::<Value, AdvisorError>(value)
            };
            let outcome = match tokio::time::timeout(timeout, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AdvisorError::Timeout(timeout)),
            };
            // The caller may have given up already.
            let _ = tx.send(outcome);
        });

        let wait = || match rx.recv_timeout(timeout + RESPONSE_GRACE) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(AdvisorError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(AdvisorError::RuntimeGone),
        };
        match Handle::try_current().map(|current| current.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(wait),
            _ => wait(),
        }
    }
}

impl Advisor for HttpAdvisor {
    fn suggest_fitness_weights(&self, summary: &MetricsSummary) -> Option<HashMap<String, f64>> {
        let payload = match serde_json::to_value(summary) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, "could not encode metrics summary for the advisor");
                return None;
            }
        };
        match self.post("fitness-weights", &payload) {
            Ok(body) => {
                let weights = parse_weights(&body);
                if weights.is_none() {
                    tracing::warn!("advisor returned no usable fitness weights");
                }
                weights
            }
            Err(err) => {
                tracing::warn!(%err, url = %self.base_url, "fitness weight request failed");
                None
            }
        }
    }

    fn suggest_mutation_strategy(
        &self,
        generation: usize,
        stats: &PopulationStats,
        stagnation: usize,
    ) -> Option<StrategySuggestion> {
        let payload = json!({
            "generation": generation,
            "population": stats,
            "stagnation": stagnation,
        });
        match self.post("mutation-strategy", &payload) {
            Ok(body) => {
                let strategy = parse_strategy(&body);
                if strategy.is_none() {
                    tracing::warn!("advisor returned a malformed mutation strategy");
                }
                strategy
            }
            Err(err) => {
                tracing::warn!(%err, url = %self.base_url, "mutation strategy request failed");
                None
            }
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// Extracts a weight mapping from `{"weights": {...}}` or a bare object.
///
/// Non-numeric entries are dropped; `None` if nothing numeric remains.
pub fn parse_weights(body: &Value) -> Option<HashMap<String, f64>> {
    let object = body
        .get("weights")
        .and_then(Value::as_object)
        .or_else(|| body.as_object())?;
    let weights: HashMap<String, f64> = object
        .iter()
        .filter_map(|(key, value)| as_number(value).map(|v| (key.clone(), v)))
        .collect();
    (!weights.is_empty()).then_some(weights)
}

/// Extracts a strategy from
/// `{"rate_modifier": 0.1, "operation_focus": "swap"}`.
pub fn parse_strategy(body: &Value) -> Option<StrategySuggestion> {
    let rate_modifier = body
        .get("rate_modifier")
        .or_else(|| body.get("mutation_rate_modifier"))
        .and_then(as_number)?;
    let focus = body
        .get("operation_focus")
        .or_else(|| body.get("focus"))
        .and_then(Value::as_str)?
        .parse::<OperationFocus>()
        .ok()?;
    StrategySuggestion {
        rate_modifier,
        focus,
    }
    .sanitized()
}
