//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for kbgate:
//! - Invocation counts and latency by outcome status
//! - Retrieval counts and latency by outcome
//! - Tenant rejections by reason
//! - Model and tool call counts
//! - Session resume outcomes

use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for kbgate
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Invocations handled, by HTTP status
    pub invocations_total: CounterVec,
    /// End-to-end invocation duration
    pub invocation_duration_seconds: Histogram,

    /// Knowledge base retrievals, by outcome
    pub retrievals_total: CounterVec,
    /// Knowledge base retrieval duration
    pub retrieval_duration_seconds: Histogram,

    /// Requests rejected for lack of a trusted tenant, by reason
    pub tenant_rejections_total: CounterVec,

    /// Model calls, by outcome
    pub model_calls_total: CounterVec,
    /// Tool calls, by tool and outcome
    pub tool_calls_total: CounterVec,

    /// Session resume attempts, by outcome
    pub session_resumes_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let invocations_total = CounterVec::new(
            Opts::new("kbgate_invocations_total", "Total number of invocations"),
            &["status"],
        )?;

        let invocation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kbgate_invocation_duration_seconds",
                "Invocation duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        let retrievals_total = CounterVec::new(
            Opts::new(
                "kbgate_retrievals_total",
                "Total number of knowledge base retrievals",
            ),
            &["outcome"],
        )?;

        let retrieval_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kbgate_retrieval_duration_seconds",
                "Knowledge base retrieval duration in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let tenant_rejections_total = CounterVec::new(
            Opts::new(
                "kbgate_tenant_rejections_total",
                "Requests rejected because no trusted tenant could be resolved",
            ),
            &["reason"],
        )?;

        let model_calls_total = CounterVec::new(
            Opts::new("kbgate_model_calls_total", "Total number of model calls"),
            &["outcome"],
        )?;

        let tool_calls_total = CounterVec::new(
            Opts::new("kbgate_tool_calls_total", "Total number of tool calls"),
            &["tool", "outcome"],
        )?;

        let session_resumes_total = CounterVec::new(
            Opts::new(
                "kbgate_session_resumes_total",
                "Session resume attempts by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(invocations_total.clone()))?;
        registry.register(Box::new(invocation_duration_seconds.clone()))?;
        registry.register(Box::new(retrievals_total.clone()))?;
        registry.register(Box::new(retrieval_duration_seconds.clone()))?;
        registry.register(Box::new(tenant_rejections_total.clone()))?;
        registry.register(Box::new(model_calls_total.clone()))?;
        registry.register(Box::new(tool_calls_total.clone()))?;
        registry.register(Box::new(session_resumes_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            invocations_total,
            invocation_duration_seconds,
            retrievals_total,
            retrieval_duration_seconds,
            tenant_rejections_total,
            model_calls_total,
            tool_calls_total,
            session_resumes_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished invocation
    pub fn record_invocation(&self, status: u16, duration_secs: f64) {
        self.invocations_total
            .with_label_values(&[status.to_string().as_str()])
            .inc();
        self.invocation_duration_seconds.observe(duration_secs);
    }

    /// Record a knowledge base retrieval
    pub fn record_retrieval(&self, outcome: &str, duration_secs: f64) {
        self.retrievals_total.with_label_values(&[outcome]).inc();
        self.retrieval_duration_seconds.observe(duration_secs);
    }

    /// Record a request rejected before any downstream call
    pub fn record_tenant_rejection(&self, reason: &str) {
        self.tenant_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_model_call(&self, outcome: &str) {
        self.model_calls_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_tool_call(&self, tool: &str, outcome: &str) {
        self.tool_calls_total
            .with_label_values(&[tool, outcome])
            .inc();
    }

    /// Record what happened to a stored session: `resumed`, `expired` or `fresh`
    pub fn record_session_resume(&self, outcome: &str) {
        self.session_resumes_total
            .with_label_values(&[outcome])
            .inc();
    }
}
