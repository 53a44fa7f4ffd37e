//! Prometheus metrics for a polling node.
//!
//! [`PollerMetrics`] owns a dedicated [`Registry`] covering poll creation and
//! completion, tallied votes and inbound message traffic. [`encode`] renders
//! it in the Prometheus text exposition format.
//!
//! [`encode`]: PollerMetrics::encode

use std::time::Duration;

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use lcap_poller::{Poll, Role};

use crate::NodeError;

/// Central collection of poll-level Prometheus metrics.
pub struct PollerMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Polls registered, labelled by role.
    pub polls_created: IntCounterVec,
    /// Polls that closed without an error.
    pub polls_completed: IntCounter,
    /// Polls that closed in an error state.
    pub polls_errored: IntCounter,
    /// Votes counted by this node's poller polls.
    pub votes_tallied: IntCounter,
    /// Inbound protocol messages, labelled by opcode.
    pub messages_received: IntCounterVec,
    /// Inbound messages the poll manager refused.
    pub messages_rejected: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Polls currently registered as active.
    pub active_polls: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time from registration to close, in seconds.
    pub poll_duration_seconds: Histogram,
}

impl PollerMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_created = register_int_counter_vec_with_registry!(
            Opts::new("lcap_polls_created_total", "Polls registered by this node"),
            &["role"],
            registry
        )?;
        let polls_completed = register_int_counter_with_registry!(
            Opts::new("lcap_polls_completed_total", "Polls closed without error"),
            registry
        )?;
        let polls_errored = register_int_counter_with_registry!(
            Opts::new("lcap_polls_errored_total", "Polls closed in an error state"),
            registry
        )?;
        let votes_tallied = register_int_counter_with_registry!(
            Opts::new("lcap_votes_tallied_total", "Votes counted by poller polls"),
            registry
        )?;
        let messages_received = register_int_counter_vec_with_registry!(
            Opts::new("lcap_messages_received_total", "Inbound protocol messages"),
            &["opcode"],
            registry
        )?;
        let messages_rejected = register_int_counter_with_registry!(
            Opts::new(
                "lcap_messages_rejected_total",
                "Inbound messages refused by the poll manager"
            ),
            registry
        )?;
        let active_polls = register_int_gauge_with_registry!(
            Opts::new("lcap_active_polls", "Polls currently active"),
            registry
        )?;
        let poll_duration_seconds = register_histogram_with_registry!(
            HistogramOpts::new("lcap_poll_duration_seconds", "Time from poll registration to close")
                .buckets(prometheus::exponential_buckets(0.01, 4.0, 12)?),
            registry
        )?;

        Ok(Self {
            registry,
            polls_created,
            polls_completed,
            polls_errored,
            votes_tallied,
            messages_received,
            messages_rejected,
            active_polls,
            poll_duration_seconds,
        })
    }

    pub fn poll_created(&self, role: Role) {
        let role = role.to_string();
        self.polls_created.with_label_values(&[role.as_str()]).inc();
    }

    /// Record a closed poll.
    pub fn poll_closed(&self, poll: &Poll, elapsed: Duration) {
        if poll.is_error_state() {
            self.polls_errored.inc();
        } else {
            self.polls_completed.inc();
        }
        if poll.role() == Role::Poller {
            self.votes_tallied.inc_by(poll.tally().vote_count() as u64);
        }
        self.poll_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn set_active_polls(&self, count: usize) {
        self.active_polls.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| NodeError::Config(e.to_string()))
    }
}
