#![warn(missing_docs)]
//! # inkly-session
//!
//! ## Purpose
//! Holds the similarity scores shown for one job: the base set from the first
//! analysis and the rewrite set from the latest practice round.
//!
//! ## Responsibilities
//! - Keep base and rewrite sets apart; a rewrite never merges into base.
//! - Pick the active set for display (latest attempt wins).
//! - Derive the aggregate percentage and chart series.
//!
//! ## Data flow
//! Analysis results -> [`MetricsSession::record_base`] /
//! [`MetricsSession::record_rewrite`] -> [`MetricsSession::active_metrics`],
//! [`MetricsSession::average_similarity`], [`MetricsSession::comparison`].
//!
//! ## Ownership and lifetimes
//! The session owns both sets by value. One session belongs to one active job
//! and is reset when the job changes.
//!
//! ## Error model
//! No operation fails. Missing metrics render as `0.0`.

use inkly_core::{MetricName, MetricSet};
use serde::Serialize;

/// Which score set currently drives the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// Original sample against the generated artifact.
    Base,
    /// Latest practice attempt against the same baseline.
    Rewrite,
}

/// Base and optional rewrite series for an overlaid chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricComparison {
    /// Axis labels in vocabulary order.
    pub labels: [&'static str; 5],
    /// Base scores, `0.0` for missing.
    pub base: [f64; 5],
    /// Rewrite scores when a practice round has been scored.
    pub rewrite: Option<[f64; 5]>,
}

/// Per-job score state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSession {
    job_id: Option<String>,
    base: MetricSet,
    rewrite: MetricSet,
}

impl MetricsSession {
    /// Creates an empty session not bound to any job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty session for `job_id`.
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::default()
        }
    }

    /// Job the scores belong to.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Binds the session to `job_id`, clearing both sets when the job changes.
    ///
    /// Returns `true` when the session was reset.
    pub fn reset_for_job(&mut self, job_id: &str) -> bool {
        if self.job_id.as_deref() == Some(job_id) {
            return false;
        }
        tracing::debug!(previous = ?self.job_id, job_id, "resetting metrics for new job");
        self.job_id = Some(job_id.to_string());
        self.base = MetricSet::new();
        self.rewrite = MetricSet::new();
        true
    }

    /// Stores the base set from the first analysis of the job.
    pub fn record_base(&mut self, metrics: MetricSet) {
        if !self.base.is_empty() {
            tracing::debug!(job_id = ?self.job_id, "replacing base metrics");
        }
        self.base = metrics;
    }

    /// Stores the set from the latest practice round, replacing any earlier one.
    pub fn record_rewrite(&mut self, metrics: MetricSet) {
        self.rewrite = metrics;
    }

    /// Drops the practice round scores.
    pub fn clear_rewrite(&mut self) {
        self.rewrite = MetricSet::new();
    }

    /// Base scores.
    pub fn base(&self) -> &MetricSet {
        &self.base
    }

    /// Latest practice scores, if any.
    pub fn rewrite(&self) -> Option<&MetricSet> {
        (!self.rewrite.is_empty()).then_some(&self.rewrite)
    }

    /// Rewrite when non-empty, otherwise base.
    pub fn active_metrics(&self) -> &MetricSet {
        match self.active_source() {
            MetricSource::Rewrite => &self.rewrite,
            MetricSource::Base => &self.base,
        }
    }

    /// Source of [`MetricsSession::active_metrics`].
    pub fn active_source(&self) -> MetricSource {
        if self.rewrite.is_empty() {
            MetricSource::Base
        } else {
            MetricSource::Rewrite
        }
    }

    /// Mean of the active scores as a percentage, one decimal place.
    ///
    /// `0.0` when no scores are present.
    pub fn average_similarity(&self) -> f64 {
        self.active_metrics()
            .mean()
            .map(|mean| round_one_decimal(mean * 100.0))
            .unwrap_or(0.0)
    }

    /// Active scores in vocabulary order.
    pub fn chart_values(&self) -> [f64; 5] {
        self.active_metrics().chart_values()
    }

    /// Base and rewrite series for overlaid display.
    pub fn comparison(&self) -> MetricComparison {
        MetricComparison {
            labels: MetricName::ALL.map(MetricName::localized_label),
            base: self.base.chart_values(),
            rewrite: self.rewrite().map(MetricSet::chart_values),
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
