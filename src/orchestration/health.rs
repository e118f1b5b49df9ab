//! Post-load health assessment.
//!
//! A run is healthy when at least one unit is active afterwards and no
//! required unit in the plan was left inactive. The check also cross-checks
//! the report against the activation cache.

use serde::{Deserialize, Serialize};

use super::cache::ActivationCache;
use super::loader::{LoadPlan, OrchestrationReport};
use crate::{shlog, shlog_error, shlog_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub active_count: usize,
    /// Required units in the plan that are not active.
    pub missing_required: Vec<String>,
    /// Units reported active that the cache does not hold.
    pub inconsistent: Vec<String>,
}

pub fn assess(
    plan: &LoadPlan,
    report: &OrchestrationReport,
    cache: &ActivationCache,
) -> HealthReport {
    let active_count = report.active_count();

    let missing_required: Vec<String> = plan
        .units()
        .filter(|u| u.required && !cache.is_active(&u.name))
        .map(|u| u.name.clone())
        .collect();

    let inconsistent: Vec<String> = report
        .details
        .iter()
        .filter(|r| r.status.is_active() && !cache.is_active(&r.name))
        .map(|r| r.name.clone())
        .collect();

    if active_count == 0 {
        shlog_error!("Health check: no units are active after run {}", report.run_id);
    }
    for name in &missing_required {
        shlog_error!("CRITICAL: required unit {} is not active", name);
    }
    for name in &inconsistent {
        shlog_warn!("Health check: {} reported active but not in the cache", name);
    }

    let healthy = active_count > 0 && missing_required.is_empty();
    if healthy {
        shlog!("Health check passed: {} units active", active_count);
    }

    HealthReport {
        healthy,
        active_count,
        missing_required,
        inconsistent,
    }
}
