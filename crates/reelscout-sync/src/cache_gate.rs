//! Decides whether a run is needed given the last recorded run of the same kind.

use chrono::{DateTime, Duration, Utc};
use reelscout_core::RunMetadata;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    NoPriorRun,
    ConfigChanged,
    Expired,
    Fresh,
}

impl CacheState {
    pub fn is_valid(&self) -> bool {
        matches!(self, CacheState::Fresh)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CacheState::NoPriorRun => "no prior run recorded",
            CacheState::ConfigChanged => "configuration fingerprint changed since last run",
            CacheState::Expired => "last run is older than the cache ttl",
            CacheState::Fresh => "last run is within the cache ttl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "state", rename_all = "snake_case")]
pub enum GateDecision {
    /// Force flag set; no checks were made.
    Forced,
    Proceed(CacheState),
    Skip(CacheState),
}

impl GateDecision {
    pub fn should_run(&self) -> bool {
        !matches!(self, GateDecision::Skip(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GateDecision::Forced => "forced run bypasses the cache gate",
            GateDecision::Proceed(state) | GateDecision::Skip(state) => state.reason(),
        }
    }
}

pub fn cache_state(
    prior: Option<&RunMetadata>,
    fingerprint: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> CacheState {
    let Some(prior) = prior else {
        return CacheState::NoPriorRun;
    };
    if prior.fingerprint != fingerprint {
        return CacheState::ConfigChanged;
    }
    if now - prior.last_run_at >= ttl {
        return CacheState::Expired;
    }
    CacheState::Fresh
}

pub fn evaluate(
    prior: Option<&RunMetadata>,
    fingerprint: &str,
    ttl: Duration,
    now: DateTime<Utc>,
    force: bool,
) -> GateDecision {
    if force {
        return GateDecision::Forced;
    }
    match cache_state(prior, fingerprint, ttl, now) {
        state if state.is_valid() => GateDecision::Skip(state),
        state => GateDecision::Proceed(state),
    }
}
