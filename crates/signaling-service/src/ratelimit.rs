//! Sharded fixed-window rate limiter.
//!
//! Each shard is a single-writer task that owns the buckets for the keys
//! hashing to it, so concurrent checks on one key serialize through that
//! shard's mailbox and counts cannot be lost. Requests travel over mpsc
//! with a oneshot reply, mirroring the actor handles elsewhere in this
//! service.

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 8;

/// Per-shard mailbox depth.
const SHARD_CHANNEL_BUFFER: usize = 256;

/// How often each shard sweeps stale buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of a rate-limit check, also serialized into HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window resets.
    pub reset_at: i64,
}

/// Error type for limiter calls.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The owning shard is gone; the caller should fail closed with 503.
    #[error("rate limiter unavailable")]
    Unavailable,
}

struct CheckRequest {
    key: String,
    max: u32,
    window: Duration,
    respond_to: oneshot::Sender<RateLimitDecision>,
}

struct Bucket {
    count: u32,
    window_started: Instant,
    /// Wall-clock twin of `window_started`, used for the wire-visible reset.
    window_started_ms: i64,
    window: Duration,
}

/// Handle to the sharded limiter. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    shards: Vec<mpsc::Sender<CheckRequest>>,
}

impl RateLimiter {
    /// Spawn the shard tasks and return a handle.
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);

        for shard_id in 0..shard_count {
            let (sender, receiver) = mpsc::channel(SHARD_CHANNEL_BUFFER);
            tokio::spawn(run_shard(shard_id, receiver));
            shards.push(sender);
        }

        Self { shards }
    }

    /// Check (and count) one hit against `key`'s fixed window.
    ///
    /// # Errors
    ///
    /// `RateLimitError::Unavailable` when the shard task is gone.
    pub async fn check(
        &self,
        key: &str,
        max: u32,
        window_secs: u64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let shard = &self.shards[shard_index(key, self.shards.len())];
        let (tx, rx) = oneshot::channel();

        shard
            .send(CheckRequest {
                key: key.to_string(),
                max,
                window: Duration::from_secs(window_secs),
                respond_to: tx,
            })
            .await
            .map_err(|_| RateLimitError::Unavailable)?;

        rx.await.map_err(|_| RateLimitError::Unavailable)
    }
}

fn shard_index(key: &str, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    {
        (hasher.finish() as usize) % shard_count
    }
}

async fn run_shard(shard_id: usize, mut receiver: mpsc::Receiver<CheckRequest>) {
    let mut buckets: HashMap<String, Bucket> = HashMap::new();
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    debug!(target: "signal.ratelimit", shard_id, "rate limiter shard started");

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let now = Instant::now();
                let before = buckets.len();
                buckets.retain(|_, b| now.duration_since(b.window_started) < b.window * 2);
                let swept = before - buckets.len();
                if swept > 0 {
                    debug!(target: "signal.ratelimit", shard_id, swept, "swept stale buckets");
                }
            }

            req = receiver.recv() => {
                let Some(req) = req else {
                    debug!(target: "signal.ratelimit", shard_id, "shard channel closed, exiting");
                    break;
                };
                let decision = apply(&mut buckets, &req, Instant::now());
                if req.respond_to.send(decision).is_err() {
                    warn!(target: "signal.ratelimit", shard_id, "caller went away before decision");
                }
            }
        }
    }
}

fn apply(buckets: &mut HashMap<String, Bucket>, req: &CheckRequest, now: Instant) -> RateLimitDecision {
    let bucket = buckets.entry(req.key.clone()).or_insert_with(|| Bucket {
        count: 0,
        window_started: now,
        window_started_ms: chrono::Utc::now().timestamp_millis(),
        window: req.window,
    });

    // Window elapsed: reset in place
    if now.duration_since(bucket.window_started) >= req.window {
        bucket.count = 0;
        bucket.window_started = now;
        bucket.window_started_ms = chrono::Utc::now().timestamp_millis();
    }
    bucket.window = req.window;

    #[allow(clippy::cast_possible_wrap)]
    let reset_at = bucket.window_started_ms + req.window.as_millis() as i64;

    if bucket.count < req.max {
        bucket.count += 1;
        metrics::counter!("signal_rate_limit_checks_total", "outcome" => "allowed").increment(1);
        RateLimitDecision {
            allowed: true,
            remaining: req.max - bucket.count,
            reset_at,
        }
    } else {
        metrics::counter!("signal_rate_limit_checks_total", "outcome" => "denied").increment(1);
        RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at,
        }
    }
}
