//! Parameter operations: read, write-then-verify, batch apply, full refresh.
//!
//! Every operation follows the same shape: register interest with the pending
//! registry, transmit, then await the autopilot's PARAM_VALUE (routed in by
//! the dispatch loop) under a deadline. Correlation is by parameter name only,
//! which is all the protocol offers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::connection::LinkShared;
use crate::cache::ParamRecord;
use crate::error::OperationError;
use crate::link::wire::{self, WireType};

/// Writes the autopilot couples to another parameter: changing the trigger
/// only takes effect after the companion is set too. Currently just the PX4
/// airframe selection, which needs SYS_AUTOCONFIG=1 to apply on next boot.
const COMPANION_WRITES: &[(&str, &str, f64)] = &[("SYS_AUTOSTART", "SYS_AUTOCONFIG", 1.0)];

/// Per-call knobs for [`crate::client::Px4Client::write`]. `None` fields fall
/// back to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub verify: Option<bool>,
    pub timeout: Option<Duration>,
    /// Client-side bounds checked before anything is transmitted.
    pub range: Option<(f64, f64)>,
}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// The parameter as the autopilot reports it after the write.
    pub record: ParamRecord,
    /// Set when a best-effort companion write failed; the primary write
    /// itself succeeded.
    pub warning: Option<String>,
}

/// Result of a batch apply. Failures don't abort the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub applied: Vec<(String, f64)>,
    pub failed: Vec<(String, String)>,
}

/// Result of waiting for the parameter list to stop growing.
#[derive(Debug, Clone, Copy)]
pub struct StableOutcome {
    pub count: usize,
    pub stabilized: bool,
}

/// Cached read with network fallback.
pub(crate) async fn read(
    shared: &Arc<LinkShared>,
    name: &str,
    timeout: Duration,
) -> Result<ParamRecord, OperationError> {
    if let Some(record) = shared.cache.get(name) {
        return Ok(record);
    }
    read_fresh(shared, name, timeout).await
}

/// Read straight from the autopilot, bypassing the cache.
pub(crate) async fn read_fresh(
    shared: &Arc<LinkShared>,
    name: &str,
    timeout: Duration,
) -> Result<ParamRecord, OperationError> {
    if !shared.is_connected() {
        return Err(OperationError::NotConnected);
    }
    let ticket = shared.pending.join_read(name);
    if let Err(e) = shared.send_request_read(name) {
        shared.pending.cancel(name, ticket.waiter);
        return Err(e);
    }
    match tokio::time::timeout(timeout, ticket.rx).await {
        Ok(Ok(record)) => Ok(record),
        // Sender dropped: the link went down while we were waiting.
        Ok(Err(_)) => Err(OperationError::NotConnected),
        Err(_) => {
            shared.pending.cancel(name, ticket.waiter);
            if shared.cache.list_complete() && shared.cache.get(name).is_none() {
                // The full list is in and the name is not on it.
                Err(OperationError::UnknownParameter(name.to_string()))
            } else {
                Err(OperationError::Timeout {
                    elapsed: timeout,
                    partial: false,
                })
            }
        }
    }
}

/// Write a parameter, optionally verifying with a fresh read, and fire any
/// coupled companion write afterwards.
pub(crate) async fn write(
    shared: &Arc<LinkShared>,
    name: &str,
    value: f64,
    range: Option<(f64, f64)>,
    verify: bool,
    timeout: Duration,
) -> Result<WriteOutcome, OperationError> {
    if !shared.is_connected() {
        return Err(OperationError::NotConnected);
    }
    if let Some((min, max)) = range {
        if value < min || value > max {
            return Err(OperationError::InvalidValue {
                name: name.to_string(),
                value,
                min,
                max,
                suggested: value.clamp(min, max),
            });
        }
    }

    let record = write_once(shared, name, value, verify, timeout).await?;

    let mut warning = None;
    for (trigger, companion, companion_value) in COMPANION_WRITES {
        if name != *trigger {
            continue;
        }
        debug!("{} changed, also setting {} = {}", trigger, companion, companion_value);
        if let Err(e) = write_once(shared, companion, *companion_value, false, timeout).await {
            let msg = format!(
                "{} was set, but the companion write {} = {} failed: {}",
                trigger, companion, companion_value, e
            );
            warn!("{}", msg);
            warning = Some(msg);
        }
    }

    Ok(WriteOutcome { record, warning })
}

async fn write_once(
    shared: &Arc<LinkShared>,
    name: &str,
    value: f64,
    verify: bool,
    timeout: Duration,
) -> Result<ParamRecord, OperationError> {
    // Reuse the cached declared type; a parameter never seen yet is assumed
    // REAL32, which PX4 accepts for float-typed parameters and rejects (with
    // no echo) otherwise.
    let wire_type = shared
        .cache
        .get(name)
        .map(|r| r.wire_type)
        .unwrap_or(WireType::Real32);

    let raw = wire::encode_value(wire_type, value).map_err(|e| OperationError::InvalidValue {
        name: name.to_string(),
        value,
        min: e.min,
        max: e.max,
        suggested: e.suggested,
    })?;

    let ticket = shared.pending.begin_write(name)?;
    if let Err(e) = shared.send_param_set(name, raw, wire_type) {
        shared.pending.cancel(name, ticket.waiter);
        return Err(e);
    }

    let echoed = match tokio::time::timeout(timeout, ticket.rx).await {
        Ok(Ok(record)) => record,
        Ok(Err(_)) => return Err(OperationError::NotConnected),
        Err(_) => {
            shared.pending.cancel(name, ticket.waiter);
            return Err(OperationError::Timeout {
                elapsed: timeout,
                partial: false,
            });
        }
    };

    if !verify {
        return Ok(echoed);
    }

    // The echo alone is not trusted for verified writes; fetch the value
    // back and compare under the type's equality rule.
    let fresh = read_fresh(shared, name, timeout).await?;
    if !wire::values_match(fresh.wire_type, value, fresh.value) {
        return Err(OperationError::VerificationFailed {
            name: name.to_string(),
            requested: value,
            actual: fresh.value,
        });
    }
    Ok(fresh)
}

/// Apply several writes in order. Failures are collected, not fatal, so one
/// rejected value doesn't abandon the rest of a configuration push.
pub(crate) async fn batch_write(
    shared: &Arc<LinkShared>,
    entries: &[(String, f64)],
    verify: bool,
    timeout: Duration,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for (name, value) in entries {
        match write(shared, name, *value, None, verify, timeout).await {
            Ok(w) => {
                if let Some(warning) = w.warning {
                    warn!("{}", warning);
                }
                outcome.applied.push((name.clone(), w.record.value));
            }
            Err(e) => {
                warn!("batch write {} = {} failed: {}", name, value, e);
                outcome.failed.push((name.clone(), e.to_string()));
            }
        }
    }
    info!(
        "batch write finished: {} applied, {} failed",
        outcome.applied.len(),
        outcome.failed.len()
    );
    outcome
}

/// Drop the cache, request the full list, and wait for it to stabilize.
/// Returns the final cache size.
pub(crate) async fn refresh(
    shared: &Arc<LinkShared>,
    min_count: usize,
    stable_window: Duration,
    timeout: Duration,
) -> Result<usize, OperationError> {
    if !shared.is_connected() {
        return Err(OperationError::NotConnected);
    }
    shared.cache.clear();
    shared.send_request_list()?;
    let outcome = await_stable_count(shared, min_count, stable_window, timeout).await;
    if outcome.stabilized {
        info!("parameter list refreshed: {} parameters", outcome.count);
        Ok(outcome.count)
    } else {
        Err(OperationError::Timeout {
            elapsed: timeout,
            partial: outcome.count > 0,
        })
    }
}

/// Wait until the cache holds at least `min_count` entries (or the reported
/// total) and then stays quiet for a full `stable_window`. Burst delivery of
/// PARAM_VALUE frames has no end marker, so "no new values for a while" is
/// the completion signal.
pub(crate) async fn await_stable_count(
    shared: &Arc<LinkShared>,
    min_count: usize,
    stable_window: Duration,
    timeout: Duration,
) -> StableOutcome {
    let mut rx = shared.cache.subscribe();
    let _ = rx.borrow_and_update();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return StableOutcome {
                count: shared.cache.len(),
                stabilized: false,
            };
        }
        let eligible = shared.cache.len() >= min_count || shared.cache.list_complete();
        let wait = if eligible {
            stable_window.min(remaining)
        } else {
            remaining
        };
        match tokio::time::timeout(wait, rx.changed()).await {
            Ok(Ok(())) => continue, // values still arriving
            Ok(Err(_)) => {
                // Cache dropped out from under us (client shutting down).
                return StableOutcome {
                    count: shared.cache.len(),
                    stabilized: false,
                };
            }
            Err(_) => {
                let stabilized = eligible && wait == stable_window;
                return StableOutcome {
                    count: shared.cache.len(),
                    stabilized,
                };
            }
        }
    }
}
