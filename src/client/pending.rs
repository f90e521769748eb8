//! Registry of in-flight parameter operations awaiting a response.
//!
//! The MAVLink parameter protocol has no request ids; correlation is by
//! parameter name only. The registry therefore keeps at most one entry per
//! name. A second WRITE for a name with anything in flight fails fast with
//! `AlreadyPending` instead of queuing; concurrent READs piggyback on the
//! existing entry since any matching value update satisfies them all.
//!
//! A caller that times out cancels its own waiter so nothing dangles; a
//! response arriving after that is applied to the cache as an ordinary
//! update and cannot spuriously complete a future operation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, trace};
use tokio::sync::oneshot;

use crate::cache::ParamRecord;
use crate::error::OperationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

/// One waiter's handle on a pending operation.
#[derive(Debug)]
pub struct Ticket {
    pub waiter: u64,
    pub rx: oneshot::Receiver<ParamRecord>,
}

struct Entry {
    kind: OpKind,
    waiters: Vec<(u64, oneshot::Sender<ParamRecord>)>,
    opened_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_waiter: u64,
}

pub struct PendingRegistry {
    inner: Mutex<Inner>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a WRITE. Fails fast if anything is already pending for the
    /// name; two concurrent requests for the same name would make the echo
    /// ambiguous.
    pub fn begin_write(&self, name: &str) -> Result<Ticket, OperationError> {
        let mut inner = self.lock();
        if inner.entries.contains_key(name) {
            return Err(OperationError::AlreadyPending(name.to_string()));
        }
        let waiter = inner.next_waiter;
        inner.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(
            name.to_string(),
            Entry {
                kind: OpKind::Write,
                waiters: vec![(waiter, tx)],
                opened_at: Instant::now(),
            },
        );
        Ok(Ticket { waiter, rx })
    }

    /// Register a READ, piggybacking on any existing entry for the name.
    pub fn join_read(&self, name: &str) -> Ticket {
        let mut inner = self.lock();
        let waiter = inner.next_waiter;
        inner.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        inner
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Entry {
                kind: OpKind::Read,
                waiters: Vec::new(),
                opened_at: Instant::now(),
            })
            .waiters
            .push((waiter, tx));
        Ticket { waiter, rx }
    }

    /// Resolve the entry for `name`, waking every waiter. Returns the number
    /// of waiters woken (0 when nothing was pending, i.e. a late or
    /// unsolicited update).
    pub fn resolve(&self, name: &str, record: &ParamRecord) -> usize {
        let entry = self.lock().entries.remove(name);
        match entry {
            Some(entry) => {
                let woken = entry.waiters.len();
                trace!(
                    "resolving {:?} for {} after {:?} ({} waiter(s))",
                    entry.kind,
                    name,
                    entry.opened_at.elapsed(),
                    woken
                );
                for (_, tx) in entry.waiters {
                    // A waiter that already timed out has dropped its receiver.
                    let _ = tx.send(record.clone());
                }
                woken
            }
            None => 0,
        }
    }

    /// Remove one waiter after its deadline elapsed; drops the whole entry
    /// once no waiters remain.
    pub fn cancel(&self, name: &str, waiter: u64) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(name) {
            entry.waiters.retain(|(id, _)| *id != waiter);
            if entry.waiters.is_empty() {
                debug!(
                    "pending {:?} for {} abandoned after {:?}",
                    entry.kind,
                    name,
                    entry.opened_at.elapsed()
                );
                inner.entries.remove(name);
            }
        }
    }

    /// Drop every entry, failing all waiters (their receivers resolve with
    /// an error). Used when the link goes down.
    pub fn fail_all(&self) {
        let mut inner = self.lock();
        let n = inner.entries.len();
        inner.entries.clear();
        if n > 0 {
            debug!("{} pending operation(s) dropped with the link", n);
        }
    }

    pub fn has_pending(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
