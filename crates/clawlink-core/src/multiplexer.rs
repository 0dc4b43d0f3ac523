//! Request/response correlation.
//!
//! Tracks in-flight calls by [`RequestId`]. Each pending entry is removed
//! exactly once: by [`resolve`](Multiplexer::resolve) when its response
//! arrives, by [`expire`](Multiplexer::expire) when its deadline passes, or by
//! [`clear`](Multiplexer::clear) on connection teardown. Whoever removes the
//! entry owns its waiter, so a caller can never be completed twice.
//!
//! The multiplexer knows nothing about sockets or timers. Deadlines are plain
//! instants compared against the `now` the driver passes in.

use std::collections::HashMap;

use crate::{env::Environment, frame::RequestId};

/// One in-flight call.
#[derive(Debug)]
pub struct PendingRequest<I, W> {
    /// Method name, kept for timeout reporting
    pub method: String,
    /// Instant after which the call times out
    pub deadline: I,
    /// Continuation to complete with the outcome
    pub waiter: W,
}

/// In-flight call table.
#[derive(Debug)]
pub struct Multiplexer<I, W> {
    pending: HashMap<RequestId, PendingRequest<I, W>>,
}

impl<I, W> Default for Multiplexer<I, W> {
    fn default() -> Self {
        Self { pending: HashMap::new() }
    }
}

impl<I, W> Multiplexer<I, W>
where
    I: Copy + Ord,
{
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a random id not currently pending.
    pub fn next_id<E: Environment>(&self, env: &E) -> RequestId {
        loop {
            let candidate = RequestId::from_random(env.random_u64());
            if !self.pending.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Track a call under an id from [`next_id`](Self::next_id).
    ///
    /// Returns the waiter back if the id is already pending.
    pub fn insert(
        &mut self,
        id: RequestId,
        method: impl Into<String>,
        deadline: I,
        waiter: W,
    ) -> Result<(), W> {
        if self.pending.contains_key(&id) {
            return Err(waiter);
        }
        self.pending.insert(id, PendingRequest { method: method.into(), deadline, waiter });
        Ok(())
    }

    /// Remove and return the call matching a response id.
    ///
    /// `None` for ids that were never issued or are already settled.
    pub fn resolve(&mut self, id: &RequestId) -> Option<PendingRequest<I, W>> {
        self.pending.remove(id)
    }

    /// Remove and return every call whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn expire(&mut self, now: I) -> Vec<(RequestId, PendingRequest<I, W>)> {
        let due: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut expired: Vec<_> = due
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|pending| (id, pending)))
            .collect();
        expired.sort_by(|a, b| a.1.deadline.cmp(&b.1.deadline).then_with(|| a.0.cmp(&b.0)));
        expired
    }

    /// Remove every call without completing it.
    ///
    /// Returns the removed entries so the caller decides how to drop them.
    pub fn clear(&mut self) -> Vec<PendingRequest<I, W>> {
        self.pending.drain().map(|(_, pending)| pending).collect()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Whether `id` is still pending.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending calls.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
