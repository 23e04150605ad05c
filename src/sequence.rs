use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

struct Slot {
    generation: u64,
    cancel: CancellationToken,
}

/// Latest-wins guard for repeated checks on the same key (one booking form,
/// one user). Beginning a check cancels the one already in flight for that key.
pub struct CheckSequencer {
    latest: DashMap<String, Slot>,
    next_generation: AtomicU64,
}

/// Handle for one in-flight check.
#[derive(Debug)]
pub struct CheckTicket {
    key: String,
    generation: u64,
    cancel: CancellationToken,
}

impl CheckTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a newer check for the same key has begun.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// A ticket that releases its key when dropped, whether the check finished or
/// its future was abandoned mid-flight.
pub struct TicketGuard<'a> {
    sequencer: &'a CheckSequencer,
    ticket: CheckTicket,
}

impl Deref for TicketGuard<'_> {
    type Target = CheckTicket;

    fn deref(&self) -> &CheckTicket {
        &self.ticket
    }
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.sequencer.finish(&self.ticket);
    }
}

impl Default for CheckSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckSequencer {
    pub fn new() -> Self {
        Self {
            latest: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn begin(&self, key: &str) -> CheckTicket {
        // Generation is assigned under the entry lock so concurrent begins on
        // one key install in generation order.
        let mut slot = self.latest.entry(key.to_string()).or_insert_with(|| Slot {
            generation: 0,
            cancel: CancellationToken::new(),
        });
        slot.cancel.cancel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        slot.generation = generation;
        slot.cancel = cancel.clone();
        CheckTicket {
            key: key.to_string(),
            generation,
            cancel,
        }
    }

    /// Like [`begin`](Self::begin), but the key is released on drop.
    pub fn begin_guarded(&self, key: &str) -> TicketGuard<'_> {
        TicketGuard {
            sequencer: self,
            ticket: self.begin(key),
        }
    }

    pub fn is_current(&self, ticket: &CheckTicket) -> bool {
        !ticket.is_cancelled()
            && self
                .latest
                .get(&ticket.key)
                .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// Release the key if `ticket` is still its latest check.
    pub fn finish(&self, ticket: &CheckTicket) {
        self.latest
            .remove_if(&ticket.key, |_, slot| slot.generation == ticket.generation);
    }

    /// Abort whatever check is in flight for `key`.
    pub fn cancel(&self, key: &str) {
        if let Some((_, slot)) = self.latest.remove(key) {
            slot.cancel.cancel();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.latest.len()
    }
}
