//! Fixed-capacity slot table for delivery workers

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A live delivery worker's slot
#[derive(Debug)]
pub struct SlotEntry {
    /// Client being served
    pub client_id: u64,
    /// Claim generation, distinguishes successive occupants of one slot
    pub generation: u64,
    /// Cancels the worker
    pub cancel: CancellationToken,
    /// Worker task, attached once spawned
    pub task: Option<JoinHandle<()>>,
    /// When the slot was claimed
    pub claimed_at: Instant,
}

/// Proof of a successful claim, held by the dispatcher until spawn
#[derive(Debug, Clone)]
pub struct SlotClaim {
    pub index: usize,
    pub generation: u64,
    pub cancel: CancellationToken,
}

struct Table {
    slots: Vec<Option<SlotEntry>>,
    next_generation: u64,
}

/// Fixed-size table of delivery worker slots
///
/// Slots are claimed only by the dispatcher and released only by the
/// owning worker's exit path (through [`SlotLease`]) or by a forced clear
/// during shutdown.
pub struct SlotTable {
    inner: Mutex<Table>,
    capacity: usize,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Table {
                slots: (0..capacity).map(|_| None).collect(),
                next_generation: 1,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.occupied() == self.capacity
    }

    /// Claim the first empty slot
    pub fn claim(&self, client_id: u64) -> Option<SlotClaim> {
        let mut table = self.inner.lock();
        let index = table.slots.iter().position(|s| s.is_none())?;

        let generation = table.next_generation;
        table.next_generation += 1;
        let cancel = CancellationToken::new();

        table.slots[index] = Some(SlotEntry {
            client_id,
            generation,
            cancel: cancel.clone(),
            task: None,
            claimed_at: Instant::now(),
        });

        Some(SlotClaim {
            index,
            generation,
            cancel,
        })
    }

    /// Record the spawned task for a claim
    ///
    /// Returns the task back if the slot has already been released (the
    /// worker finished first, or the table was cleared).
    pub fn attach(&self, claim: &SlotClaim, task: JoinHandle<()>) -> Option<JoinHandle<()>> {
        let mut table = self.inner.lock();
        match table.slots.get_mut(claim.index) {
            Some(Some(entry)) if entry.generation == claim.generation => {
                entry.task = Some(task);
                None
            }
            _ => Some(task),
        }
    }

    /// Free a slot if it still belongs to the given claim generation
    pub fn release(&self, index: usize, generation: u64) -> bool {
        let mut table = self.inner.lock();
        let Some(slot) = table.slots.get_mut(index) else {
            return false;
        };
        if slot.as_ref().map(|e| e.generation) == Some(generation) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Visit every occupied slot
    pub fn for_each_occupied<F>(&self, mut f: F)
    where
        F: FnMut(usize, &SlotEntry),
    {
        let table = self.inner.lock();
        for (index, entry) in table.slots.iter().enumerate() {
            if let Some(entry) = entry {
                f(index, entry);
            }
        }
    }

    /// Empty the table, returning what was in it
    pub fn drain(&self) -> Vec<SlotEntry> {
        let mut table = self.inner.lock();
        table.slots.iter_mut().filter_map(Option::take).collect()
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity)
            .field("occupied", &self.occupied())
            .finish()
    }
}

/// Releases a slot when the worker holding it exits
///
/// Moved into the worker future, so the slot frees on normal return, on
/// error, on cancellation, on abort, and when a spawn attempt fails and the
/// future is dropped unpolled.
#[derive(Debug)]
pub struct SlotLease {
    table: Arc<SlotTable>,
    index: usize,
    generation: u64,
}

impl SlotLease {
    pub fn new(table: Arc<SlotTable>, claim: &SlotClaim) -> Self {
        Self {
            table,
            index: claim.index,
            generation: claim.generation,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.table.release(self.index, self.generation) {
            tracing::trace!(slot = self.index, "Slot released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_until_full() {
        let table = SlotTable::new(3);

        let a = table.claim(1).unwrap();
        let b = table.claim(2).unwrap();
        let c = table.claim(3).unwrap();

        assert_eq!((a.index, b.index, c.index), (0, 1, 2));
        assert!(table.is_full());
        assert!(table.claim(4).is_none());
    }

    #[test]
    fn test_release_reuses_first_empty() {
        let table = SlotTable::new(3);
        let _a = table.claim(1).unwrap();
        let b = table.claim(2).unwrap();
        let _c = table.claim(3).unwrap();

        assert!(table.release(b.index, b.generation));
        let d = table.claim(4).unwrap();

        assert_eq!(d.index, 1);
        assert_ne!(d.generation, b.generation);
    }

    #[test]
    fn test_stale_release_ignored() {
        let table = SlotTable::new(1);
        let first = table.claim(1).unwrap();
        table.drain();
        let second = table.claim(2).unwrap();

        assert!(!table.release(first.index, first.generation));
        assert_eq!(table.occupied(), 1);
        assert!(table.release(second.index, second.generation));
        assert_eq!(table.occupied(), 0);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let table = Arc::new(SlotTable::new(2));
        let claim = table.claim(9).unwrap();
        let lease = SlotLease::new(Arc::clone(&table), &claim);
        assert_eq!(table.occupied(), 1);

        drop(lease);

        assert_eq!(table.occupied(), 0);
    }

    #[test]
    fn test_for_each_occupied() {
        let table = SlotTable::new(4);
        let _ = table.claim(10);
        let b = table.claim(20).unwrap();
        let _ = table.claim(30);
        table.release(b.index, b.generation);

        let mut seen = Vec::new();
        table.for_each_occupied(|index, entry| seen.push((index, entry.client_id)));

        assert_eq!(seen, vec![(0, 10), (2, 30)]);
    }

    #[test]
    fn test_drain_clears_everything() {
        let table = SlotTable::new(2);
        let a = table.claim(1).unwrap();
        let _ = table.claim(2);

        let drained = table.drain();

        assert_eq!(drained.len(), 2);
        assert_eq!(table.occupied(), 0);
        assert!(!drained[0].cancel.is_cancelled());
        a.cancel.cancel();
        assert!(drained[0].cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_attach_after_release_returns_task() {
        let table = SlotTable::new(1);
        let claim = table.claim(1).unwrap();
        table.release(claim.index, claim.generation);

        let task = tokio::spawn(async {});
        assert!(table.attach(&claim, task).is_some());
    }
}
