//! # Write Queue
//!
//! Ordered, in-memory list of pending coil and register writes.
//!
//! ## How It Works
//!
//! Consumers append writes between poll ticks. The poller drains the whole
//! queue at the start of a write tick with [`WriteQueue::drain_all`] and then
//! issues coil writes in enqueue order followed by register writes in enqueue
//! order. A drained write is never put back: failures are logged and the
//! entry is dropped.
//!
//! Writes appended while a flush is running land in the now-empty queue and
//! go out on the next write tick.
//!
//! ```rust
//! use heru_modbus::WriteQueue;
//!
//! let mut queue = WriteQueue::new();
//! queue.push_coils(2, vec![true]);
//! queue.push_registers(1, vec![215]);
//! assert_eq!(queue.pending_count(), 2);
//!
//! let pending = queue.drain_all();
//! assert!(queue.is_empty());
//! assert_eq!(pending.coil_writes.len(), 1);
//! ```

/// Pending FC0F write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoilWrite {
    pub start_address: u16,
    pub values: Vec<bool>,
}

/// Pending FC10 write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWrite {
    pub start_address: u16,
    pub values: Vec<u16>,
}

/// Writes taken out of the queue for one flush, in issue order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingWrites {
    pub coil_writes: Vec<CoilWrite>,
    pub register_writes: Vec<RegisterWrite>,
}

impl PendingWrites {
    #[inline]
    pub fn len(&self) -> usize {
        self.coil_writes.len() + self.register_writes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coil_writes.is_empty() && self.register_writes.is_empty()
    }
}

/// Write queue drained by the poll loop.
///
/// Not synchronized; the polling client keeps it behind a mutex.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: PendingWrites,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a multi-coil write
    pub fn push_coils(&mut self, start_address: u16, values: Vec<bool>) {
        self.pending.coil_writes.push(CoilWrite {
            start_address,
            values,
        });
    }

    /// Append a multi-register write
    pub fn push_registers(&mut self, start_address: u16, values: Vec<u16>) {
        self.pending.register_writes.push(RegisterWrite {
            start_address,
            values,
        });
    }

    /// Take every pending write and leave the queue empty
    pub fn drain_all(&mut self) -> PendingWrites {
        std::mem::take(&mut self.pending)
    }

    /// Number of queued writes
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop all pending writes without issuing them, returning how many there were
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending_count();
        self.pending = PendingWrites::default();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queue_is_empty() {
        let queue = WriteQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_drain_preserves_enqueue_order() {
        let mut queue = WriteQueue::new();
        queue.push_registers(1, vec![200]);
        queue.push_coils(2, vec![true]);
        queue.push_registers(2, vec![3]);
        queue.push_coils(3, vec![false]);

        let pending = queue.drain_all();
        assert_eq!(pending.len(), 4);
        assert_eq!(
            pending
                .coil_writes
                .iter()
                .map(|w| w.start_address)
                .collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(
            pending
                .register_writes
                .iter()
                .map(|w| w.start_address)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_after_drain_goes_to_next_batch() {
        let mut queue = WriteQueue::new();
        queue.push_coils(0, vec![true]);
        let first = queue.drain_all();

        queue.push_coils(4, vec![true]);
        assert_eq!(first.coil_writes.len(), 1);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.drain_all().coil_writes[0].start_address, 4);
    }

    #[test]
    fn test_clear() {
        let mut queue = WriteQueue::new();
        queue.push_registers(68, vec![1]);
        queue.push_coils(0, vec![true]);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }
}
