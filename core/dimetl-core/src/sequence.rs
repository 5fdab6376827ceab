//! Sequence generator for surrogate keys and pipeline identifiers.
//!
//! Replaces process-global counters (`id_counter += 1` inside a transform
//! callback) with an explicit component whose increment is the only
//! mutation path. Shared instances are atomic; per-worker instances can be
//! carved out as disjoint ranges with [`SequenceGenerator::partition`].

use crate::error::{EtlError, EtlResult};
use std::sync::atomic::{AtomicI64, Ordering};

/// A source of monotonically increasing integer identifiers.
#[derive(Debug)]
pub struct SequenceGenerator {
    /// The next value to hand out.
    next: AtomicI64,
    /// Exclusive upper bound (`i64::MAX` when unbounded).
    end: i64,
}

impl SequenceGenerator {
    /// Create a generator whose first value is `start`.
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            end: i64::MAX,
        }
    }

    /// Create a generator that hands out values in `[start, end)`.
    pub fn with_range(start: i64, end: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            end,
        }
    }

    /// Seed from the largest key already stored (`None` for an empty table):
    /// the first value is `max + 1`, or 1.
    pub fn after(max_existing: Option<i64>) -> Self {
        Self::new(max_existing.map_or(1, |m| m + 1))
    }

    /// Allocate and return the next value.
    pub fn next_value(&self) -> EtlResult<i64> {
        let value = self.next.fetch_add(1, Ordering::SeqCst);
        if value >= self.end {
            return Err(EtlError::config(format!(
                "sequence exhausted: range ends at {}",
                self.end
            )));
        }
        Ok(value)
    }

    /// Read the next value without allocating it.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Make sure a value that was assigned outside the generator (e.g. an
    /// explicit key carried by the row) is never handed out later.
    pub fn observe(&self, used: i64) {
        self.next.fetch_max(used.saturating_add(1), Ordering::SeqCst);
    }

    /// Split the remaining range into `parts` disjoint generators of
    /// `chunk` values each, for workers that must not share a counter.
    pub fn partition(&self, parts: usize, chunk: i64) -> EtlResult<Vec<SequenceGenerator>> {
        if parts == 0 || chunk <= 0 {
            return Err(EtlError::config(
                "partition needs at least one part and a positive chunk size",
            ));
        }
        let total = chunk
            .checked_mul(parts as i64)
            .ok_or_else(|| EtlError::config("partition range overflows"))?;
        let start = self.next.fetch_add(total, Ordering::SeqCst);
        if start.checked_add(total).is_none_or(|stop| stop > self.end) {
            return Err(EtlError::config("partition exceeds the sequence range"));
        }
        Ok((0..parts as i64)
            .map(|i| SequenceGenerator::with_range(start + i * chunk, start + (i + 1) * chunk))
            .collect())
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_basic() {
        let seq = SequenceGenerator::default();
        assert_eq!(seq.next_value().unwrap(), 0);
        assert_eq!(seq.next_value().unwrap(), 1);
        assert_eq!(seq.peek(), 2);
    }

    #[test]
    fn test_sequence_after_existing() {
        assert_eq!(SequenceGenerator::after(None).peek(), 1);
        assert_eq!(SequenceGenerator::after(Some(41)).peek(), 42);
    }

    #[test]
    fn test_observe_skips_explicit_keys() {
        let seq = SequenceGenerator::new(1);
        seq.observe(10);
        assert_eq!(seq.next_value().unwrap(), 11);
        seq.observe(3);
        assert_eq!(seq.next_value().unwrap(), 12);
    }

    #[test]
    fn test_bounded_range_exhausts() {
        let seq = SequenceGenerator::with_range(0, 2);
        seq.next_value().unwrap();
        seq.next_value().unwrap();
        assert!(seq.next_value().is_err());
    }

    #[test]
    fn test_partition_is_disjoint() {
        let seq = SequenceGenerator::new(100);
        let parts = seq.partition(3, 10).unwrap();
        assert_eq!(parts[0].peek(), 100);
        assert_eq!(parts[1].peek(), 110);
        assert_eq!(parts[2].peek(), 120);
        assert_eq!(seq.peek(), 130);
        assert!(seq.partition(0, 10).is_err());
    }

    #[test]
    fn test_shared_increments_are_unique() {
        let seq = Arc::new(SequenceGenerator::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| seq.next_value().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}
