//! Auto-generated identity sequence.

use crate::error::Result;
use std::sync::{Mutex, PoisonError};

/// Hands out increasing integer identities.
///
/// The first call seeds the sequence with the highest identity the backend
/// already holds; later calls advance it in memory. Identities written
/// explicitly are reported through [`observe`](Self::observe) so the sequence
/// never hands them out again.
#[derive(Debug, Default)]
pub struct IdSequence {
    last: Mutex<Option<i64>>,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identity, seeding from `highest` on first use.
    pub fn next_with(&self, highest: impl FnOnce() -> Result<i64>) -> Result<i64> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let current = match *last {
            Some(n) => n,
            None => highest()?.max(0),
        };
        let next = current.saturating_add(1);
        *last = Some(next);
        Ok(next)
    }

    /// Records an identity that was written explicitly.
    pub fn observe(&self, id: i64) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = last.as_mut() {
            if id > *n {
                *n = id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_seeds_once_then_advances() {
        let sequence = IdSequence::new();
        let mut seeded = 0;
        let mut seed = || -> Result<i64> {
            seeded += 1;
            Ok(41)
        };
        assert_eq!(sequence.next_with(&mut seed).unwrap(), 42);
        assert_eq!(sequence.next_with(&mut seed).unwrap(), 43);
        assert_eq!(seeded, 1);
    }

    #[test]
    fn test_empty_backend_starts_at_one() {
        let sequence = IdSequence::new();
        assert_eq!(sequence.next_with(|| Ok(0)).unwrap(), 1);
    }

    #[test]
    fn test_observe_skips_explicit_ids() {
        let sequence = IdSequence::new();
        assert_eq!(sequence.next_with(|| Ok(0)).unwrap(), 1);
        sequence.observe(10);
        sequence.observe(3);
        assert_eq!(sequence.next_with(|| Ok(0)).unwrap(), 11);
    }

    #[test]
    fn test_seed_failure_leaves_sequence_unseeded() {
        let sequence = IdSequence::new();
        let failed = sequence.next_with(|| Err(StorageError::Connection("down".into())));
        assert!(failed.is_err());
        assert_eq!(sequence.next_with(|| Ok(5)).unwrap(), 6);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let sequence = Arc::new(IdSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sequence = Arc::clone(&sequence);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| sequence.next_with(|| Ok(0)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 800);
        assert_eq!(ids.last(), Some(&800));
    }
}
