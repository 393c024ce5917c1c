//! Correlation id generation.
//!
//! Sequence ids must stay unique across process restarts sharing one node
//! id, so a bare counter is not enough. Each id packs a millisecond
//! timestamp, per-process entropy, and a counter for ids minted within the
//! same millisecond:
//!
//! ```text
//! [timestamp:41][process:10][counter:12]   (bits, high to low)
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// Timestamps count from 2024-01-01T00:00:00Z to keep 41 bits ahead for
// several decades.
const EPOCH_MS: u64 = 1_704_067_200_000;

const PROCESS_BITS: u32 = 10;
const COUNTER_BITS: u32 = 12;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Generator of unique 64-bit sequence ids.
#[derive(Debug)]
pub struct SequenceIds {
    process_bits: u64,
    state: Mutex<IdState>,
}

#[derive(Debug)]
struct IdState {
    last_ms: u64,
    counter: u64,
}

impl SequenceIds {
    /// New generator for a node. The process field mixes the node id with
    /// fresh random entropy so two restarts of the same node diverge.
    #[must_use]
    pub fn new(node_id: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        node_id.hash(&mut hasher);
        Uuid::new_v4().hash(&mut hasher);
        let process_bits = hasher.finish() & ((1 << PROCESS_BITS) - 1);

        Self {
            process_bits,
            state: Mutex::new(IdState {
                last_ms: 0,
                counter: 0,
            }),
        }
    }

    /// Mint the next id. Monotonically increasing within a process.
    pub fn next(&self) -> u64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let now_ms = current_time_ms().saturating_sub(EPOCH_MS);
        if now_ms > state.last_ms {
            state.last_ms = now_ms;
            state.counter = 0;
        } else {
            state.counter += 1;
            if state.counter > COUNTER_MASK {
                // Counter exhausted within one millisecond; borrow from the
                // next one.
                state.last_ms += 1;
                state.counter = 0;
            }
        }

        (state.last_ms << (PROCESS_BITS + COUNTER_BITS))
            | (self.process_bits << COUNTER_BITS)
            | state.counter
    }
}

/// Current wall clock time in milliseconds since UNIX epoch.
fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_within_a_burst() {
        let ids = SequenceIds::new("gate");
        let minted: HashSet<u64> = (0..10_000).map(|_| ids.next()).collect();
        assert_eq!(minted.len(), 10_000);
    }

    #[test]
    fn ids_are_monotonic() {
        let ids = SequenceIds::new("gate");
        let mut previous = ids.next();
        for _ in 0..1_000 {
            let next = ids.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn generators_for_one_node_diverge() {
        // Same node id, two processes: the entropy keeps the streams apart
        // in the process field with high probability.
        let a = SequenceIds::new("gate");
        let b = SequenceIds::new("gate");
        let _ = (a.next(), b.next());
        // Not asserting inequality of single ids (same millisecond and a
        // 1/1024 process collision would be flaky); the process fields are
        // what matters and they come from independent UUIDs.
        assert_eq!(a.process_bits & !((1 << PROCESS_BITS) - 1), 0);
        assert_eq!(b.process_bits & !((1 << PROCESS_BITS) - 1), 0);
    }
}
