//! Snowflake id generation.
//!
//! Layout, high to low: 41 bits of milliseconds since [`EPOCH_MS`], 10 bits
//! of node number, 12 bits of per-millisecond sequence.

use crate::error::{IdError, IdResult};
use crate::id::DistributedId;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

/// Custom epoch, in Unix milliseconds (Nov 04 2010 01:42:54 UTC).
pub const EPOCH_MS: i64 = 1_288_834_974_657;

/// Bits holding the node number.
pub const NODE_BITS: u32 = 10;

/// Bits holding the sequence number.
pub const SEQUENCE_BITS: u32 = 12;

/// Largest node number.
pub const MAX_NODE: i64 = (1 << NODE_BITS) - 1;

pub(crate) const NODE_MASK: i64 = MAX_NODE;
pub(crate) const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
pub(crate) const NODE_SHIFT: u32 = SEQUENCE_BITS;
pub(crate) const TIME_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

#[derive(Debug, Default)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// Generates unique ids for one tenant on one node.
#[derive(Debug)]
pub struct IdGenerator {
    tenant_id: String,
    node: i64,
    state: Mutex<State>,
}

impl IdGenerator {
    /// Create a generator for `tenant_id` on node `node` (0 to 1023).
    pub fn new(tenant_id: impl Into<String>, node: i64) -> IdResult<Self> {
        if !(0..=MAX_NODE).contains(&node) {
            return Err(IdError::InvalidNode {
                node,
                max: MAX_NODE,
            });
        }
        let tenant_id = tenant_id.into();
        debug!(tenant_id = %tenant_id, node, "id generator created");
        Ok(Self {
            tenant_id,
            node,
            state: Mutex::new(State::default()),
        })
    }

    /// The tenant the generator belongs to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// The node number.
    pub fn node(&self) -> i64 {
        self.node
    }

    /// Generate the next id.
    ///
    /// Ids from one generator are strictly increasing. When the sequence of
    /// a millisecond is exhausted the call spins until the next one.
    pub fn next_id(&self) -> DistributedId {
        let mut state = self.state.lock();
        let mut now = now_ms().max(state.last_ms);

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = now_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        DistributedId(
            ((now - EPOCH_MS) << TIME_SHIFT) | (self.node << NODE_SHIFT) | state.sequence,
        )
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_node_range() {
        assert!(IdGenerator::new("acme", 0).is_ok());
        assert!(IdGenerator::new("acme", MAX_NODE).is_ok());
        assert_eq!(
            IdGenerator::new("acme", 1024).unwrap_err(),
            IdError::InvalidNode { node: 1024, max: 1023 }
        );
        assert!(IdGenerator::new("acme", -1).is_err());
    }

    #[test]
    fn test_ids_increase_and_decompose() {
        let generator = IdGenerator::new("acme", 17).unwrap();
        let before = now_ms();
        let ids: Vec<_> = (0..10_000).map(|_| generator.next_id()).collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for id in &ids {
            assert_eq!(id.node(), 17);
            assert!(id.timestamp_ms() >= before);
            assert!(id.sequence() <= SEQUENCE_MASK);
        }
        assert_eq!(generator.tenant_id(), "acme");
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(IdGenerator::new("acme", 1).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || {
                    (0..2_000).map(|_| generator.next_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
