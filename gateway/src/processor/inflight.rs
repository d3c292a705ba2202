use std::collections::HashMap;

use super::delay::TxnDelayTracker;

// Process-local in-flight ids start high so they are visually distinct from
// nonces in the logs.
const FIRST_INFLIGHT_ID: u64 = 1_000_000;

/// One submitted-but-unreceipted transaction, as tracked in the table. The
/// full in-flight state (context, signer, wire transaction) is owned by the
/// submission task; the table only needs identity and nonce.
#[derive(Debug, Clone, Copy)]
pub struct InflightRecord {
    pub id: u64,
    pub nonce: i64,
}

/// Per-sender in-flight state. `highest_nonce` is the largest nonce assigned
/// while any transaction is in flight; the state is removed from the table
/// entirely when the last transaction completes.
#[derive(Debug)]
pub struct InflightAddrState {
    entries: Vec<InflightRecord>,
    highest_nonce: i64,
}

/// Outcome of removing an in-flight record, captured under the lock for the
/// gap-fill decision made outside it.
#[derive(Debug, Clone, Copy)]
pub struct RemoveOutcome {
    pub removed: bool,
    pub before: usize,
    pub after: usize,
    /// Highest nonce still in flight for the sender, `-1` when none remain.
    pub highest: i64,
}

/// The per-sender in-flight map plus the delay tracker, guarded together by
/// one mutex in the processor.
#[derive(Debug, Default)]
pub struct InflightTable {
    txns: HashMap<String, InflightAddrState>,
    pub delayer: TxnDelayTracker,
    next_id: u64,
}

impl InflightTable {
    pub fn next_id(&mut self) -> u64 {
        if self.next_id == 0 {
            self.next_id = FIRST_INFLIGHT_ID;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The highest in-flight nonce for a sender, `-1` when the sender has no
    /// in-flight transactions (and therefore no map entry).
    pub fn highest_nonce(&self, from: &str) -> i64 {
        self.txns.get(from).map(|s| s.highest_nonce).unwrap_or(-1)
    }

    pub fn contains(&self, from: &str) -> bool {
        self.txns.contains_key(from)
    }

    pub fn senders(&self) -> usize {
        self.txns.len()
    }

    /// Append an in-flight record, creating the sender state on first use.
    /// Returns how many transactions were already in flight. The highest
    /// nonce tracks the maximum across live entries; node-assigned entries
    /// carry the `-1` sentinel and never raise it.
    pub fn append(&mut self, from: &str, id: u64, nonce: i64) -> usize {
        let state = self.txns.entry(from.to_string()).or_insert_with(|| {
            InflightAddrState {
                entries: Vec::new(),
                highest_nonce: -1,
            }
        });
        let before = state.entries.len();
        state.entries.push(InflightRecord { id, nonce });
        if nonce > state.highest_nonce {
            state.highest_nonce = nonce;
        }
        before
    }

    /// Remove a record on completion or failure. Drops the sender entirely
    /// when nothing remains in flight. On a pre-submission failure whose
    /// nonce was above everything still in flight, the stored highest nonce
    /// is wound back so the cancelled nonce is reused; a successfully
    /// submitted nonce is never wound back (it is consumed on chain).
    pub fn remove(&mut self, from: &str, id: u64, nonce: i64, submitted: bool) -> RemoveOutcome {
        let Some(state) = self.txns.get_mut(from) else {
            return RemoveOutcome {
                removed: false,
                before: 0,
                after: 0,
                highest: -1,
            };
        };
        let before = state.entries.len();
        state.entries.retain(|r| r.id != id);
        let after = state.entries.len();
        let removed = after < before;

        if state.entries.is_empty() {
            self.txns.remove(from);
            return RemoveOutcome {
                removed,
                before,
                after,
                highest: -1,
            };
        }

        let highest = state.entries.iter().map(|r| r.nonce).max().unwrap_or(-1);
        if !submitted && highest < nonce {
            state.highest_nonce = highest;
        }
        RemoveOutcome {
            removed,
            before,
            after,
            highest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_nonce_tracks_the_in_flight_maximum() {
        let mut table = InflightTable::default();
        assert_eq!(table.highest_nonce("0xaa"), -1);

        let a = table.next_id();
        let b = table.next_id();
        assert_eq!(table.append("0xaa", a, 7), 0);
        assert_eq!(table.append("0xaa", b, 8), 1);
        assert_eq!(table.highest_nonce("0xaa"), 8);
    }

    #[test]
    fn removing_the_last_entry_drops_the_sender() {
        let mut table = InflightTable::default();
        let id = table.next_id();
        table.append("0xaa", id, 7);

        let outcome = table.remove("0xaa", id, 7, true);
        assert!(outcome.removed);
        assert_eq!(outcome.highest, -1);
        assert!(!table.contains("0xaa"));
        assert_eq!(table.highest_nonce("0xaa"), -1);
    }

    #[test]
    fn pre_submission_failure_of_the_highest_nonce_rewinds_it() {
        let mut table = InflightTable::default();
        let a = table.next_id();
        let b = table.next_id();
        table.append("0xaa", a, 7);
        table.append("0xaa", b, 8);

        let outcome = table.remove("0xaa", b, 8, false);
        assert_eq!(outcome.highest, 7);
        // nonce 8 will be handed out again
        assert_eq!(table.highest_nonce("0xaa"), 7);
    }

    #[test]
    fn submitted_completion_never_rewinds_the_highest_nonce() {
        let mut table = InflightTable::default();
        let a = table.next_id();
        let b = table.next_id();
        table.append("0xaa", a, 7);
        table.append("0xaa", b, 8);

        let outcome = table.remove("0xaa", b, 8, true);
        assert_eq!(outcome.highest, 7);
        // 8 is consumed on chain; the next allocation must be 9
        assert_eq!(table.highest_nonce("0xaa"), 8);
    }

    #[test]
    fn failure_below_the_highest_leaves_a_gap_to_fill() {
        let mut table = InflightTable::default();
        let a = table.next_id();
        let b = table.next_id();
        table.append("0xaa", a, 7);
        table.append("0xaa", b, 8);

        let outcome = table.remove("0xaa", a, 7, false);
        assert_eq!(outcome.highest, 8);
        assert!(outcome.highest > 7, "gap at 7 must be detected");
        assert_eq!(table.highest_nonce("0xaa"), 8);
    }
}
