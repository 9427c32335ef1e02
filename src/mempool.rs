use crate::blockchain::{Block, Transaction};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

/// Pending transactions ordered by fee, highest first. The backing
/// `BTreeSet` is keyed by `(fee descending, insertion sequence)`, which
/// gives both priority extraction and arbitrary removal without re-heaping.
///
/// Callers hold the surrounding mutex; nothing here touches the chain.
#[derive(Debug, Default)]
pub struct Mempool {
    entries: BTreeSet<Entry>,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    fee: i64,
    seq: u64,
    tx: Transaction,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fee
            .cmp(&self.fee)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_identity(&self, tx: &Transaction) -> bool {
        self.entries.iter().any(|e| e.tx.same_identity(tx))
    }

    /// Insert unless an entry with the same identity triple already exists.
    /// Returns whether the transaction was actually added.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.contains_identity(&tx) {
            return false;
        }
        let entry = Entry {
            fee: tx.fee,
            seq: self.seq,
            tx,
        };
        self.seq += 1;
        self.entries.insert(entry)
    }

    /// Remove and return up to `n` highest-fee transactions.
    pub fn pop_top(&mut self, n: usize) -> Vec<Transaction> {
        let mut taken = Vec::with_capacity(n);
        while taken.len() < n {
            let Some(entry) = self.entries.pop_first() else {
                break;
            };
            taken.push(entry.tx);
        }
        taken
    }

    /// Drop every entry whose canonical JSON matches a transaction in the
    /// given block.
    pub fn remove_present_in(&mut self, block: &Block) {
        let sealed: HashSet<String> = block
            .transactions
            .iter()
            .map(Transaction::canonical_json)
            .collect();
        self.entries.retain(|e| !sealed.contains(&e.tx.canonical_json()));
    }

    /// Drop every entry whose canonical JSON is in `committed` (used after
    /// wholesale chain replacement).
    pub fn remove_committed(&mut self, committed: &HashSet<String>) {
        self.entries
            .retain(|e| !committed.contains(&e.tx.canonical_json()));
    }

    /// Non-destructive fee-descending view.
    pub fn snapshot_sorted(&self) -> Vec<Transaction> {
        self.entries.iter().map(|e| e.tx.clone()).collect()
    }

    /// Pending-side balance tally, mirroring the chain-side one so a freshly
    /// submitted send debits immediately.
    pub fn balance_of(&self, wallet: &str) -> i64 {
        let mut balance = 0i64;
        for entry in &self.entries {
            if entry.tx.sender == wallet {
                balance -= entry.tx.amount;
            }
            if entry.tx.receiver == wallet {
                balance += entry.tx.amount;
            }
        }
        balance
    }
}
