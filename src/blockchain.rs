use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Placeholder previous-hash for the first block of every chain.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// How often the proof-of-work loop polls its cancel flag.
const CANCEL_POLL_INTERVAL: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    // Wallet clients say "fee"; the chain stores "transaction_fees".
    // Re-serialization always canonicalizes to the long form; a missing fee
    // is zero.
    #[serde(rename = "transaction_fees", alias = "fee", default)]
    pub fee: i64,
    pub amount: i64,
}

impl Transaction {
    pub fn new(sender: &str, receiver: &str, fee: i64, amount: i64) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            fee,
            amount,
        }
    }

    /// Dedup identity. Fee and timestamps are deliberately excluded so that
    /// re-gossiped copies of the same payment always collapse into one.
    pub fn identity(&self) -> (&str, &str, i64) {
        (&self.sender, &self.receiver, self.amount)
    }

    pub fn same_identity(&self, other: &Transaction) -> bool {
        self.identity() == other.identity()
    }

    pub fn canonical_json(&self) -> String {
        canonical_json(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub transactions: Vec<Transaction>,
    pub timestamp: f64,
    pub previous_hash: String,
    pub merkle_root: String,
    pub nonce: u64,
    pub hash: String,
}

// The hash covers every field except `hash` itself, keys sorted.
#[derive(Serialize)]
struct BlockForHash<'a> {
    transactions: &'a [Transaction],
    timestamp: f64,
    previous_hash: &'a str,
    merkle_root: &'a str,
    nonce: u64,
}

impl Block {
    pub fn new(transactions: Vec<Transaction>, previous_hash: String) -> Self {
        let merkle_root = Self::build_merkle_root(&transactions);
        let mut block = Self {
            transactions,
            timestamp: Utc::now().timestamp_micros() as f64 / 1e6,
            previous_hash,
            merkle_root,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn compute_hash(&self) -> String {
        let body = canonical_json(&BlockForHash {
            transactions: &self.transactions,
            timestamp: self.timestamp,
            previous_hash: &self.previous_hash,
            merkle_root: &self.merkle_root,
            nonce: self.nonce,
        });
        sha256_hex(body.as_bytes())
    }

    /// Pairwise SHA-256 over transaction hashes; an odd element at any layer
    /// is paired with itself. No transactions hash to the empty root.
    pub fn build_merkle_root(transactions: &[Transaction]) -> String {
        if transactions.is_empty() {
            return String::new();
        }
        let mut layer: Vec<String> = transactions
            .iter()
            .map(|tx| sha256_hex(tx.canonical_json().as_bytes()))
            .collect();

        while layer.len() > 1 {
            let mut next = Vec::with_capacity(layer.len().div_ceil(2));
            for pair in layer.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(sha256_hex(format!("{}{}", left, right).as_bytes()));
            }
            layer = next;
        }
        layer.remove(0)
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.starts_with(&"0".repeat(difficulty))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block already known")]
    Duplicate,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("insufficient difficulty")]
    InsufficientDifficulty,
    #[error("previous hash does not match chain tip")]
    Fork,
}

#[derive(Debug)]
pub struct Blockchain {
    pub chain: Vec<Block>,
    pub last_block_hash: String,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Chains start empty; the first mined block links to the placeholder.
    pub fn new() -> Self {
        Self {
            chain: Vec::new(),
            last_block_hash: GENESIS_PREVIOUS_HASH.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.chain.iter().any(|b| b.hash == hash)
    }

    pub fn contains_identity(&self, tx: &Transaction) -> bool {
        self.chain
            .iter()
            .flat_map(|b| &b.transactions)
            .any(|t| t.same_identity(tx))
    }

    /// Canonical JSON of every committed transaction, for mempool filtering.
    pub fn committed_tx_jsons(&self) -> std::collections::HashSet<String> {
        self.chain
            .iter()
            .flat_map(|b| &b.transactions)
            .map(Transaction::canonical_json)
            .collect()
    }

    /// Append without validation and move the cached tip. Callers validate.
    pub fn append(&mut self, block: Block) {
        self.last_block_hash = block.hash.clone();
        self.chain.push(block);
    }

    /// The reception-side checks for a single incoming block, in rejection
    /// order: duplicate, hash integrity, proof-of-work, chain continuity.
    /// An empty chain accepts any previous_hash.
    pub fn check_incoming(&self, block: &Block, difficulty: usize) -> Result<(), BlockError> {
        if self.contains_hash(&block.hash) {
            return Err(BlockError::Duplicate);
        }
        if block.compute_hash() != block.hash {
            return Err(BlockError::HashMismatch);
        }
        if !block.meets_difficulty(difficulty) {
            return Err(BlockError::InsufficientDifficulty);
        }
        if !self.is_empty() && block.previous_hash != self.last_block_hash {
            return Err(BlockError::Fork);
        }
        Ok(())
    }

    /// Full validation of a candidate replacement chain: genesis linkage,
    /// per-block hash integrity, proof-of-work, and continuity.
    pub fn validate_chain(chain: &[Block], difficulty: usize) -> bool {
        let Some(first) = chain.first() else {
            return true;
        };
        if first.previous_hash != GENESIS_PREVIOUS_HASH {
            return false;
        }
        for (i, block) in chain.iter().enumerate() {
            if block.compute_hash() != block.hash {
                return false;
            }
            if !block.meets_difficulty(difficulty) {
                return false;
            }
            if i > 0 && block.previous_hash != chain[i - 1].hash {
                return false;
            }
        }
        true
    }

    /// Adopt `new_chain` wholesale, recomputing the cached tip. The caller
    /// has already validated and length-compared it.
    pub fn replace(&mut self, new_chain: Vec<Block>) {
        self.last_block_hash = new_chain
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());
        self.chain = new_chain;
    }

    /// Chain-side balance tally: senders pay, receivers collect.
    pub fn balance_of(&self, wallet: &str) -> i64 {
        let mut balance = 0i64;
        for block in &self.chain {
            for tx in &block.transactions {
                if tx.sender == wallet {
                    balance -= tx.amount;
                }
                if tx.receiver == wallet {
                    balance += tx.amount;
                }
            }
        }
        balance
    }

    /// Nonce-incrementing proof-of-work search. Returns false if the cancel
    /// flag was observed; the flag is polled every CANCEL_POLL_INTERVAL
    /// nonces so a preempting block stops the search quickly. Runs on a
    /// blocking thread and must never be called with a lock held.
    pub fn mine_with_cancel(
        block: &mut Block,
        difficulty: usize,
        cancel: &AtomicBool,
        attempts: &mut u64,
    ) -> bool {
        let target = "0".repeat(difficulty);
        while !block.hash.starts_with(&target) {
            if block.nonce % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return false;
            }
            block.nonce += 1;
            block.hash = block.compute_hash();
            *attempts += 1;
        }
        true
    }
}

/// JSON with lexicographically sorted keys, the byte form every hash in the
/// protocol is computed over. Routing through `serde_json::Value` sorts the
/// keys because its default map is ordered.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let value = serde_json::to_value(value).expect("in-memory value serializes");
    serde_json::to_string(&value).expect("value renders")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: &str, receiver: &str, fee: i64, amount: i64) -> Transaction {
        Transaction::new(sender, receiver, fee, amount)
    }

    fn mined_block(transactions: Vec<Transaction>, previous_hash: &str) -> Block {
        let mut block = Block::new(transactions, previous_hash.to_string());
        let mut attempts = 0;
        let cancel = AtomicBool::new(false);
        assert!(Blockchain::mine_with_cancel(
            &mut block,
            1,
            &cancel,
            &mut attempts
        ));
        block
    }

    #[test]
    fn transaction_round_trip_canonicalizes_fee_field() {
        let t = tx("Alice", "Bob", 3, 10);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"transaction_fees\":3"));
        assert!(!json.contains("\"fee\""));

        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);

        // Wallet-side spelling parses too.
        let wallet_form: Transaction =
            serde_json::from_str(r#"{"sender":"Alice","receiver":"Bob","fee":3,"amount":10}"#)
                .unwrap();
        assert_eq!(wallet_form, t);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let t = tx("Alice", "Bob", 1, 5);
        assert_eq!(
            t.canonical_json(),
            r#"{"amount":5,"receiver":"Bob","sender":"Alice","transaction_fees":1}"#
        );
    }

    #[test]
    fn identity_ignores_fee() {
        let a = tx("Alice", "Bob", 1, 5);
        let b = tx("Alice", "Bob", 9, 5);
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&tx("Alice", "Bob", 1, 6)));
    }

    #[test]
    fn block_round_trip() {
        let block = Block::new(vec![tx("Alice", "Bob", 1, 5)], GENESIS_PREVIOUS_HASH.into());
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.compute_hash(), block.hash);
    }

    #[test]
    fn merkle_root_is_deterministic_and_order_sensitive() {
        let a = tx("Alice", "Bob", 1, 5);
        let b = tx("Bob", "Carol", 2, 3);
        let forward = Block::build_merkle_root(&[a.clone(), b.clone()]);
        assert_eq!(forward, Block::build_merkle_root(&[a.clone(), b.clone()]));
        assert_ne!(forward, Block::build_merkle_root(&[b, a]));
    }

    #[test]
    fn merkle_root_duplicates_odd_element() {
        let txs = vec![
            tx("Alice", "Bob", 1, 5),
            tx("Bob", "Carol", 2, 3),
            tx("Carol", "Dave", 3, 1),
        ];
        let leaves: Vec<String> = txs
            .iter()
            .map(|t| sha256_hex(t.canonical_json().as_bytes()))
            .collect();
        let left = sha256_hex(format!("{}{}", leaves[0], leaves[1]).as_bytes());
        let right = sha256_hex(format!("{}{}", leaves[2], leaves[2]).as_bytes());
        let expected = sha256_hex(format!("{}{}", left, right).as_bytes());
        assert_eq!(Block::build_merkle_root(&txs), expected);
    }

    #[test]
    fn empty_transaction_list_has_empty_root() {
        assert_eq!(Block::build_merkle_root(&[]), "");
    }

    #[test]
    fn incoming_checks_reject_in_order() {
        let mut bc = Blockchain::new();
        let block = mined_block(vec![tx("Alice", "Bob", 1, 5)], GENESIS_PREVIOUS_HASH);
        bc.check_incoming(&block, 1).unwrap();
        bc.append(block.clone());

        assert_eq!(bc.check_incoming(&block, 1), Err(BlockError::Duplicate));

        let mut tampered = mined_block(vec![tx("Bob", "Carol", 2, 3)], &block.hash);
        tampered.hash = "f".repeat(64);
        assert_eq!(
            bc.check_incoming(&tampered, 1),
            Err(BlockError::HashMismatch)
        );

        // A valid hash that simply lacks the leading-zero prefix.
        let mut weak = Block::new(vec![tx("Bob", "Carol", 2, 3)], block.hash.clone());
        while weak.hash.starts_with('0') {
            weak.nonce += 1;
            weak.hash = weak.compute_hash();
        }
        assert_eq!(
            bc.check_incoming(&weak, 1),
            Err(BlockError::InsufficientDifficulty)
        );

        let orphan = mined_block(vec![tx("Bob", "Carol", 2, 3)], GENESIS_PREVIOUS_HASH);
        assert_eq!(bc.check_incoming(&orphan, 1), Err(BlockError::Fork));
    }

    #[test]
    fn empty_chain_accepts_any_previous_hash() {
        let bc = Blockchain::new();
        let block = mined_block(vec![tx("Alice", "Bob", 1, 5)], &"a".repeat(64));
        assert_eq!(bc.check_incoming(&block, 1), Ok(()));
    }

    #[test]
    fn chain_validation_catches_broken_linkage() {
        let b1 = mined_block(vec![tx("Alice", "Bob", 1, 5)], GENESIS_PREVIOUS_HASH);
        let b2 = mined_block(vec![tx("Bob", "Carol", 2, 3)], &b1.hash);
        assert!(Blockchain::validate_chain(&[b1.clone(), b2.clone()], 1));
        assert!(Blockchain::validate_chain(&[], 1));

        // Swapped order breaks continuity.
        assert!(!Blockchain::validate_chain(&[b2.clone(), b1.clone()], 1));

        // A first block that does not link to the placeholder is invalid.
        assert!(!Blockchain::validate_chain(&[b2], 1));
    }

    #[test]
    fn mining_respects_cancel_flag() {
        let mut block = Block::new(
            vec![tx("Alice", "Bob", 1, 5)],
            GENESIS_PREVIOUS_HASH.to_string(),
        );
        let cancel = AtomicBool::new(true);
        let mut attempts = 0;
        // Difficulty 64 is unreachable; only the flag can stop the loop.
        assert!(!Blockchain::mine_with_cancel(
            &mut block,
            64,
            &cancel,
            &mut attempts
        ));
        assert!(attempts < CANCEL_POLL_INTERVAL + 1);
    }

    #[test]
    fn balances_conserve_across_the_chain() {
        let mut bc = Blockchain::new();
        let b1 = mined_block(
            vec![tx("Alice", "Bob", 1, 10), tx("Bob", "Carol", 2, 3)],
            GENESIS_PREVIOUS_HASH,
        );
        bc.append(b1);
        let b2 = mined_block(
            vec![tx("Carol", "Alice", 0, 2)],
            &bc.last_block_hash.clone(),
        );
        bc.append(b2);

        let total: i64 = ["Alice", "Bob", "Carol"]
            .iter()
            .map(|w| bc.balance_of(w))
            .sum();
        assert_eq!(total, 0);
        assert_eq!(bc.balance_of("Alice"), -8);
        assert_eq!(bc.balance_of("Bob"), 7);
    }

    #[test]
    fn tip_tracks_appends_and_replacement() {
        let mut bc = Blockchain::new();
        assert_eq!(bc.last_block_hash, GENESIS_PREVIOUS_HASH);

        let b1 = mined_block(vec![tx("Alice", "Bob", 1, 5)], GENESIS_PREVIOUS_HASH);
        bc.append(b1.clone());
        assert_eq!(bc.last_block_hash, b1.hash);

        let c1 = mined_block(vec![tx("Dave", "Eve", 1, 5)], GENESIS_PREVIOUS_HASH);
        let c2 = mined_block(vec![tx("Eve", "Frank", 1, 2)], &c1.hash);
        let tip = c2.hash.clone();
        bc.replace(vec![c1, c2]);
        assert_eq!(bc.last_block_hash, tip);
        assert_eq!(bc.len(), 2);

        bc.replace(Vec::new());
        assert_eq!(bc.last_block_hash, GENESIS_PREVIOUS_HASH);
    }
}
