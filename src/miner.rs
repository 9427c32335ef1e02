use crate::blockchain::{Block, Blockchain, Transaction};
use crate::daemon::MinerNode;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::time::{Duration, interval};

/// How often the trigger re-checks mempool depth.
const MINE_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Background mining trigger. Wakes every couple of seconds; when enough
/// transactions are pending and no attempt is running, kicks one off on its
/// own task so the trigger keeps ticking.
pub async fn auto_mine(node: Arc<MinerNode>) {
    let mut ticker = interval(MINE_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = node.shutdown_token().cancelled() => return,
            _ = ticker.tick() => {}
        }

        let depth = node.mempool.lock().unwrap().len();
        if depth < node.config.trans_per_block
            || node.currently_mining.load(Ordering::Relaxed)
        {
            continue;
        }

        let attempt_node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = produce_block(attempt_node.clone()).await {
                attempt_node.logs.emit(format!(
                    "[MINER {}] produce_block: {}",
                    attempt_node.config.port, e
                ));
            }
        });
    }
}

/// One mining attempt: select the highest-fee transactions, search on a
/// blocking thread, then commit under the chain lock only if the tip is
/// still the one the candidate was built on. Cancelled or stale attempts
/// hand their transactions back.
pub async fn produce_block(node: Arc<MinerNode>) -> Result<Option<Block>> {
    // The swap is the at-most-one-attempt guard.
    if node.currently_mining.swap(true, Ordering::Relaxed) {
        return Ok(None);
    }
    node.stop_mining.store(false, Ordering::Relaxed);

    let selected = node
        .mempool
        .lock()
        .unwrap()
        .pop_top(node.config.trans_per_block);
    if selected.len() < node.config.trans_per_block {
        // The pool thinned out between the trigger's check and ours.
        return_to_mempool(&node, selected);
        node.currently_mining.store(false, Ordering::Relaxed);
        return Ok(None);
    }

    let previous_hash = node.chain.lock().unwrap().last_block_hash.clone();
    node.logs.emit(format!(
        "[MINER {}] Mining block with {} transactions...",
        node.config.port,
        selected.len()
    ));

    let candidate = Block::new(selected.clone(), previous_hash);
    let difficulty = node.config.difficulty;
    let search_node = node.clone();
    let (found, block, attempts) = tokio::task::spawn_blocking(move || {
        let mut block = candidate;
        let mut attempts = 0u64;
        let found = Blockchain::mine_with_cancel(
            &mut block,
            difficulty,
            &search_node.stop_mining,
            &mut attempts,
        );
        (found, block, attempts)
    })
    .await?;

    if !found {
        node.logs.emit(format!(
            "[MINER {}] Mining cancelled, returning transactions to mempool",
            node.config.port
        ));
        return_to_mempool(&node, selected);
        node.currently_mining.store(false, Ordering::Relaxed);
        return Ok(None);
    }

    let committed = {
        let mut chain = node.chain.lock().unwrap();
        if block.previous_hash == chain.last_block_hash {
            chain.append(block.clone());
            true
        } else {
            false
        }
    };

    let result = if committed {
        node.logs.emit(format!(
            "[MINER {}] Block mined: {} ({} attempts)",
            node.config.port, block.hash, attempts
        ));
        let payload = serde_json::to_string(&block)?;
        let sent = node.broadcast_line(&payload, None);
        node.logs.emit(format!(
            "[MINER {}] Block broadcast to {} miners",
            node.config.port, sent
        ));
        Some(block)
    } else {
        // Another block landed mid-search; ours links to a stale tip.
        node.logs.emit(format!(
            "[MINER {}] Chain changed during mining, discarding block",
            node.config.port
        ));
        return_to_mempool(&node, selected);
        None
    };

    node.currently_mining.store(false, Ordering::Relaxed);
    Ok(result)
}

/// Re-insert an attempt's transactions, skipping any the chain picked up
/// while the attempt was running.
fn return_to_mempool(node: &MinerNode, transactions: Vec<Transaction>) {
    let still_pending: Vec<Transaction> = {
        let chain = node.chain.lock().unwrap();
        transactions
            .into_iter()
            .filter(|tx| !chain.contains_identity(tx))
            .collect()
    };
    let mut mempool = node.mempool.lock().unwrap();
    for tx in still_pending {
        mempool.insert(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::NodeConfig;
    use crate::logger::Logs;
    use tokio_util::sync::CancellationToken;

    fn test_node(trans_per_block: usize) -> Arc<MinerNode> {
        MinerNode::new(
            NodeConfig {
                ip: "127.0.0.1".to_string(),
                port: 6001,
                bootstrap_addr: "127.0.0.1:1".to_string(),
                trans_per_block,
                difficulty: 1,
                backlog: 10,
            },
            Logs::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn mines_the_top_fee_transactions_in_order() {
        let node = test_node(2);
        node.ingest_transaction(Transaction::new("Alice", "Bob", 1, 10));
        node.ingest_transaction(Transaction::new("Bob", "Carol", 2, 3));
        node.ingest_transaction(Transaction::new("Carol", "Dave", 0, 7));

        let block = produce_block(node.clone()).await.unwrap().unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].sender, "Bob");
        assert_eq!(block.transactions[1].sender, "Alice");
        assert!(block.meets_difficulty(1));

        let chain = node.chain.lock().unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last_block_hash, block.hash);
        drop(chain);

        // The low-fee transaction is still pending.
        let rest = node.mempool.lock().unwrap().snapshot_sorted();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sender, "Carol");
        assert!(!node.currently_mining.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn concurrent_attempt_is_refused() {
        let node = test_node(1);
        node.ingest_transaction(Transaction::new("Alice", "Bob", 1, 10));
        node.currently_mining.store(true, Ordering::Relaxed);
        assert!(produce_block(node.clone()).await.unwrap().is_none());
        // Nothing was taken from the pool.
        assert_eq!(node.mempool.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn thinned_mempool_aborts_and_restores() {
        let node = test_node(2);
        node.ingest_transaction(Transaction::new("Alice", "Bob", 1, 10));
        assert!(produce_block(node.clone()).await.unwrap().is_none());
        assert_eq!(node.mempool.lock().unwrap().len(), 1);
        assert!(!node.currently_mining.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn stale_tip_discards_candidate_and_restores_rest() {
        use crate::blockchain::GENESIS_PREVIOUS_HASH;
        use std::sync::atomic::AtomicBool;

        let node = test_node(2);
        let winner_tx = Transaction::new("Alice", "Bob", 2, 10);
        let loser_tx = Transaction::new("Bob", "Carol", 1, 3);
        node.ingest_transaction(winner_tx.clone());
        node.ingest_transaction(loser_tx.clone());

        // A competing block containing one of the two sneaks in first.
        let mut winner = Block::new(vec![winner_tx], GENESIS_PREVIOUS_HASH.to_string());
        let mut attempts = 0;
        Blockchain::mine_with_cancel(&mut winner, 1, &AtomicBool::new(false), &mut attempts);

        // Simulate the race: selection happens, then the peer block lands
        // before our search ends.
        node.currently_mining.store(true, Ordering::Relaxed);
        let selected = node.mempool.lock().unwrap().pop_top(2);
        node.accept_block(&winner).unwrap();
        node.currently_mining.store(false, Ordering::Relaxed);
        return_to_mempool(&node, selected);

        // Only the not-yet-committed transaction came back.
        let rest = node.mempool.lock().unwrap().snapshot_sorted();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].same_identity(&loser_tx));
    }
}
