use crate::blockchain::{Block, BlockError, Blockchain, Transaction};
use crate::bootstrap::{self, MinerAddr, bind_with_backlog};
use crate::logger::Logs;
use crate::mempool::Mempool;
use anyhow::Result;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Duration, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;

/// How long the acceptor waits for the first bytes before treating a silent
/// connection as a wallet.
const PEEK_TIMEOUT: Duration = Duration::from_secs(2);
/// Wallet connections are reaped after this much read silence, so a
/// misclassified or abandoned socket cannot wedge a slot.
const WALLET_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
const STARTUP_SYNC_DELAY: Duration = Duration::from_secs(2);

/// Per-node settings, resolved from the global config plus the listen
/// address the operator chose.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub ip: String,
    pub port: u16,
    pub bootstrap_addr: String,
    pub trans_per_block: usize,
    pub difficulty: usize,
    pub backlog: u32,
}

/// A mining node: chain, mempool and peer links, one listening socket
/// multiplexing miner and wallet traffic, plus the background discovery and
/// mining tasks spawned from `run`.
pub struct MinerNode {
    pub config: NodeConfig,
    pub chain: Mutex<Blockchain>,
    pub mempool: Mutex<Mempool>,
    peers: PeerTable,
    pub currently_mining: AtomicBool,
    pub stop_mining: AtomicBool,
    pub logs: Logs,
    shutdown: CancellationToken,
}

struct PeerLink {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Live peer links plus the set of advertised addresses we hold outbound
/// dials to. Inbound links carry no advertised address (their source port is
/// ephemeral); both directions join the broadcast set, and duplicate
/// delivery between a pair is absorbed by dedup on the receiving side.
#[derive(Default)]
struct PeerTable {
    links: Mutex<Vec<PeerLink>>,
    dialed: Mutex<HashSet<(String, u16)>>,
    next_id: AtomicU64,
}

impl PeerTable {
    fn add(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.links.lock().unwrap().push(PeerLink { id, tx });
        id
    }

    fn remove(&self, id: u64) {
        self.links.lock().unwrap().retain(|l| l.id != id);
    }

    fn count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    fn is_dialed(&self, key: &(String, u16)) -> bool {
        self.dialed.lock().unwrap().contains(key)
    }

    fn mark_dialed(&self, key: (String, u16)) {
        self.dialed.lock().unwrap().insert(key);
    }

    fn undial(&self, key: &(String, u16)) {
        self.dialed.lock().unwrap().remove(key);
    }

    /// Queue `message` on every link except `exclude`. A link whose writer
    /// has died is pruned here; delivery is best-effort.
    fn broadcast(&self, message: &str, exclude: Option<u64>) -> usize {
        let line = format!("{}\n", message);
        let mut links = self.links.lock().unwrap();
        let mut sent = 0;
        links.retain(|l| {
            if Some(l.id) == exclude {
                return true;
            }
            match l.tx.send(line.clone()) {
                Ok(()) => {
                    sent += 1;
                    true
                }
                Err(_) => false,
            }
        });
        sent
    }

    fn send_to(&self, id: u64, message: &str) {
        let line = format!("{}\n", message);
        let links = self.links.lock().unwrap();
        if let Some(link) = links.iter().find(|l| l.id == id) {
            let _ = link.tx.send(line);
        }
    }

    fn send_to_any(&self, message: &str) -> bool {
        let line = format!("{}\n", message);
        let links = self.links.lock().unwrap();
        links
            .first()
            .map(|l| l.tx.send(line).is_ok())
            .unwrap_or(false)
    }
}

impl MinerNode {
    pub fn new(config: NodeConfig, logs: Logs, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            config,
            chain: Mutex::new(Blockchain::new()),
            mempool: Mutex::new(Mempool::new()),
            peers: PeerTable::default(),
            currently_mining: AtomicBool::new(false),
            stop_mining: AtomicBool::new(false),
            logs,
            shutdown,
        })
    }

    /// Bind, register, and serve until shutdown. A failed bind is fatal for
    /// the node; a failed registration is not (the reconciler retries
    /// discovery every cycle).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listen: SocketAddr = format!("{}:{}", self.config.ip, self.config.port).parse()?;
        let listener = bind_with_backlog(listen, self.config.backlog)?;
        self.logs.emit(format!(
            "[MINER {}] Listening on {}:{}",
            self.config.port, self.config.ip, self.config.port
        ));

        match bootstrap::register_miner(
            &self.config.bootstrap_addr,
            &self.config.ip,
            self.config.port,
        )
        .await
        {
            Ok(miners) => {
                self.logs.emit(format!(
                    "[MINER {}] Registered with bootstrap, {} miner(s) known",
                    self.config.port,
                    miners.len()
                ));
                let peers: Vec<String> = miners
                    .iter()
                    .filter(|m| m.ip != self.config.ip || m.port != self.config.port)
                    .map(MinerAddr::addr)
                    .collect();
                self.logs.emit(format!(
                    "[MINER {}] Peers received: {:?}",
                    self.config.port, peers
                ));
                for peer in &miners {
                    self.connect_to_peer(peer).await;
                }
            }
            Err(e) => {
                self.logs.emit(format!(
                    "[MINER {}] Error registering with bootstrap: {}",
                    self.config.port, e
                ));
            }
        }

        tokio::spawn(self.clone().reconcile_peers());
        tokio::spawn(self.clone().startup_sync());
        tokio::spawn(crate::miner::auto_mine(self.clone()));

        loop {
            let socket = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => socket,
                    Err(e) => {
                        self.logs.emit(format!(
                            "[MINER {}] accept error: {}",
                            self.config.port, e
                        ));
                        sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            let node = self.clone();
            tokio::spawn(async move { node.handle_connection(socket).await });
        }
    }

    /// Classify an inbound socket by peeking at its first line: `MINER`
    /// marks a peer link, anything else (including a peek timeout) is a
    /// wallet. Peeking never consumes, so the wallet path still sees the
    /// client's first request intact.
    async fn handle_connection(self: Arc<Self>, socket: TcpStream) {
        let peer_addr = socket
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string());

        if self.classify_as_miner(&socket).await {
            let (read_half, write_half) = socket.into_split();
            let mut reader = BufReader::new(read_half);
            let mut handshake = String::new();
            if reader.read_line(&mut handshake).await.is_err() {
                return;
            }
            self.logs.emit(format!(
                "[MINER {}] Accepted miner connection from {}",
                self.config.port, peer_addr
            ));
            self.spawn_peer_link(reader, write_half, None);
        } else {
            self.handle_wallet(socket).await;
        }
    }

    async fn classify_as_miner(&self, socket: &TcpStream) -> bool {
        let mut buf = [0u8; 16];
        let peeked = timeout(PEEK_TIMEOUT, async {
            loop {
                match socket.peek(&mut buf).await {
                    Ok(0) | Err(_) => return false,
                    Ok(n) if n >= 5 || buf[..n].contains(&b'\n') => {
                        return buf[..n].starts_with(b"MINER");
                    }
                    // First line still in flight; peek again shortly.
                    Ok(_) => sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await;
        matches!(peeked, Ok(true))
    }

    /// Wire a classified peer socket into the table: a writer task draining
    /// a per-link queue (so one slow peer cannot stall a broadcast) and a
    /// reader task dispatching messages. Either side failing tears the link
    /// down and, for outbound links, frees the address for re-dialing.
    fn spawn_peer_link(
        self: &Arc<Self>,
        reader: BufReader<OwnedReadHalf>,
        write_half: OwnedWriteHalf,
        dialed_key: Option<(String, u16)>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let id = self.peers.add(tx);

        let writer_node = self.clone();
        let writer_key = dialed_key.clone();
        tokio::spawn(async move {
            let mut write_half = write_half;
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            writer_node.peers.remove(id);
            if let Some(key) = writer_key {
                writer_node.peers.undial(&key);
            }
        });

        let reader_node = self.clone();
        tokio::spawn(async move {
            reader_node.read_peer_messages(reader, id).await;
            reader_node.peers.remove(id);
            if let Some(key) = dialed_key {
                reader_node.peers.undial(&key);
            }
        });
    }

    async fn read_peer_messages(&self, mut reader: BufReader<OwnedReadHalf>, link_id: u64) {
        let mut line = String::new();
        loop {
            line.clear();
            let n = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                n = reader.read_line(&mut line) => match n {
                    Ok(n) => n,
                    Err(_) => return,
                },
            };
            if n == 0 {
                return;
            }
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            self.dispatch_peer_message(message, link_id);
        }
    }

    /// Route one peer message by shape: chain requests and responses by
    /// their `type`, blocks by their field set, everything else that carries
    /// sender/receiver/amount as a transaction. Unparseable lines are
    /// dropped without closing the connection.
    fn dispatch_peer_message(&self, message: &str, link_id: u64) {
        let Ok(parsed) = serde_json::from_str::<Value>(message) else {
            return;
        };

        let msg_type = parsed
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        match msg_type.as_deref() {
            Some("REQUEST_CHAIN") => {
                let response = {
                    let chain = self.chain.lock().unwrap();
                    json!({"type": "CHAIN_RESPONSE", "chain": &chain.chain}).to_string()
                };
                self.peers.send_to(link_id, &response);
            }
            Some("CHAIN_RESPONSE") => {
                let Some(chain_value) = parsed.get("chain") else {
                    return;
                };
                match serde_json::from_value::<Vec<Block>>(chain_value.clone()) {
                    Ok(received) => {
                        self.try_replace_chain(received);
                    }
                    Err(e) => self.logs.emit(format!(
                        "[MINER {}] Failed to parse chain response: {}",
                        self.config.port, e
                    )),
                }
            }
            _ if is_block_shaped(&parsed) => match serde_json::from_value::<Block>(parsed) {
                Ok(block) => match self.accept_block(&block) {
                    // First sight: keep the flood going, minus the source.
                    Ok(()) => {
                        self.peers.broadcast(message, Some(link_id));
                    }
                    Err(BlockError::Duplicate) => {}
                    Err(e) => self.logs.emit(format!(
                        "[MINER {}] Block rejected: {}",
                        self.config.port, e
                    )),
                },
                Err(e) => self.logs.emit(format!(
                    "[MINER {}] Failed to parse block: {}",
                    self.config.port, e
                )),
            },
            _ if looks_like_transaction(&parsed) => {
                if let Ok(tx) = serde_json::from_value::<Transaction>(parsed) {
                    if self.ingest_transaction(tx) {
                        self.peers.broadcast(message, Some(link_id));
                    }
                }
            }
            _ => {}
        }
    }

    /// Validate and append a block received from a peer or sealed locally
    /// from a peer's perspective. On acceptance any in-flight mining attempt
    /// is cancelled and the block's transactions leave the mempool.
    pub fn accept_block(&self, block: &Block) -> Result<(), BlockError> {
        let chain_len = {
            let mut chain = self.chain.lock().unwrap();
            chain.check_incoming(block, self.config.difficulty)?;
            if self.currently_mining.load(Ordering::Relaxed) {
                self.stop_mining.store(true, Ordering::Relaxed);
                self.logs.emit(format!(
                    "[MINER {}] Stopping current mining due to new block",
                    self.config.port
                ));
            }
            chain.append(block.clone());
            chain.len()
        };
        self.mempool.lock().unwrap().remove_present_in(block);
        self.logs.emit(format!(
            "[MINER {}] Block accepted: {}... (Chain length: {})",
            self.config.port,
            &block.hash[..16],
            chain_len
        ));
        Ok(())
    }

    /// Adopt a peer's chain when it is strictly longer and fully valid.
    /// Equal length never replaces. The mempool is filtered afterwards so
    /// nothing already committed lingers as pending.
    pub fn try_replace_chain(&self, new_chain: Vec<Block>) -> bool {
        let committed = {
            let mut chain = self.chain.lock().unwrap();
            if new_chain.len() <= chain.len() {
                return false;
            }
            if !Blockchain::validate_chain(&new_chain, self.config.difficulty) {
                self.logs
                    .emit(format!("[MINER {}] New chain invalid", self.config.port));
                return false;
            }
            self.logs.emit(format!(
                "[MINER {}] Replacing chain: {} -> {} blocks",
                self.config.port,
                chain.len(),
                new_chain.len()
            ));
            if self.currently_mining.load(Ordering::Relaxed) {
                self.stop_mining.store(true, Ordering::Relaxed);
            }
            chain.replace(new_chain);
            chain.committed_tx_jsons()
        };
        self.mempool.lock().unwrap().remove_committed(&committed);
        true
    }

    /// Mempool insertion with the dedup rules: identity already pending or
    /// already committed means the transaction is silently ignored. Returns
    /// whether it was novel (the caller's re-flood signal).
    pub fn ingest_transaction(&self, tx: Transaction) -> bool {
        if self.chain.lock().unwrap().contains_identity(&tx) {
            return false;
        }
        self.mempool.lock().unwrap().insert(tx)
    }

    pub fn calculate_balance(&self, wallet: &str) -> i64 {
        let on_chain = self.chain.lock().unwrap().balance_of(wallet);
        let pending = self.mempool.lock().unwrap().balance_of(wallet);
        on_chain + pending
    }

    pub fn broadcast_line(&self, message: &str, exclude: Option<u64>) -> usize {
        self.peers.broadcast(message, exclude)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    async fn handle_wallet(&self, mut socket: TcpStream) {
        let (reader, mut writer) = socket.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            let n = match timeout(WALLET_IDLE_TIMEOUT, reader.read_line(&mut line)).await {
                Ok(Ok(n)) => n,
                _ => return,
            };
            if n == 0 {
                return;
            }
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            let response = self.wallet_response(message);
            if writer
                .write_all(format!("{}\n", response).as_bytes())
                .await
                .is_err()
            {
                return;
            }
        }
    }

    fn wallet_response(&self, message: &str) -> Value {
        let Ok(request) = serde_json::from_str::<Value>(message) else {
            return json!({"status": "error", "message": "Invalid JSON"});
        };

        let req_type = request
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_owned);
        match req_type.as_deref() {
            Some("TRANSACTION") => {
                if let Ok(tx) = serde_json::from_value::<Transaction>(request) {
                    if self.ingest_transaction(tx) {
                        self.logs.emit(format!(
                            "[MINER {}] Transaction added to mempool",
                            self.config.port
                        ));
                    }
                    // The raw line goes to every peer either way; their own
                    // dedup absorbs repeats.
                    self.peers.broadcast(message, None);
                }
                json!({"status": "transaction_received"})
            }
            Some("GET_BALANCE") => {
                let wallet = request.get("wallet").and_then(|w| w.as_str()).unwrap_or("");
                json!({"status": "success", "balance": self.calculate_balance(wallet)})
            }
            Some("GET_BLOCKCHAIN") => {
                let chain = self.chain.lock().unwrap();
                json!({"status": "success", "blockchain": &chain.chain})
            }
            Some("GET_MEMPOOL") => {
                let snapshot = self.mempool.lock().unwrap().snapshot_sorted();
                json!({"status": "success", "mempool": snapshot})
            }
            _ => json!({"status": "error", "message": "Unknown request"}),
        }
    }

    /// Open an outbound link to an advertised peer unless one exists. The
    /// `MINER\n` handshake is the very first thing on the wire.
    pub async fn connect_to_peer(self: &Arc<Self>, peer: &MinerAddr) {
        if peer.ip == self.config.ip && peer.port == self.config.port {
            return;
        }
        let key = (peer.ip.clone(), peer.port);
        if self.peers.is_dialed(&key) {
            return;
        }

        match timeout(DIAL_TIMEOUT, TcpStream::connect(peer.addr())).await {
            Ok(Ok(mut stream)) => {
                if stream.write_all(b"MINER\n").await.is_err() {
                    return;
                }
                self.peers.mark_dialed(key.clone());
                let (read_half, write_half) = stream.into_split();
                self.spawn_peer_link(BufReader::new(read_half), write_half, Some(key));
                self.logs.emit(format!(
                    "[MINER {}] Connected to miner {}:{}",
                    self.config.port, peer.ip, peer.port
                ));
            }
            _ => {
                self.logs.emit(format!(
                    "[MINER {}] Failed to connect to miner {}:{}",
                    self.config.port, peer.ip, peer.port
                ));
            }
        }
    }

    /// Periodically re-fetch the registry list and dial anyone new. A
    /// failed fetch skips the cycle; dead links were undialed on teardown,
    /// so this loop also heals dropped connections.
    async fn reconcile_peers(self: Arc<Self>) {
        let mut ticker = interval(RECONCILE_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let Ok(miners) = bootstrap::fetch_miners(&self.config.bootstrap_addr).await else {
                continue;
            };
            for peer in &miners {
                self.connect_to_peer(peer).await;
            }
        }
    }

    /// One catch-up request shortly after startup, once the initial links
    /// have had a moment to come up.
    async fn startup_sync(self: Arc<Self>) {
        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            _ = sleep(STARTUP_SYNC_DELAY) => {}
        }
        let request = json!({"type": "REQUEST_CHAIN"}).to_string();
        if self.peers.send_to_any(&request) {
            self.logs.emit(format!(
                "[MINER {}] Requesting blockchain from peers...",
                self.config.port
            ));
        }
    }
}

fn is_block_shaped(value: &Value) -> bool {
    ["hash", "previous_hash", "transactions", "nonce"]
        .iter()
        .all(|k| value.get(k).is_some())
}

fn looks_like_transaction(value: &Value) -> bool {
    ["sender", "receiver", "amount"]
        .iter()
        .all(|k| value.get(k).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::GENESIS_PREVIOUS_HASH;

    fn test_node(port: u16) -> Arc<MinerNode> {
        MinerNode::new(
            NodeConfig {
                ip: "127.0.0.1".to_string(),
                port,
                bootstrap_addr: "127.0.0.1:1".to_string(),
                trans_per_block: 2,
                difficulty: 1,
                backlog: 10,
            },
            Logs::new(),
            CancellationToken::new(),
        )
    }

    fn mined(transactions: Vec<Transaction>, previous_hash: &str) -> Block {
        let mut block = Block::new(transactions, previous_hash.to_string());
        let mut attempts = 0;
        let cancel = AtomicBool::new(false);
        Blockchain::mine_with_cancel(&mut block, 1, &cancel, &mut attempts);
        block
    }

    #[test]
    fn ingest_rejects_pending_and_committed_duplicates() {
        let node = test_node(6001);
        let tx = Transaction::new("Alice", "Bob", 1, 5);
        assert!(node.ingest_transaction(tx.clone()));
        assert!(!node.ingest_transaction(tx.clone()));

        let block = mined(vec![tx.clone()], GENESIS_PREVIOUS_HASH);
        node.accept_block(&block).unwrap();
        // Sealed into the chain: gone from the mempool and not re-insertable.
        assert_eq!(node.mempool.lock().unwrap().len(), 0);
        assert!(!node.ingest_transaction(tx));
    }

    #[test]
    fn accepting_a_block_cancels_mining_and_strips_mempool() {
        let node = test_node(6001);
        let sealed = Transaction::new("Alice", "Bob", 1, 5);
        let pending = Transaction::new("Bob", "Carol", 2, 3);
        node.ingest_transaction(sealed.clone());
        node.ingest_transaction(pending.clone());
        node.currently_mining.store(true, Ordering::Relaxed);

        let block = mined(vec![sealed], GENESIS_PREVIOUS_HASH);
        node.accept_block(&block).unwrap();

        assert!(node.stop_mining.load(Ordering::Relaxed));
        let rest = node.mempool.lock().unwrap().snapshot_sorted();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].same_identity(&pending));
        assert_eq!(node.chain.lock().unwrap().last_block_hash, block.hash);

        assert_eq!(node.accept_block(&block), Err(BlockError::Duplicate));
    }

    #[test]
    fn replacement_requires_strictly_longer_chain() {
        let node = test_node(6001);
        let b1 = mined(vec![Transaction::new("Alice", "Bob", 1, 5)], GENESIS_PREVIOUS_HASH);
        node.accept_block(&b1).unwrap();

        // Same length: no replacement.
        let c1 = mined(vec![Transaction::new("Dave", "Eve", 1, 2)], GENESIS_PREVIOUS_HASH);
        assert!(!node.try_replace_chain(vec![c1.clone()]));
        assert_eq!(node.chain.lock().unwrap().last_block_hash, b1.hash);

        // Longer and valid: adopted, and its transactions leave the mempool.
        node.ingest_transaction(Transaction::new("Eve", "Frank", 1, 4));
        let c2 = mined(vec![Transaction::new("Eve", "Frank", 1, 4)], &c1.hash);
        assert!(node.try_replace_chain(vec![c1, c2.clone()]));
        assert_eq!(node.chain.lock().unwrap().last_block_hash, c2.hash);
        assert_eq!(node.mempool.lock().unwrap().len(), 0);
    }

    #[test]
    fn replacement_rejects_invalid_chains() {
        let node = test_node(6001);
        let b1 = mined(vec![Transaction::new("Alice", "Bob", 1, 5)], GENESIS_PREVIOUS_HASH);
        let mut b2 = mined(vec![Transaction::new("Bob", "Carol", 1, 2)], &b1.hash);
        b2.hash = "f".repeat(64);
        assert!(!node.try_replace_chain(vec![b1, b2]));
        assert!(node.chain.lock().unwrap().is_empty());
    }

    #[test]
    fn wallet_responses_cover_the_catalog() {
        let node = test_node(6001);
        let resp = node.wallet_response(
            r#"{"type":"TRANSACTION","sender":"Alice","receiver":"Bob","amount":10,"fee":1}"#,
        );
        assert_eq!(resp["status"], "transaction_received");
        assert_eq!(node.mempool.lock().unwrap().len(), 1);

        let resp = node.wallet_response(r#"{"type":"GET_BALANCE","wallet":"Alice"}"#);
        assert_eq!(resp["status"], "success");
        assert_eq!(resp["balance"], -10);

        let resp = node.wallet_response(r#"{"type":"GET_MEMPOOL"}"#);
        assert_eq!(resp["mempool"].as_array().unwrap().len(), 1);

        let resp = node.wallet_response(r#"{"type":"GET_BLOCKCHAIN"}"#);
        assert_eq!(resp["blockchain"].as_array().unwrap().len(), 0);

        let resp = node.wallet_response(r#"{"type":"SOMETHING"}"#);
        assert_eq!(resp["message"], "Unknown request");

        let resp = node.wallet_response("not json at all");
        assert_eq!(resp["message"], "Invalid JSON");
    }

    #[test]
    fn message_shape_detection() {
        let block: Value = serde_json::to_value(mined(
            vec![Transaction::new("Alice", "Bob", 1, 5)],
            GENESIS_PREVIOUS_HASH,
        ))
        .unwrap();
        assert!(is_block_shaped(&block));
        let tx: Value = serde_json::json!({"sender": "a", "receiver": "b", "amount": 1});
        assert!(!is_block_shaped(&tx));
        assert!(looks_like_transaction(&tx));
        assert!(!looks_like_transaction(&json!({"type": "REQUEST_CHAIN"})));
    }
}
