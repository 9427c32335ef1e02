use crate::blockchain::{Block, Transaction};
use crate::bootstrap::{self, MinerAddr};
use anyhow::{Result, anyhow};
use rand::seq::IndexedRandom;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A thin wallet client: discovers miners through the bootstrap once, then
/// opens a fresh connection per request to a randomly chosen miner. Wallet
/// connections send no handshake; the first framed JSON is the request.
pub struct WalletClient {
    pub owner: String,
    miners: Vec<MinerAddr>,
}

impl WalletClient {
    pub async fn connect(owner: &str, bootstrap_addr: &str) -> Result<Self> {
        let miners = bootstrap::fetch_miners(bootstrap_addr).await?;
        if miners.is_empty() {
            return Err(anyhow!("no miners registered at {}", bootstrap_addr));
        }
        Ok(Self {
            owner: owner.to_string(),
            miners,
        })
    }

    fn select_miner(&self) -> Result<&MinerAddr> {
        self.miners
            .choose(&mut rand::rng())
            .ok_or_else(|| anyhow!("no miners available"))
    }

    async fn request(&self, request: &Value) -> Result<Value> {
        let miner = self.select_miner()?;
        let stream = timeout(REQUEST_TIMEOUT, TcpStream::connect(miner.addr())).await??;
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(format!("{}\n", request).as_bytes())
            .await?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await??;
        Ok(serde_json::from_str(line.trim())?)
    }

    pub async fn send_transaction(&self, receiver: &str, amount: i64, fee: i64) -> Result<()> {
        if amount <= 0 {
            return Err(anyhow!("amount must be positive"));
        }
        let request = json!({
            "type": "TRANSACTION",
            "sender": self.owner,
            "receiver": receiver,
            "amount": amount,
            "fee": fee,
        });
        let response = self.request(&request).await?;
        if response.get("status").and_then(|s| s.as_str()) == Some("transaction_received") {
            Ok(())
        } else {
            Err(anyhow!("miner refused transaction: {}", response))
        }
    }

    pub async fn balance(&self) -> Result<i64> {
        let response = self
            .request(&json!({"type": "GET_BALANCE", "wallet": self.owner}))
            .await?;
        response
            .get("balance")
            .and_then(|b| b.as_i64())
            .ok_or_else(|| anyhow!("malformed balance response: {}", response))
    }

    pub async fn blockchain(&self) -> Result<Vec<Block>> {
        let response = self.request(&json!({"type": "GET_BLOCKCHAIN"})).await?;
        let chain = response
            .get("blockchain")
            .cloned()
            .ok_or_else(|| anyhow!("malformed blockchain response"))?;
        Ok(serde_json::from_value(chain)?)
    }

    pub async fn mempool(&self) -> Result<Vec<Transaction>> {
        let response = self.request(&json!({"type": "GET_MEMPOOL"})).await?;
        let pending = response
            .get("mempool")
            .cloned()
            .ok_or_else(|| anyhow!("malformed mempool response"))?;
        Ok(serde_json::from_value(pending)?)
    }
}
