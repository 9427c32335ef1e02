use crate::logger::Logs;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// Connect/read budget for the short-lived registry calls. A slow or absent
/// bootstrap just skips a discovery cycle.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerAddr {
    pub ip: String,
    pub port: u16,
}

impl MinerAddr {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Bind with an explicit accept backlog (the `QUEUED_CONNECTION` setting).
pub fn bind_with_backlog(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

/// The rendezvous registry. Miners register at startup and re-fetch the
/// list periodically; each connection carries exactly one JSON line in and
/// one out. Entries are never removed — peers discover stale ones through
/// failed dials.
pub struct BootstrapNode {
    listen: SocketAddr,
    backlog: u32,
    registered: Mutex<BTreeMap<(String, u16), MinerAddr>>,
    logs: Logs,
}

impl BootstrapNode {
    pub fn new(listen: SocketAddr, backlog: u32, logs: Logs) -> Arc<Self> {
        Arc::new(Self {
            listen,
            backlog,
            registered: Mutex::new(BTreeMap::new()),
            logs,
        })
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let listener = bind_with_backlog(self.listen, self.backlog)?;
        self.logs
            .emit(format!("[BOOTSTRAP NODE] Listening on {}", self.listen));

        loop {
            let socket = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => socket,
                    Err(e) => {
                        self.logs.emit(format!("[BOOTSTRAP NODE ERROR] accept: {}", e));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node.handle_request(socket).await {
                    node.logs.emit(format!("[BOOTSTRAP NODE ERROR] {}", e));
                }
            });
        }
    }

    async fn handle_request(&self, mut socket: TcpStream) -> Result<()> {
        let (reader, mut writer) = socket.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let n = timeout(CALL_TIMEOUT, reader.read_line(&mut line)).await??;
        if n == 0 {
            return Ok(());
        }

        let request: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(_) => json!({}),
        };

        let response = match request.get("type").and_then(|t| t.as_str()) {
            Some("REGISTER_MINER") => self.register(&request),
            Some("GET_MINERS") => {
                let miners = self.miners();
                self.logs
                    .emit("[BOOTSTRAP NODE] Sent miners list to client".to_string());
                serde_json::to_value(miners)?
            }
            _ => json!({"error": "unknown request"}),
        };

        writer
            .write_all(format!("{}\n", response).as_bytes())
            .await?;
        Ok(())
    }

    fn register(&self, request: &Value) -> Value {
        let ip = request.get("ip").and_then(|v| v.as_str());
        let port = request.get("port").and_then(|v| v.as_u64());
        let (Some(ip), Some(port)) = (ip, port) else {
            return json!({"error": "unknown request"});
        };
        let port = port as u16;

        let miners = {
            let mut registered = self.registered.lock().unwrap();
            registered.insert(
                (ip.to_string(), port),
                MinerAddr {
                    ip: ip.to_string(),
                    port,
                },
            );
            registered.values().cloned().collect::<Vec<_>>()
        };
        self.logs
            .emit(format!("[BOOTSTRAP NODE] Miner registered: {}:{}", ip, port));
        json!({"status": "registered", "miners": miners})
    }

    fn miners(&self) -> Vec<MinerAddr> {
        self.registered.lock().unwrap().values().cloned().collect()
    }
}

/// One-shot client call: a single JSON line out, a single line back.
async fn call(bootstrap_addr: &str, request: &Value) -> Result<Value> {
    let stream = timeout(CALL_TIMEOUT, TcpStream::connect(bootstrap_addr)).await??;
    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(format!("{}\n", request).as_bytes())
        .await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    timeout(CALL_TIMEOUT, reader.read_line(&mut line)).await??;
    Ok(serde_json::from_str(line.trim())?)
}

/// Register this miner and return the full peer list the registry replied
/// with (which may include the caller itself).
pub async fn register_miner(bootstrap_addr: &str, ip: &str, port: u16) -> Result<Vec<MinerAddr>> {
    let request = json!({
        "type": "REGISTER_MINER",
        "id": format!("{}:{}", ip, port),
        "ip": ip,
        "port": port,
    });
    let response = call(bootstrap_addr, &request).await?;
    let miners = response
        .get("miners")
        .cloned()
        .unwrap_or_else(|| json!([]));
    Ok(serde_json::from_value(miners)?)
}

pub async fn fetch_miners(bootstrap_addr: &str) -> Result<Vec<MinerAddr>> {
    let response = call(bootstrap_addr, &json!({"type": "GET_MINERS"})).await?;
    Ok(serde_json::from_value(response)?)
}
