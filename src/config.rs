use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bootstrap_ip: String,
    pub bootstrap_port: u16,
    pub miner_ports: Vec<u16>,
    pub trans_per_block: usize,
    pub mining_difficulty: usize,
    pub queued_connection: u32,
    pub log_sink_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap_ip: "127.0.0.1".to_string(),
            bootstrap_port: 5500,
            miner_ports: vec![6001, 6002, 6003],
            trans_per_block: 2,
            mining_difficulty: 2,
            queued_connection: 10,
            log_sink_addr: None,
        }
    }
}

impl Config {
    /// Load from a JSON file when present (defaults otherwise), then let
    /// environment variables override individual fields.
    pub fn load(path: &str) -> Result<Config> {
        let mut config = if std::path::Path::new(path).exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn bootstrap_addr(&self) -> String {
        format!("{}:{}", self.bootstrap_ip, self.bootstrap_port)
    }

    fn apply_env(&mut self) {
        if let Ok(ip) = env::var("BOOTSTRAP_IP") {
            self.bootstrap_ip = ip;
        }
        if let Some(port) = parse_env("BOOTSTRAP_PORT") {
            self.bootstrap_port = port;
        }
        if let Ok(ports) = env::var("MINER_PORTS") {
            let parsed: Vec<u16> = ports
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                self.miner_ports = parsed;
            }
        }
        if let Some(k) = parse_env("TRANS_PER_BLOCK") {
            self.trans_per_block = k;
        }
        if let Some(d) = parse_env("MINING_DIFFICULTY") {
            self.mining_difficulty = d;
        }
        if let Some(backlog) = parse_env("QUEUED_CONNECTION") {
            self.queued_connection = backlog;
        }
        if let Ok(addr) = env::var("LOG_SINK_ADDR") {
            if !addr.is_empty() {
                self.log_sink_addr = Some(addr);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
