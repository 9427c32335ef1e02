mod completions;

use anyhow::{Result, anyhow};
use clap::{Parser, ValueHint};
use colored::Colorize;
use minichain::bootstrap::BootstrapNode;
use minichain::config::Config;
use minichain::daemon::{MinerNode, NodeConfig};
use minichain::logger::Logs;
use minichain::wallet::WalletClient;
use std::net::SocketAddr;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "minichain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Educational peer-to-peer proof-of-work network")]
pub struct Cli {
    /// Run the bootstrap registry
    #[arg(long)]
    bootstrap_node: bool,

    /// Run a mining node
    #[arg(long)]
    miner: bool,

    /// Run the bootstrap plus every configured miner in one process
    #[arg(long)]
    localnet: bool,

    /// Wallet owner name; enables the wallet one-shot commands
    #[arg(short = 'w', long, value_hint = ValueHint::Other)]
    wallet: Option<String>,

    /// Listen address as ip:port (bootstrap and miner modes)
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    listen: Option<String>,

    /// Bootstrap address as ip:port (overrides the config file)
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    bootstrap: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "minichain.json", value_hint = ValueHint::FilePath)]
    config: String,

    /// Send a transaction (wallet mode)
    #[arg(long)]
    send: bool,

    /// Destination wallet for --send
    #[arg(long, value_hint = ValueHint::Other)]
    to: Option<String>,

    /// Amount to send
    #[arg(long, value_hint = ValueHint::Other)]
    amount: Option<i64>,

    /// Fee attached to the transaction (higher mines sooner)
    #[arg(long, default_value = "0", value_hint = ValueHint::Other)]
    fee: i64,

    /// Print the wallet balance
    #[arg(long)]
    balance: bool,

    /// Print the chain as seen by a miner
    #[arg(long = "chain")]
    show_chain: bool,

    /// Print the pending transactions as seen by a miner
    #[arg(long = "mempool")]
    show_mempool: bool,

    #[arg(long = "install-completions", value_name = "SHELL")]
    pub install_completions: Option<String>,
}

fn parse_addr(addr: &str) -> Result<(String, u16)> {
    let (ip, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected ip:port, got {}", addr))?;
    Ok((ip.to_string(), port.parse()?))
}

fn node_config(config: &Config, ip: String, port: u16) -> NodeConfig {
    NodeConfig {
        ip,
        port,
        bootstrap_addr: config.bootstrap_addr(),
        trans_per_block: config.trans_per_block,
        difficulty: config.mining_difficulty,
        backlog: config.queued_connection,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = &cli.install_completions {
        if shell == "stdout" {
            completions::print_to_stdout("bash")?;
        } else {
            let path = completions::install_user_completion(shell)?;
            println!("Completions installed to: {}", path.display());
        }
        return Ok(());
    }

    let full_version = format!(
        "v{}+{}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH_SHORT").unwrap_or("unknown")
    );
    println!("{}", format!("MINICHAIN {}", full_version).purple());

    let mut config = Config::load(&cli.config)?;
    if let Some(bootstrap) = &cli.bootstrap {
        let (ip, port) = parse_addr(bootstrap)?;
        config.bootstrap_ip = ip;
        config.bootstrap_port = port;
    }

    let logs = Logs::new();
    let shutdown = CancellationToken::new();
    if let Some(sink) = config.log_sink_addr.clone() {
        logs.spawn_ws_forwarder(sink, shutdown.clone());
    }

    if cli.bootstrap_node {
        run_bootstrap_mode(&cli, &config, logs, shutdown).await
    } else if cli.miner {
        run_miner_mode(&cli, &config, logs, shutdown).await
    } else if cli.localnet {
        run_localnet_mode(&config, logs, shutdown).await
    } else if let Some(owner) = cli.wallet.clone() {
        run_wallet_mode(&cli, &config, &owner).await
    } else {
        Err(anyhow!(
            "pick a mode: --bootstrap-node, --miner, --localnet or --wallet <name> (see --help)"
        ))
    }
}

async fn run_bootstrap_mode(
    cli: &Cli,
    config: &Config,
    logs: Logs,
    shutdown: CancellationToken,
) -> Result<()> {
    let listen: SocketAddr = cli
        .listen
        .clone()
        .unwrap_or_else(|| config.bootstrap_addr())
        .parse()?;
    let registry = BootstrapNode::new(listen, config.queued_connection, logs);
    let handle = tokio::spawn(registry.run(shutdown.clone()));

    tokio::select! {
        joined = handle => joined??,
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down bootstrap node...");
            shutdown.cancel();
        }
    }
    Ok(())
}

async fn run_miner_mode(
    cli: &Cli,
    config: &Config,
    logs: Logs,
    shutdown: CancellationToken,
) -> Result<()> {
    let listen = cli.listen.clone().unwrap_or_else(|| {
        format!(
            "127.0.0.1:{}",
            config.miner_ports.first().copied().unwrap_or(6001)
        )
    });
    let (ip, port) = parse_addr(&listen)?;
    let node = MinerNode::new(node_config(config, ip, port), logs, shutdown.clone());
    let handle = tokio::spawn(node.run());

    tokio::select! {
        joined = handle => joined??,
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down miner...");
            shutdown.cancel();
        }
    }
    Ok(())
}

/// Demo topology: the registry plus every configured miner in one process.
async fn run_localnet_mode(config: &Config, logs: Logs, shutdown: CancellationToken) -> Result<()> {
    let listen: SocketAddr = config.bootstrap_addr().parse()?;
    let registry = BootstrapNode::new(listen, config.queued_connection, logs.clone());
    tokio::spawn(registry.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(500)).await;

    for port in &config.miner_ports {
        let port = *port;
        let node = MinerNode::new(
            node_config(config, "127.0.0.1".to_string(), port),
            logs.clone(),
            shutdown.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = node.run().await {
                eprintln!("Miner {} error: {}", port, e);
            }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    tokio::signal::ctrl_c().await?;
    println!("Shutting down localnet...");
    shutdown.cancel();
    Ok(())
}

async fn run_wallet_mode(cli: &Cli, config: &Config, owner: &str) -> Result<()> {
    let client = WalletClient::connect(owner, &config.bootstrap_addr()).await?;

    if cli.send {
        let to = cli
            .to
            .clone()
            .ok_or_else(|| anyhow!("missing --to argument for send"))?;
        let amount = cli
            .amount
            .ok_or_else(|| anyhow!("missing --amount argument for send"))?;
        client.send_transaction(&to, amount, cli.fee).await?;
        println!(
            "{} {} -> {} amount {} fee {}",
            "Transaction sent:".green(),
            owner,
            to,
            amount,
            cli.fee
        );
    }

    if cli.show_chain {
        let chain = client.blockchain().await?;
        println!("{} {}", "Chain height:".cyan(), chain.len());
        for (i, block) in chain.iter().enumerate() {
            println!(
                "  #{} {}... ({} transactions)",
                i,
                &block.hash[..16.min(block.hash.len())],
                block.transactions.len()
            );
        }
    }

    if cli.show_mempool {
        let pending = client.mempool().await?;
        println!("{} {}", "Pending transactions:".cyan(), pending.len());
        for tx in &pending {
            println!(
                "  {} -> {} amount {} fee {}",
                tx.sender, tx.receiver, tx.amount, tx.fee
            );
        }
    }

    // Balance is the default query when nothing else was asked for.
    if cli.balance || (!cli.send && !cli.show_chain && !cli.show_mempool) {
        println!("{} {}", "Wallet:".blue(), owner);
        println!("{} {}", "Balance:".yellow(), client.balance().await?);
    }

    Ok(())
}
