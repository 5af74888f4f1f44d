// PeaFetch node: serve a data directory over the fetch protocol, or fetch one key from a peer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fetch_core::Keypair;
use fetch_node::config::{self, Config};
use fetch_node::store::DirStore;
use fetch_node::{Ctx, Fetcher, Host, PeerAddr, Responder, TcpHost};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fetch-node", version, about = "PeaFetch request/response node")]
struct Cli {
    /// Config file (default: ~/.config/peafetch/config.toml, then /etc/peafetch/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer fetch requests from the files in the data directory.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Fetch one key from a peer and write it to stdout (or --output).
    Get {
        /// <peer-id>@<host:port>
        peer: PeerAddr,
        key: String,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print this node's peer id, creating the identity file if needed.
    Id,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Serve { port, data_dir } => {
            if let Some(p) = port {
                cfg.listen_port = p;
            }
            if let Some(d) = data_dir {
                cfg.data_dir = d;
            }
            rt.block_on(serve(cfg))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Get {
            peer,
            key,
            timeout_secs,
            output,
        } => {
            if let Some(t) = timeout_secs {
                cfg.fetch_timeout_secs = t;
            }
            rt.block_on(get(cfg, peer, &key, output))
        }
        Command::Id => {
            println!("{}", cfg.keypair()?.peer_id());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let host = Arc::new(TcpHost::new(cfg.keypair()?));
    let ctx = Ctx::background();

    Responder::new(DirStore::new(&cfg.data_dir).into_get_value())
        .with_max_message_size(cfg.max_message_size)
        .serve(host.as_ref(), ctx.clone());

    let bind = SocketAddr::new(cfg.listen_addr, cfg.listen_port);
    let addr = host
        .listen(bind, ctx.clone())
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(
        peer = %host.local_peer(),
        %addr,
        data_dir = %cfg.data_dir.display(),
        "serving"
    );
    println!("{}@{}", host.local_peer(), addr);

    shutdown_signal().await?;
    info!("shutting down");
    ctx.cancel();
    Ok(())
}

async fn get(
    cfg: Config,
    target: PeerAddr,
    key: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    // requesters need no stable identity
    let host = Arc::new(TcpHost::new(Keypair::generate()));
    host.add_address(target.peer, target.addr);
    let fetcher = Fetcher::new(host)
        .with_timeout(cfg.fetch_timeout())
        .with_max_message_size(cfg.max_message_size);

    let ctx = Ctx::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let found = fetcher
        .fetch(&ctx, target.peer, key)
        .await
        .with_context(|| format!("fetching {key:?} from {}", target.peer))?;
    let Some(data) = found else {
        eprintln!("{key}: not found");
        return Ok(ExitCode::from(2));
    };
    match output {
        Some(path) => tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut out = tokio::io::stdout();
            out.write_all(&data).await?;
            out.flush().await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
