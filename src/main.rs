//! SnowKV Server
//!
//! The server binary: loads configuration and the token file, opens the
//! store (validating shard headers and replaying change logs), then serves
//! the TCP shell until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use snowkv::config::Config;
use snowkv::server::{handle_session, ShellState, TokenFile};
use snowkv::storage::Store;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line overrides for the most common settings.
struct Args {
    host: String,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    tokens_file: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            data_dir: None,
            tokens_file: None,
        }
    }
}

impl Args {
    fn parse() -> Args {
        let mut args = Args::default();
        let argv: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < argv.len() {
            match argv[i].as_str() {
                "--host" | "-h" => {
                    args.host = take_value(&argv, &mut i, "--host");
                }
                "--port" | "-p" => {
                    let raw = take_value(&argv, &mut i, "--port");
                    args.port = Some(raw.parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    }));
                }
                "--data-dir" | "-d" => {
                    args.data_dir = Some(PathBuf::from(take_value(&argv, &mut i, "--data-dir")));
                }
                "--tokens" | "-t" => {
                    args.tokens_file = Some(PathBuf::from(take_value(&argv, &mut i, "--tokens")));
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("SnowKV version {}", snowkv::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
        }
        args
    }
}

fn take_value(argv: &[String], i: &mut usize, flag: &str) -> String {
    if *i + 1 >= argv.len() {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    }
    let value = argv[*i + 1].clone();
    *i += 2;
    value
}

fn print_help() {
    println!(
        r#"
SnowKV - An In-Memory Key-Value Store with On-Disk Durability

USAGE:
    snowkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>        Shell port (default: {port})
    -d, --data-dir <DIR>     Database directory (default: ./snowkv_data)
    -t, --tokens <FILE>      Token file (default: access.json)
    -v, --version            Print version information
        --help               Print this help message

CONNECTING:
    Any line client works:
    $ nc 127.0.0.1 {port}
    Access token:
    admin> set greeting hello
    1 entry inserted
    admin> get greeting
    hello
"#,
        port = snowkv::DEFAULT_CLI_PORT
    );
}

fn print_banner(addr: &str, shards: usize) {
    println!(
        r#"
      ____                     _  ____   __
     / ___| _ __   _____      _| |/ /\ \ / /
     \___ \| '_ \ / _ \ \ /\ / / ' /  \ V /
      ___) | | | | (_) \ V  V /| . \   | |
     |____/|_| |_|\___/ \_/\_/ |_|\_\  |_|

SnowKV v{} - In-Memory Key-Value Store with On-Disk Durability
──────────────────────────────────────────────────────────────
Shell listening on {} ({} shards)
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        snowkv::VERSION,
        addr,
        shards
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::default();
    if let Some(dir) = args.data_dir {
        config.dir.database = dir;
    }
    if let Some(path) = args.tokens_file {
        config.server.tokens_file = path;
    }
    if let Some(port) = args.port {
        config.server.cli_port = port;
    }
    config.validate()?;

    // Logging per the logs.* group.
    if config.logs.enabled {
        let _subscriber = FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .with_ansi(config.logs.use_colors)
            .with_target(false)
            .init();
    }

    let tokens = TokenFile::load(&config.server.tokens_file)?;
    let signature = tokens.signature.clone();

    // Header validation, shard loading, and change-log replay all happen
    // inside open(); a ready-shard mismatch aborts here.
    let store = Arc::new(Store::open(&config, &signature).await?);
    info!(
        shards = store.shard_count(),
        keys = store.len().await,
        "store ready"
    );

    let state = Arc::new(ShellState::new(
        &config,
        Arc::clone(&store),
        tokens,
        PathBuf::from(snowkv::server::lockdown::SIDECAR_FILE),
    ));

    let addr = format!("{}:{}", args.host, config.server.cli_port);
    let listener = TcpListener::bind(&addr).await?;
    print_banner(&addr, store.shard_count());
    info!(addr = %addr, "shell listening");

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, state) => {}
        _ = shutdown => {}
    }

    // Give the change-log writer its final drain before exiting.
    store.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming shell connections.
async fn accept_loop(listener: TcpListener, state: Arc<ShellState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_session(stream, addr, Arc::clone(&state)));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
