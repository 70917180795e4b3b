//! tonconnect CLI - bridge session diagnostics
//!
//! All commands operate on one file-backed session:
//!   tonconnect init                        → Create (or load) the session, print its id
//!   tonconnect show                        → Print session state (never the private key)
//!   tonconnect listen <bridge-url>         → Print decrypted bridge events until Ctrl+C
//!   tonconnect connect <name>=<bridge> ... → Race a connect against each wallet
//!   tonconnect send <json>                 → Seal and post a raw payload to the peer
//!   tonconnect disconnect                  → Send disconnect and drop the pairing
//!
//! Configuration:
//!   --session <path>   Session file (env TONCONNECT_SESSION)
//!   --ttl <seconds>    Message TTL (default 300)
//!   --topic <topic>    Bridge topic for `send`
//!
//! Output is JSON; `--pretty` (or a tty) pretty-prints it.

use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use tonconnect::logging::init_logging;
use tonconnect::{
    install_signal_handlers, Connector, ConnectorConfig, FileStorage, MessageOptions, Session, Storage,
    Wallet, WalletMessage,
};
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("tonconnect {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("init") => cmd_init(&opts).await,
        Some("show") => cmd_show(&opts).await,
        Some("listen") => cmd_listen(&opts).await,
        Some("connect") => cmd_connect(&opts).await,
        Some("send") => cmd_send(&opts).await,
        Some("disconnect") => cmd_disconnect(&opts).await,
        Some(cmd) => Err(anyhow::anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || std::io::stdout().is_terminal();
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{e:#}")}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    args: Vec<String>,
    session: Option<String>,
    ttl: Option<u64>,
    topic: Option<String>,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--pretty" => opts.pretty = true,
                "--session" | "-s" => {
                    if i + 1 < args.len() {
                        opts.session = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--ttl" => {
                    if i + 1 < args.len() {
                        opts.ttl = args[i + 1].parse().ok();
                        i += 1;
                    }
                }
                "--topic" => {
                    if i + 1 < args.len() {
                        opts.topic = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        opts.args = positional;
        opts
    }

    fn storage(&self) -> FileStorage {
        match &self.session {
            Some(path) => FileStorage::new(path),
            None => FileStorage::new(FileStorage::default_path()),
        }
    }

    fn message_options(&self) -> MessageOptions {
        let mut options = MessageOptions::default();
        if let Some(ttl) = self.ttl {
            options = options.with_ttl(ttl);
        }
        if let Some(topic) = &self.topic {
            options = options.with_topic(topic.clone());
        }
        options
    }
}

async fn connector(opts: &ParsedArgs) -> anyhow::Result<Connector<FileStorage>> {
    let storage = opts.storage();
    debug!(path = %storage.path().display(), "Using session file");
    Ok(Connector::acquire(storage, ConnectorConfig::default()).await?)
}

fn describe(session: &Session) -> Value {
    json!({
        "id": session.id().to_hex(),
        "peer_id": session.peer_id().map(|p| p.to_hex()),
        "bridge_url": session.bridge_url(),
        "last_event_id": session.last_event_id(),
        "last_request_id": session.last_request_id(),
    })
}

async fn cmd_init(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let connector = connector(opts).await?;
    Ok(json!({
        "id": connector.session().id().to_hex(),
        "path": connector.storage().path().display().to_string(),
    }))
}

async fn cmd_show(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let session = opts
        .storage()
        .get()
        .await?
        .ok_or_else(|| anyhow::anyhow!("no session stored, run `tonconnect init` first"))?;
    Ok(describe(&session))
}

async fn cmd_listen(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let connector = connector(opts).await?;
    let bridge_url = opts
        .args
        .first()
        .cloned()
        .or_else(|| connector.session().bridge_url())
        .ok_or_else(|| anyhow::anyhow!("usage: tonconnect listen <bridge-url>"))?;

    let shutdown = install_signal_handlers();
    let mut subscription = connector
        .client()
        .listen::<WalletMessage>(Arc::clone(connector.session()), bridge_url.clone());
    info!(bridge = %bridge_url, "Listening for bridge events");

    let mut received = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                subscription.cancel();
                break;
            }
            inbound = subscription.recv() => match inbound {
                Some(inbound) => {
                    received += 1;
                    println!("{}", json!({
                        "event_id": inbound.event_id,
                        "from": inbound.from.to_hex(),
                        "message": inbound.payload,
                    }));
                }
                None => break,
            },
        }
    }

    let ended = subscription.join().await;
    connector.storage().set(connector.session()).await?;
    ended?;
    Ok(json!({"received": received, "last_event_id": connector.session().last_event_id()}))
}

async fn cmd_connect(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let wallets = opts
        .args
        .iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(name, bridge)| Wallet::new(name, bridge))
                .ok_or_else(|| anyhow::anyhow!("expected <name>=<bridge-url>, got {arg}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if wallets.is_empty() {
        anyhow::bail!("usage: tonconnect connect <name>=<bridge-url> ...");
    }

    let connector = connector(opts).await?;
    let shutdown = install_signal_handlers();
    let response = connector.connect(&wallets, &shutdown).await?;
    Ok(serde_json::to_value(response)?)
}

async fn cmd_send(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let raw = opts.args.join(" ");
    let payload: Value = serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("payload is not JSON: {e}"))?;
    let connector = connector(opts).await?;
    connector
        .client()
        .send(connector.session(), &payload, &opts.message_options())
        .await?;
    Ok(json!({"sent": true, "to": connector.session().peer_id().map(|p| p.to_hex())}))
}

async fn cmd_disconnect(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let connector = connector(opts).await?;
    let shutdown = install_signal_handlers();
    connector.disconnect(&opts.message_options(), &shutdown).await?;
    Ok(describe(connector.session()))
}

fn print_usage() {
    println!(
        r#"tonconnect - TON Connect bridge session tool

USAGE:
    tonconnect <command> [args] [options]

COMMANDS:
    init                          Create or load the session file
    show                          Print session state
    listen [bridge-url]           Print decrypted bridge events until Ctrl+C
    connect <name>=<bridge> ...   Wait for the first wallet to connect
    send <json>                   Seal and post a payload to the connected wallet
    disconnect                    Notify the wallet and drop the pairing

OPTIONS:
    -s, --session <path>   Session file (env: TONCONNECT_SESSION)
        --ttl <seconds>    Message TTL on the bridge (default 300)
        --topic <topic>    Bridge topic for send
        --pretty           Pretty-print JSON output
    -h, --help             Show this help
    -V, --version          Show version

ENVIRONMENT:
    RUST_LOG               Log filter (default: info)
    TONCONNECT_LOG_JSON=1  JSON log lines on stderr
"#
    );
}
