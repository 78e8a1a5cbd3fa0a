//! Campaign progress demonstration.
//!
//! Demonstrates:
//! - Subscribing several callbacks to one campaign channel
//! - Credential rotation with transparent resubscription
//! - Publishing a pledge and receiving its outcome
//!
//! Runs against an in-memory broker by default, or a real one with `--url`.
//!
//! Usage:
//!   cargo run --example campaign_progress
//!   cargo run --example campaign_progress -- --debug
//!   cargo run --example campaign_progress -- --url ws://localhost:8080/ws

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use crowdfund_live::transport::MemoryPeer;
use crowdfund_live::{
    Callback, ClientConfig, Destination, LiveClient, MemoryConnector, Payload, Result, TokenStore,
};

// ============================================================================
// Constants
// ============================================================================

const CAMPAIGN_ID: &str = "C1";

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    url: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            url: args
                .iter()
                .position(|a| a == "--url")
                .and_then(|i| args.get(i + 1).cloned()),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "crowdfund_live=debug"
    } else {
        "crowdfund_live=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let result = match &args.url {
        Some(url) => run_remote(url).await,
        None => run_in_memory().await,
    };

    if let Err(e) = result {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn progress_printer(name: &'static str) -> Callback {
    Callback::new(move |payload| match payload {
        Payload::Decoded(value) => println!("    [{name}] progress: {value}"),
        Payload::Raw(text) => println!("    [{name}] raw: {text}"),
    })
}

// ============================================================================
// Remote Broker
// ============================================================================

async fn run_remote(url: &str) -> Result<()> {
    println!("=== Campaign Progress ({url}) ===\n");

    let config = ClientConfig::builder()
        .endpoint(url)
        .settle_delay(Duration::from_secs(1))
        .build()?;
    let tokens = TokenStore::anonymous();

    let client = LiveClient::websocket(config, Arc::new(tokens.clone()))?;
    client.attach_rotation(&tokens);
    client.on_connect(|info| println!("    ✓ Connected (STOMP {})", info.version));
    client.on_error(|e| println!("    ✗ {}: {e}", e.code()));
    client.on_close(|info| println!("    ✗ Closed {} {}", info.code, info.reason));

    client.subscribe(
        Destination::campaign_progress(CAMPAIGN_ID),
        progress_printer("dashboard"),
    );
    client.connect();

    println!("[1] Listening for 30s...");
    sleep(Duration::from_secs(30)).await;

    client.disconnect();
    println!("\n=== Done ===");
    Ok(())
}

// ============================================================================
// In-Memory Broker
// ============================================================================

async fn run_in_memory() -> Result<()> {
    println!("=== Campaign Progress (in-memory broker) ===\n");

    let config = ClientConfig::builder()
        .endpoint("ws://broker.local/ws")
        .settle_delay(Duration::from_millis(500))
        .replay_delay(Duration::from_millis(50))
        .build()?;
    let tokens = TokenStore::anonymous();
    let (connector, mut broker) = MemoryConnector::pair();

    let client = LiveClient::new(config, Arc::new(tokens.clone()), Arc::new(connector))?;
    client.attach_rotation(&tokens);
    client.on_connect(|info| println!("    ✓ Connected (STOMP {})", info.version));

    // ========================================================================
    // Anonymous connect
    // ========================================================================

    println!("[1] Connecting anonymously...");
    client.connect();
    let mut peer = expect_peer(broker.accept().await)?;
    peer.handshake().await;
    sleep(Duration::from_millis(50)).await;

    let progress = Destination::campaign_progress(CAMPAIGN_ID);
    client.subscribe(progress.clone(), progress_printer("dashboard"));
    client.subscribe(progress.clone(), progress_printer("widget"));
    let wire = subscription_id(&mut peer).await;
    println!(
        "    ✓ 2 callbacks, {} wire subscription ({wire})\n",
        client.subscription_count()
    );

    println!("[2] Broker pushes progress...");
    peer.message(&wire, &progress, &json!({"pledged": 100, "goal": 1000}).to_string());
    sleep(Duration::from_millis(50)).await;

    // ========================================================================
    // Rotation
    // ========================================================================

    println!("\n[3] HTTP layer rotates the access token...");
    tokens.set_token(Some("fresh-access-token".into()));
    println!("    State: {}", client.state());

    let mut peer = expect_peer(broker.accept().await)?;
    if let Some(connect) = peer.handshake().await {
        println!(
            "    ✓ Reconnected with Authorization: {}",
            connect.header("Authorization").unwrap_or("<none>")
        );
    }
    let wire = subscription_id(&mut peer).await;
    println!("    ✓ Replayed onto {wire}\n");

    println!("[4] Broker pushes progress on the new session...");
    peer.message(&wire, &progress, &json!({"pledged": 250, "goal": 1000}).to_string());
    sleep(Duration::from_millis(50)).await;

    // ========================================================================
    // Publish
    // ========================================================================

    println!("\n[5] Publishing a pledge...");
    client.subscribe(
        Destination::user_success(),
        Callback::new(|payload| println!("    ✓ Pledge accepted: {payload:?}")),
    );
    let success_wire = subscription_id(&mut peer).await;

    client
        .publisher()
        .with_prefix("/app")
        .send_to("pledges", &json!({"campaignId": CAMPAIGN_ID, "amount": 25}))?;

    if let Some(send) = peer.next_frame().await {
        println!("    → {} {}", send.header("destination").unwrap_or("?"), send.body());
    }
    peer.message(&success_wire, &Destination::user_success(), r#"{"pledgeId":"P-1"}"#);
    sleep(Duration::from_millis(50)).await;

    client.disconnect();
    println!("\n=== Done ===");
    Ok(())
}

fn expect_peer(peer: Option<MemoryPeer>) -> Result<MemoryPeer> {
    peer.ok_or(crowdfund_live::Error::ConnectionClosed)
}

async fn subscription_id(peer: &mut MemoryPeer) -> String {
    peer.next_frame()
        .await
        .and_then(|frame| frame.header("id").map(str::to_string))
        .unwrap_or_default()
}
