pub mod db;
pub mod events;
pub mod models;
pub mod moderation;
pub mod network;
pub mod protocol;
pub mod rules;
pub mod services;
pub mod session;
pub mod state;

use std::sync::Arc;

use directories::ProjectDirs;
use libp2p::identity::Keypair;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;

use crate::db::Database;
use crate::events::{create_event_bus, AppEvent};
use crate::models::{Identity, MessageKind, RoomId, RoomStatus, NICK_SUFFIX};
use crate::session::SendOutcome;
use crate::state::ServiceContext;

fn get_data_dir(custom_dir: Option<&str>) -> std::path::PathBuf {
    if let Some(dir) = custom_dir {
        std::path::PathBuf::from(dir)
    } else {
        ProjectDirs::from("com", "island", "Island")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap().join(".island"))
    }
}

/// First run mints a participant id and derives the default nick from its
/// last eight characters. The id is opaque and stable; it is not a
/// credential.
fn ensure_identity(db: &Database) -> Identity {
    if let Ok(Some(identity)) = db.load_identity() {
        return identity;
    }
    let participant_id = uuid::Uuid::new_v4().to_string();
    let tail = &participant_id[participant_id.len() - 8..];
    let display_name = format!("{}{}", tail, NICK_SUFFIX);
    let identity = Identity {
        participant_id,
        display_name,
    };
    db.save_identity(&identity).expect("Failed to save identity");
    info!("Generated new identity");
    identity
}

/// Create a ServiceContext with all shared state.
pub fn create_service_context(
    data_dir: Option<&str>,
    rules_url: Option<String>,
) -> (ServiceContext, mpsc::Receiver<network::NetworkCommand>) {
    let data_dir = get_data_dir(data_dir);
    info!("Data directory: {:?}", data_dir);

    let db = Arc::new(Database::new(&data_dir).expect("Failed to initialize database"));
    let identity = ensure_identity(&db);
    info!("My participant id: {}", identity.participant_id);

    let (network_tx, network_rx) = mpsc::channel::<network::NetworkCommand>(256);
    let (event_tx, _event_rx) = create_event_bus();

    let ctx = ServiceContext {
        db,
        participant_id: identity.participant_id,
        network_tx,
        event_tx,
        rules_url,
    };

    (ctx, network_rx)
}

/// Spawn the network swarm event loop.
pub fn spawn_network(network_rx: mpsc::Receiver<network::NetworkCommand>, ctx: &ServiceContext) {
    let db = ctx.db.clone();
    let event_tx = ctx.event_tx.clone();
    let participant_id = ctx.participant_id.clone();

    tokio::spawn(async move {
        // The transport keypair is ephemeral by design: link identities are
        // never trusted as participant identities, so there is nothing to
        // gain from persisting one.
        let keypair = Keypair::generate_ed25519();
        let swarm = network::swarm::build_swarm(&keypair).expect("Failed to build swarm");
        network::swarm::run_event_loop(swarm, network_rx, db, event_tx, participant_id).await;
    });
}

/// Forward application events to the terminal.
fn spawn_event_printer(ctx: &ServiceContext) {
    let mut event_rx = ctx.event_tx.subscribe();

    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("event printer lagged, skipped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn print_message(message: &crate::models::ChatMessage) {
    match message.kind {
        MessageKind::System => println!("\x1b[90m-- {}\x1b[0m", message.text),
        MessageKind::Chat => println!(
            "\x1b[32m[{}]\x1b[0m {}: {}",
            format_time(message.timestamp),
            message.display_name,
            message.text
        ),
    }
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::MessageAppended { message, .. } => print_message(message),
        AppEvent::PeerJoined { display_name, .. } => {
            println!("\x1b[36m* {} joined\x1b[0m", display_name);
        }
        AppEvent::PeerLeft { .. } => println!("\x1b[36m* a participant left\x1b[0m"),
        AppEvent::StatusChanged { status, .. } => match status {
            RoomStatus::Searching => {
                println!("\x1b[90msearching for peers... (share the code to invite)\x1b[0m");
            }
            RoomStatus::Connected { peers } => {
                println!("\x1b[90mconnected · {} participant(s)\x1b[0m", peers);
            }
            RoomStatus::Destroyed => {}
        },
        // The sanction system line already tells the story in the terminal.
        AppEvent::ModerationApplied { .. } => {}
        AppEvent::RoomDestroyed { .. } => {
            println!("\x1b[31mthis island was destroyed\x1b[0m");
        }
        AppEvent::DiscoveryWarning { detail } => {
            println!("\x1b[90mdiscovery warning: {}\x1b[0m", detail);
        }
    }
}

async fn handle_join(ctx: &ServiceContext, input: &str) {
    let code = match RoomId::parse(input) {
        Ok(code) => code,
        Err(e) => {
            println!("error: {}", e);
            return;
        }
    };
    // Replay whatever this device already logged for the room, then join.
    if let Ok(log) = services::messaging::chat_log(ctx, &code) {
        for message in &log {
            print_message(message);
        }
    }
    match services::rooms::join_room(ctx, code.as_str()).await {
        Ok(code) => println!("joined island {}", code),
        Err(e) => println!("error: {}", e),
    }
}

/// Run the interactive terminal client: a thin REPL standing in for the
/// out-of-scope graphical front end.
pub async fn run_interactive(
    data_dir: Option<&str>,
    rules_url: Option<String>,
    join_code: Option<String>,
) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let (ctx, network_rx) = create_service_context(data_dir, rules_url);
    spawn_network(network_rx, &ctx);
    spawn_event_printer(&ctx);

    let identity = services::identity::get_identity(&ctx).expect("identity must exist");
    println!("island: ephemeral p2p chat");
    println!("you are {}", identity.display_name);
    println!("commands: /create, /join <code>, /leave, /destroy, /nick <name>, /rooms, /peers, /quit");

    if let Some(code) = join_code {
        handle_join(&ctx, &code).await;
    }

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/create" {
            match services::rooms::create_room(&ctx).await {
                Ok(room) => println!("created island {} (share this code)", room.code),
                Err(e) => println!("error: {}", e),
            }
            continue;
        }
        if let Some(code) = line.strip_prefix("/join ") {
            handle_join(&ctx, code).await;
            continue;
        }
        if line == "/leave" {
            match services::rooms::leave_room(&ctx).await {
                Ok(()) => println!("left the island"),
                Err(e) => println!("error: {}", e),
            }
            continue;
        }
        if line == "/destroy" {
            if let Err(e) = services::rooms::destroy_room(&ctx).await {
                println!("error: {}", e);
            }
            continue;
        }
        if let Some(name) = line.strip_prefix("/nick ") {
            match services::identity::set_display_name(&ctx, name) {
                Ok(name) => println!("you are now {}", name),
                Err(e) => println!("error: {}", e),
            }
            continue;
        }
        if line == "/rooms" {
            match services::rooms::list_rooms(&ctx) {
                Ok(rooms) if rooms.is_empty() => println!("no islands yet, /create one"),
                Ok(rooms) => {
                    for room in rooms {
                        println!("{}  {}", room.code, room.title);
                    }
                }
                Err(e) => println!("error: {}", e),
            }
            continue;
        }
        if line == "/peers" {
            match services::messaging::room_peers(&ctx).await {
                Ok(peers) if peers.is_empty() => println!("no peers connected"),
                Ok(peers) => {
                    for peer in peers {
                        println!(
                            "{}  ({})",
                            peer.display_name.as_deref().unwrap_or("<no greeting yet>"),
                            peer.link_id
                        );
                    }
                }
                Err(e) => println!("error: {}", e),
            }
            continue;
        }
        if line.starts_with('/') {
            println!("unknown command: {}", line);
            continue;
        }
        match services::messaging::send_chat(&ctx, line.to_string()).await {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::Muted { remaining_ms }) => {
                let minutes = (remaining_ms.max(0) + 59_999) / 60_000;
                println!("you are temporarily muted, about {} min remaining", minutes);
            }
            // The mute system line was already printed by the event bridge.
            Ok(SendOutcome::Violated { .. }) => {}
            Ok(SendOutcome::NotInRoom) => println!("join an island first (/join <code> or /create)"),
            Err(e) => println!("error: {}", e),
        }
    }
}
