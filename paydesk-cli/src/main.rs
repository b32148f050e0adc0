//! paydesk-cli — terminal front ends for the Paydesk top-up desk.
//!
//! The customer side mirrors the web widget: `topup` files a request,
//! `chat` opens the live support conversation. The staff side is the back
//! office: `tickets` (one-shot or `--watch` with an edge-triggered bell),
//! `admin-chat`, and the ticket workflow commands.
//!
//! # Subcommands
//! - `topup <amount> [--name <name>]`    — file a top-up request
//! - `chat`                              — customer support chat
//! - `tickets [--status s] [--watch]`    — staff ticket board
//! - `admin-chat <session> [--manager m]`— staff chat view
//! - `set-status <id> <status>`          — staff workflow update
//! - `assign <id> [manager]`             — staff assignment (omit to clear)
//! - `delete-ticket <id>` / `purge <session>` / `block <session> [--clear]`
//! - `status`                            — show server health

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use paydesk_core::api::SendMessageRequest;
use paydesk_core::error::StoreError;
use paydesk_core::media::MediaPayload;
use paydesk_core::models::message::Message;
use paydesk_core::models::ticket::{Ticket, TicketStatus};
use paydesk_sync::{
    AlertSet, ChangeBus, EdgeAlertDetector, HttpStore, PollingSynchronizer, RemoteStore,
    SessionIdentity, UnreadTracker,
};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const BELL: &str = "\x07";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "paydesk-cli",
    version,
    about = "Paydesk top-up desk — customer widget and staff back office"
)]
struct Cli {
    /// Paydesk HTTP server URL (overrides PAYDESK_HTTP_URL env var)
    #[arg(long, env = "PAYDESK_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Staff token for back-office commands
    #[arg(long, env = "PAYDESK_ADMIN_TOKEN")]
    token: Option<String>,

    /// Directory holding the persistent session identity
    #[arg(long, default_value = "~/.paydesk")]
    state_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// File a top-up request
    Topup {
        /// Requested amount, verbatim (e.g. 2500)
        amount: String,

        /// Display name shown to staff
        #[arg(long)]
        name: Option<String>,
    },

    /// Open the customer support chat
    Chat {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 3000)]
        interval_ms: u64,
    },

    /// Staff ticket board
    Tickets {
        /// Filter by status (new, processed, scam, paid, in_progress:<agent>, closed)
        #[arg(long)]
        status: Option<String>,

        /// Keep polling and ring the bell on new tickets / unread messages
        #[arg(long)]
        watch: bool,

        /// Suppress the terminal bell in watch mode
        #[arg(long)]
        quiet: bool,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
    },

    /// Staff chat view for one conversation
    AdminChat {
        /// Session id of the conversation
        session: String,

        /// Manager name attached to staff replies
        #[arg(long)]
        manager: Option<String>,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 3000)]
        interval_ms: u64,
    },

    /// Update a ticket's workflow status
    SetStatus { id: i64, status: String },

    /// Assign a ticket to a manager; omit the name to unassign
    Assign { id: i64, manager: Option<String> },

    /// Delete a single ticket
    DeleteTicket { id: i64 },

    /// Delete a whole conversation (messages and tickets)
    Purge { session: String },

    /// Block a session from creating tickets or sending messages
    Block {
        session: String,

        /// Lift the block instead
        #[arg(long)]
        clear: bool,
    },

    /// Show Paydesk server status
    Status,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Topup { amount, name } => {
            run_topup(&server, &cli.state_dir, &amount, name.as_deref()).await
        }
        Commands::Chat { interval_ms } => run_chat(&server, &cli.state_dir, interval_ms).await,
        Commands::Tickets {
            status,
            watch,
            quiet,
            interval_ms,
        } => {
            run_tickets(
                &server,
                cli.token.as_deref(),
                status.as_deref(),
                watch,
                quiet,
                interval_ms,
            )
            .await
        }
        Commands::AdminChat {
            session,
            manager,
            interval_ms,
        } => {
            run_admin_chat(
                &server,
                cli.token.as_deref(),
                &session,
                manager.as_deref(),
                interval_ms,
            )
            .await
        }
        Commands::SetStatus { id, status } => {
            run_set_status(&server, cli.token.as_deref(), id, &status).await
        }
        Commands::Assign { id, manager } => {
            run_assign(&server, cli.token.as_deref(), id, manager.as_deref()).await
        }
        Commands::DeleteTicket { id } => run_delete_ticket(&server, cli.token.as_deref(), id).await,
        Commands::Purge { session } => run_purge(&server, cli.token.as_deref(), &session).await,
        Commands::Block { session, clear } => {
            run_block(&server, cli.token.as_deref(), &session, !clear).await
        }
        Commands::Status => run_status(&server).await,
    };

    if let Err(e) = result {
        eprintln!("paydesk-cli: {:#}", e);
        std::process::exit(1);
    }
}

fn customer_store(server: &str, bus: Option<ChangeBus>) -> anyhow::Result<Arc<HttpStore>> {
    let mut store = HttpStore::new(server)?;
    if let Some(bus) = bus {
        store = store.with_bus(bus);
    }
    Ok(Arc::new(store))
}

fn staff_store(
    server: &str,
    token: Option<&str>,
    bus: Option<ChangeBus>,
) -> anyhow::Result<Arc<HttpStore>> {
    let token = token.context("staff commands need --token or PAYDESK_ADMIN_TOKEN")?;
    let mut store = HttpStore::new(server)?.with_admin_token(token);
    if let Some(bus) = bus {
        store = store.with_bus(bus);
    }
    Ok(Arc::new(store))
}

// ============================================================================
// Customer side
// ============================================================================

async fn run_topup(
    server: &str,
    state_dir: &str,
    amount: &str,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let session = SessionIdentity::new(state_dir)
        .get_or_create()
        .context("session identity")?;
    let store = customer_store(server, None)?;

    match store.create_ticket(&session, amount, name).await {
        Ok(ticket) => {
            println!(
                "Ticket #{} created — amount {} ₽, status {}",
                ticket.id, ticket.amount, ticket.status
            );
            println!("Run `paydesk-cli chat` to talk to support.");
            Ok(())
        }
        Err(StoreError::RateLimited(msg)) => {
            eprintln!("Request refused: {}", msg);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_chat(server: &str, state_dir: &str, interval_ms: u64) -> anyhow::Result<()> {
    let session = SessionIdentity::new(state_dir)
        .get_or_create()
        .context("session identity")?;
    let bus = ChangeBus::new();
    let store = customer_store(server, Some(bus.clone()))?;

    println!("Support chat — session {}", session);
    println!("Type a message and press Enter. /attach <file> sends an image, /quit leaves.");

    let tracker = Arc::new(UnreadTracker::new(store.clone(), &session, false));
    if let Err(e) = tracker.activate().await {
        tracing::warn!(error = %e, "initial mark-read failed");
    }

    let sync = spawn_chat_view(
        store.clone(),
        bus.subscribe(),
        tracker,
        session.clone(),
        interval_ms,
        false,
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let (body, media_url) = match attachment(&line) {
            Some(path) => match upload_image(store.as_ref(), path).await {
                Ok(url) => (String::new(), Some(url)),
                Err(e) => {
                    eprintln!("upload failed: {:#}", e);
                    continue;
                }
            },
            None => (line, None),
        };

        let result = store
            .send_message(SendMessageRequest {
                session: session.clone(),
                message: body,
                is_admin: false,
                name: Some("Client".to_string()),
                image_url: media_url,
                manager_name: None,
            })
            .await;

        if let Err(e) = result {
            report_send_error(&e);
        }
    }

    sync.stop();
    Ok(())
}

// ============================================================================
// Staff side
// ============================================================================

async fn run_tickets(
    server: &str,
    token: Option<&str>,
    status: Option<&str>,
    watch: bool,
    quiet: bool,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let store = staff_store(server, token, None)?;
    let filter = match status {
        Some(raw) => Some(TicketStatus::parse(raw).map_err(anyhow::Error::msg)?),
        None => None,
    };

    if !watch {
        let tickets = store.list_tickets(filter.as_ref()).await?;
        print_ticket_table(&tickets);
        return Ok(());
    }

    println!("Watching tickets (Ctrl+C to stop)...");

    let fetch_store = store.clone();
    let fetch = move || {
        let store = fetch_store.clone();
        let filter = filter.clone();
        async move { store.list_tickets(filter.as_ref()).await }
    };

    // Independent alert streams: the aggregate ticket counter rings for new
    // tickets, each conversation's unread counter rings on customer messages.
    let bell = if quiet { "" } else { BELL };
    let mut board = EdgeAlertDetector::new();
    let mut unread: AlertSet<String> = AlertSet::new();
    let mut first = true;
    let on_snapshot = move |tickets: Vec<Ticket>| {
        if first {
            print_ticket_table(&tickets);
            first = false;
        }

        if board.observe(tickets.len() as u64) {
            println!("{}🔔 new ticket arrived", bell);
        }

        let sessions: Vec<String> = tickets.iter().map(|t| t.session_id.clone()).collect();
        for ticket in &tickets {
            let pending = ticket.unread_messages.unwrap_or(0).max(0) as u64;
            if unread.observe(&ticket.session_id, pending) {
                println!(
                    "{}💬 ticket #{} ({}) — {} unread",
                    bell,
                    ticket.id,
                    short_session(&ticket.session_id),
                    pending
                );
            }
        }
        unread.retain_keys(&sessions);
    };

    let sync = PollingSynchronizer::spawn(
        Duration::from_millis(interval_ms),
        fetch,
        on_snapshot,
    );

    tokio::signal::ctrl_c().await?;
    sync.stop();
    Ok(())
}

async fn run_admin_chat(
    server: &str,
    token: Option<&str>,
    session: &str,
    manager: Option<&str>,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let bus = ChangeBus::new();
    let store = staff_store(server, token, Some(bus.clone()))?;

    println!("Chat with {} (staff view)", short_session(session));
    println!("/attach <file> sends an image, /attach-pdf <file> a receipt, /quit leaves.");

    let tracker = Arc::new(UnreadTracker::new(store.clone(), session, true));
    if let Err(e) = tracker.activate().await {
        tracing::warn!(error = %e, "initial mark-read failed");
    }

    let sync = spawn_chat_view(
        store.clone(),
        bus.subscribe(),
        tracker,
        session.to_string(),
        interval_ms,
        true,
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let (body, media_url) = if let Some(path) = line.strip_prefix("/attach-pdf ") {
            match upload_pdf(store.as_ref(), path.trim()).await {
                Ok(url) => (String::new(), Some(url)),
                Err(e) => {
                    eprintln!("upload failed: {:#}", e);
                    continue;
                }
            }
        } else {
            match attachment(&line) {
                Some(path) => match upload_image(store.as_ref(), path).await {
                    Ok(url) => (String::new(), Some(url)),
                    Err(e) => {
                        eprintln!("upload failed: {:#}", e);
                        continue;
                    }
                },
                None => (line, None),
            }
        };

        let result = store
            .send_message(SendMessageRequest {
                session: session.to_string(),
                message: body,
                is_admin: true,
                name: None,
                image_url: media_url,
                manager_name: manager.map(str::to_string),
            })
            .await;

        if let Err(e) = result {
            report_send_error(&e);
        }
    }

    sync.stop();
    Ok(())
}

async fn run_set_status(
    server: &str,
    token: Option<&str>,
    id: i64,
    status: &str,
) -> anyhow::Result<()> {
    let status = TicketStatus::parse(status).map_err(anyhow::Error::msg)?;
    let store = staff_store(server, token, None)?;
    let ticket = store.update_ticket_status(id, &status).await?;
    println!("Ticket #{} → {}", ticket.id, ticket.status);
    Ok(())
}

async fn run_assign(
    server: &str,
    token: Option<&str>,
    id: i64,
    manager: Option<&str>,
) -> anyhow::Result<()> {
    let store = staff_store(server, token, None)?;
    let ticket = store.update_ticket_manager(id, manager).await?;
    match &ticket.manager {
        Some(name) => println!("Ticket #{} assigned to {}", ticket.id, name),
        None => println!("Ticket #{} unassigned", ticket.id),
    }
    Ok(())
}

async fn run_delete_ticket(server: &str, token: Option<&str>, id: i64) -> anyhow::Result<()> {
    let store = staff_store(server, token, None)?;
    store.delete_ticket(id).await?;
    println!("Ticket #{} deleted", id);
    Ok(())
}

async fn run_purge(server: &str, token: Option<&str>, session: &str) -> anyhow::Result<()> {
    let store = staff_store(server, token, None)?;
    store.delete_conversation(session).await?;
    println!("Conversation {} purged", short_session(session));
    Ok(())
}

async fn run_block(
    server: &str,
    token: Option<&str>,
    session: &str,
    blocked: bool,
) -> anyhow::Result<()> {
    let store = staff_store(server, token, None)?;
    store.set_blocked(session, blocked).await?;
    println!(
        "Session {} {}",
        short_session(session),
        if blocked { "blocked" } else { "unblocked" }
    );
    Ok(())
}

async fn run_status(server: &str) -> anyhow::Result<()> {
    let store = customer_store(server, None)?;
    match store.health().await {
        Ok(body) => {
            println!("Paydesk server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:     {}", body["postgresql"].as_str().unwrap_or("?"));
            Ok(())
        }
        Err(e) => {
            eprintln!("paydesk-cli: cannot reach {} — {}", server, e);
            std::process::exit(1);
        }
    }
}

// ============================================================================
// Shared chat plumbing
// ============================================================================

/// One chat view: poll the conversation, re-claim readership each tick, print
/// arrivals, ring on the other party's messages, refetch at once when a bus
/// event touches this session.
fn spawn_chat_view(
    store: Arc<HttpStore>,
    nudge: tokio::sync::broadcast::Receiver<paydesk_sync::StoreEvent>,
    tracker: Arc<UnreadTracker>,
    session: String,
    interval_ms: u64,
    staff_view: bool,
) -> PollingSynchronizer {
    let fetch_store = store.clone();
    let fetch_session = session.clone();
    let fetch = move || {
        let store = fetch_store.clone();
        let tracker = tracker.clone();
        let session = fetch_session.clone();
        async move {
            tracker.activate().await?;
            store.list_messages(&session).await
        }
    };

    let mut last_id: i64 = 0;
    let mut incoming = EdgeAlertDetector::new();
    let on_snapshot = move |messages: Vec<Message>| {
        let theirs = messages.iter().filter(|m| m.is_staff != staff_view).count() as u64;
        if incoming.observe(theirs) {
            print!("{}", BELL);
        }
        for message in messages.iter().filter(|m| m.id > last_id) {
            print_message(message, staff_view);
        }
        if let Some(last) = messages.last() {
            last_id = last_id.max(last.id);
        }
    };

    PollingSynchronizer::spawn_with_nudge(
        Duration::from_millis(interval_ms),
        fetch,
        on_snapshot,
        nudge,
        move |event| event.touches_session(&session),
    )
}

fn attachment(line: &str) -> Option<&str> {
    line.strip_prefix("/attach ").map(str::trim)
}

async fn upload_image(store: &HttpStore, path: &str) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path))?;
    let name = file_name(path);
    let payload = MediaPayload::image(name, bytes)?;
    Ok(store.upload_media(payload).await?)
}

async fn upload_pdf(store: &HttpStore, path: &str) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path))?;
    let name = file_name(path);
    let payload = MediaPayload::pdf(name, bytes)?;
    Ok(store.upload_media(payload).await?)
}

fn file_name(path: &str) -> &str {
    std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.bin")
}

fn report_send_error(e: &StoreError) {
    match e {
        StoreError::RateLimited(msg) => eprintln!("Send refused: {}", msg),
        other => eprintln!("Send failed: {}", other),
    }
}

// ============================================================================
// Output formatting
// ============================================================================

fn print_message(message: &Message, staff_view: bool) {
    let time = message
        .created_at
        .with_timezone(&Local)
        .format("%H:%M");

    let mine = message.is_staff == staff_view;
    let who = if message.is_staff {
        match (&message.staff_name, staff_view) {
            (Some(name), true) => format!("You ({})", name),
            (None, true) => "You".to_string(),
            (Some(name), false) => format!("Support ({})", name),
            (None, false) => "Support".to_string(),
        }
    } else if staff_view {
        message
            .sender_name
            .clone()
            .unwrap_or_else(|| "Customer".to_string())
    } else {
        "You".to_string()
    };

    let seen = if mine && message.seen_by_recipient() {
        " ✓✓"
    } else {
        ""
    };

    if let Some(url) = &message.media_url {
        println!("[{}] {}: [attachment] {}{}", time, who, url, seen);
    }
    if !message.body.is_empty() {
        println!("[{}] {}: {}{}", time, who, message.body, seen);
    }
}

fn print_ticket_table(tickets: &[Ticket]) {
    if tickets.is_empty() {
        println!("No tickets.");
        return;
    }

    println!(
        "{:<6} {:<22} {:<12} {:>10} {:>7}  {:<17} {}",
        "ID", "STATUS", "MANAGER", "AMOUNT", "UNREAD", "UPDATED", "SESSION"
    );
    for ticket in tickets {
        let fresh = ticket.status == TicketStatus::New
            && chrono::Utc::now() - ticket.created_at < chrono::Duration::hours(1);
        println!(
            "{:<6} {:<22} {:<12} {:>10} {:>7}  {:<17} {}{}",
            format!("#{}", ticket.id),
            ticket.status.to_string(),
            ticket.manager.as_deref().unwrap_or("-"),
            format!("{} ₽", ticket.amount),
            ticket.unread_messages.unwrap_or(0),
            ticket
                .updated_at
                .with_timezone(&Local)
                .format("%d.%m.%Y %H:%M"),
            short_session(&ticket.session_id),
            if fresh { "  [NEW]" } else { "" },
        );
    }
}

fn short_session(session: &str) -> String {
    if session.len() > 20 {
        format!("{}...", &session[..20])
    } else {
        session.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
