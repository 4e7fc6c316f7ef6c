//! ItemSync CLI - offline-first item list client
//!
//! Usage: itemsync <command> [options]

mod workspace;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use itemsync_common::{
    is_provisional_id, Item, ItemDraft, ItemFilter, ItemPatch, ItemSyncError, PendingOperation,
    Registration, EXIT_CONFIG_ERROR, EXIT_ERROR,
};
use itemsync_config::{Config, CONFIG_DIR};
use itemsync_sync::{
    AuthClient, ChannelEvent, Collection, ConnectivityMonitor, DataSource, EventChannel, SyncError,
};
use std::path::Path;
use tokio::sync::{mpsc, watch};
use workspace::{print_sync_report, Workspace};

#[derive(Parser)]
#[command(
    name = "itemsync",
    version = "0.1.0",
    about = "ItemSync offline-first item list client"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Do not contact the server; mutations are queued
    #[arg(long, global = true)]
    offline: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new ItemSync workspace
    Init,

    /// Create an account and log in
    Register {
        username: String,
        email: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        confirm_password: String,
    },

    /// Log in and store the session token
    Login {
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Forget the session, cached items and queued changes
    Logout,

    /// Show the logged-in user
    Whoami,

    /// List items
    List {
        /// Free-text search
        #[arg(long)]
        search: Option<String>,

        /// Only completed (true) or open (false) items
        #[arg(long)]
        completed: Option<bool>,

        /// Due on or after (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Due on or before (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Add an item
    Add {
        text: String,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },

    /// Change the text of an item
    Edit {
        id: i64,
        text: String,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<NaiveDate>,
    },

    /// Flip the completed flag of an item
    Toggle { id: i64 },

    /// Delete an item
    Delete { id: i64 },

    /// Replay queued changes against the server
    Sync,

    /// Show queued changes
    Queue,

    /// Follow real-time changes until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    itemsync_common::telemetry::init_tracing(cli.verbose, false);
    tracing::debug!("ItemSync CLI started");

    let root = Path::new(".");
    let result = match cli.command {
        Commands::Init => cmd_init(root).await,
        Commands::Register {
            username,
            email,
            password,
            confirm_password,
        } => {
            let form = Registration {
                username,
                email,
                password,
                confirm_password,
            };
            cmd_register(root, form).await
        }
        Commands::Login { username, password } => cmd_login(root, username, password).await,
        Commands::Logout => cmd_logout(root).await,
        Commands::Whoami => cmd_whoami(root, cli.offline, cli.json).await,
        Commands::List {
            search,
            completed,
            from,
            to,
            page,
        } => {
            let filter = ItemFilter {
                text: search,
                completed,
                date_from: from,
                date_to: to,
            };
            cmd_list(root, filter, page, cli.offline, cli.json).await
        }
        Commands::Add { text, due } => cmd_add(root, text, due, cli.offline, cli.json).await,
        Commands::Edit { id, text, due } => cmd_edit(root, id, text, due, cli.offline).await,
        Commands::Toggle { id } => cmd_toggle(root, id, cli.offline).await,
        Commands::Delete { id } => cmd_delete(root, id, cli.offline).await,
        Commands::Sync => cmd_sync(root, cli.offline, cli.json).await,
        Commands::Queue => cmd_queue(root, cli.json).await,
        Commands::Watch => cmd_watch(root, cli.offline).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let code = match e.downcast_ref::<ItemSyncError>() {
            Some(ItemSyncError::ConfigError(_)) => EXIT_CONFIG_ERROR,
            _ => EXIT_ERROR,
        };
        std::process::exit(code);
    }
}

//
// Helper functions
//

fn print_item(item: &Item) {
    let check = if item.completed { "x" } else { " " };
    let mut line = format!("[{}] {:>4}  {} (v{})", check, item.id, item.text, item.version);
    if let Some(due) = item.due_date {
        line.push_str(&format!("  due {}", due));
    }
    if is_provisional_id(item.id) {
        line.push_str("  (not synced)");
    }
    println!("{}", line);
}

fn print_collection(collection: &Collection) {
    if collection.items.is_empty() {
        println!("No items.");
    }
    for item in &collection.items {
        print_item(item);
    }
    let source = match collection.source {
        DataSource::Server => "server",
        DataSource::Cache => "cache",
    };
    eprintln!(
        "Page {}/{} - {} items ({})",
        collection.page,
        collection.total_pages.max(1),
        collection.total,
        source
    );
    if let Some(ref status) = collection.status {
        eprintln!("⚠ {}", status);
    }
}

fn print_operation(op: &PendingOperation) {
    let text = op.item.text.as_deref().unwrap_or("");
    println!(
        "{:<6}  {:>13}  {}  {}",
        op.kind.as_str(),
        op.item.id,
        op.timestamp.format("%Y-%m-%d %H:%M:%S"),
        text
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//
// Command implementations
//

async fn cmd_init(root: &Path) -> anyhow::Result<()> {
    use std::fs;

    let config_dir = root.join(CONFIG_DIR);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
        eprintln!("✓ Created {}/", CONFIG_DIR);
    } else {
        eprintln!("✓ {}/ already exists", CONFIG_DIR);
    }

    let config_path = config_dir.join("config.toml");
    if !config_path.exists() {
        fs::write(&config_path, Config::default_toml())?;
        eprintln!("✓ Created {}/config.toml", CONFIG_DIR);
    } else {
        eprintln!("✓ {}/config.toml already exists", CONFIG_DIR);
    }

    let gitignore_path = root.join(".gitignore");
    let entry = format!("{}/store.db", CONFIG_DIR);
    if gitignore_path.exists() {
        let content = fs::read_to_string(&gitignore_path)?;
        if !content.contains(&entry) {
            fs::write(&gitignore_path, format!("{}\n# ItemSync\n{}\n", content, entry))?;
            eprintln!("✓ Updated .gitignore");
        }
    } else {
        fs::write(&gitignore_path, format!("# ItemSync\n{}\n", entry))?;
        eprintln!("✓ Created .gitignore");
    }

    eprintln!("\n✅ Workspace initialized successfully!");
    Ok(())
}

async fn cmd_register(root: &Path, form: Registration) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let auth = AuthClient::new(&ws.sync)?;
    let user = auth.register(&ws.store, &form).await?;
    eprintln!("✓ Registered and logged in as {}", user.username);
    Ok(())
}

async fn cmd_login(root: &Path, username: String, password: String) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let auth = AuthClient::new(&ws.sync)?;
    let user = auth.login(&ws.store, &username, &password).await?;
    eprintln!("✓ Logged in as {}", user.username);
    Ok(())
}

async fn cmd_logout(root: &Path) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let pending = ws.store.read_queue().len();
    AuthClient::new(&ws.sync)?.logout(&ws.store)?;
    if pending > 0 {
        eprintln!("⚠ Discarded {} unsynced changes", pending);
    }
    eprintln!("✓ Logged out");
    Ok(())
}

async fn cmd_whoami(root: &Path, offline: bool, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;

    let user = if offline || !ws.server_reachable().await {
        ws.store
            .read_user()
            .ok_or_else(|| anyhow::anyhow!("Not logged in"))?
    } else {
        AuthClient::new(&ws.sync)?.me(&ws.store).await?
    };

    if json {
        return print_json(&user);
    }
    println!("{} <{}> (id {})", user.username, user.email, user.id);
    Ok(())
}

async fn cmd_list(
    root: &Path,
    filter: ItemFilter,
    page: u32,
    offline: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut engine = Workspace::open(root)?.into_engine(offline).await?;
    let collection = engine.refresh(filter, page).await?;

    if json {
        return print_json(&collection);
    }
    print_collection(&collection);
    Ok(())
}

async fn cmd_add(
    root: &Path,
    text: String,
    due: Option<NaiveDate>,
    offline: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut draft = ItemDraft::new(text);
    draft.due_date = due;
    // fail before touching the network
    draft.validate()?;

    let mut engine = Workspace::open(root)?.into_engine(offline).await?;
    let item = engine.create(draft).await?;

    if json {
        return print_json(&item);
    }
    if item.is_provisional() {
        eprintln!("✓ Queued item {} (will sync when online)", item.id);
    } else {
        eprintln!("✓ Created item {}", item.id);
    }
    Ok(())
}

async fn cmd_edit(
    root: &Path,
    id: i64,
    text: String,
    due: Option<NaiveDate>,
    offline: bool,
) -> anyhow::Result<()> {
    let mut engine = Workspace::open(root)?.into_engine(offline).await?;
    let current = engine.get(id).await?;

    let mut patch = ItemPatch::from_item(&current);
    patch.text = text;
    if due.is_some() {
        patch.due_date = due;
    }

    let item = engine.update(id, patch).await?;
    eprintln!("✓ Updated item {} (v{})", item.id, item.version);
    Ok(())
}

async fn cmd_toggle(root: &Path, id: i64, offline: bool) -> anyhow::Result<()> {
    let mut engine = Workspace::open(root)?.into_engine(offline).await?;
    let current = engine.get(id).await?;

    let mut patch = ItemPatch::from_item(&current);
    patch.completed = !current.completed;

    match engine.update(id, patch).await {
        Ok(item) => {
            let state = if item.completed { "done" } else { "open" };
            eprintln!("✓ Item {} is now {}", item.id, state);
            Ok(())
        }
        Err(SyncError::Conflict { .. }) => {
            anyhow::bail!("Item {} was changed elsewhere; reloaded, try again", id)
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_delete(root: &Path, id: i64, offline: bool) -> anyhow::Result<()> {
    let mut engine = Workspace::open(root)?.into_engine(offline).await?;
    engine.delete(id).await?;

    if engine.pending_operations().iter().any(|op| op.item.id == id) {
        eprintln!("✓ Delete of item {} queued", id);
    } else {
        eprintln!("✓ Deleted item {}", id);
    }
    Ok(())
}

async fn cmd_sync(root: &Path, offline: bool, json: bool) -> anyhow::Result<()> {
    if offline {
        anyhow::bail!("Cannot sync with --offline");
    }

    let ws = Workspace::open(root)?;
    if !ws.server_reachable().await {
        anyhow::bail!("Server {} is unreachable", ws.sync.base_url);
    }

    let mut engine = ws.into_engine(false).await?;
    let report = engine.synchronize_pending().await?;

    if json {
        return print_json(&report);
    }
    print_sync_report(&report);
    Ok(())
}

async fn cmd_queue(root: &Path, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let queue = ws.store.queue().list();

    if json {
        return print_json(&queue);
    }
    if queue.is_empty() {
        eprintln!("✓ Nothing queued");
        return Ok(());
    }
    for op in &queue {
        print_operation(op);
    }
    eprintln!("{} queued operations", queue.len());
    Ok(())
}

async fn cmd_watch(root: &Path, offline: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let token = ws
        .store
        .read_token()
        .ok_or_else(|| anyhow::anyhow!("Not logged in. Run `itemsync login` first"))?;
    let sync = ws.sync.clone();
    let probe_enabled = ws.config.connectivity.probe_enabled;

    let mut engine = ws.into_engine(offline).await?;
    print_collection(&engine.refresh(ItemFilter::default(), 1).await?);

    let mut monitor = ConnectivityMonitor::new(engine.is_online());
    if probe_enabled && !offline {
        monitor.start_probe(
            sync.base_url.clone(),
            sync.probe_interval,
            sync.request_timeout,
        );
    }

    let mut channel = EventChannel::new(sync.ws_url.clone(), token, sync.reconnect_delay);
    let mut raw_events = channel.connect()?;

    let (events_tx, events_rx) = mpsc::channel(256);
    let tap = tokio::spawn(async move {
        while let Some(event) = raw_events.recv().await {
            describe_event(&event);
            if events_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    eprintln!("Watching {} (Ctrl+C to stop)", sync.ws_url);
    let result = engine.run(events_rx, monitor.subscribe(), shutdown_rx).await;

    channel.shutdown().await;
    monitor.stop_probe();
    tap.abort();
    stop.abort();
    result?;

    eprintln!(
        "✓ Stopped. {} items cached, {} changes queued",
        engine.items().len(),
        engine.pending_operations().len()
    );
    Ok(())
}

fn describe_event(event: &ChannelEvent) {
    match event {
        ChannelEvent::Authenticated { connection_id, .. } => {
            eprintln!("● Connected ({})", connection_id)
        }
        ChannelEvent::Remote(remote) => match remote.item {
            Some(ref item) => {
                eprint!("↻ {} ", remote.kind);
                print_item(item);
            }
            None => eprintln!("↻ {} item {}", remote.kind, remote.item_id),
        },
        ChannelEvent::ServerError(message) => eprintln!("⚠ Server: {}", message),
        ChannelEvent::Disconnected => eprintln!("○ Disconnected, reconnecting..."),
    }
}
