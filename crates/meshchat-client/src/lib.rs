pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod format;
pub mod handle;
pub mod router;
pub mod state;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, EnvFilter};

use meshchat_radio::RadioConnector;
use meshchat_store::{ConversationStore, Database, NodeDirectory};

pub use config::{ClientConfig, LocalFlagPolicy};
pub use error::{ClientError, Result};
pub use events::{Notice, NoticeLevel, UiCommand, UiEvent};
pub use handle::ReadHandle;
pub use router::EventRouter;
pub use state::{AppState, ConnectionState, RouterExit, SharedState};

const DEFAULT_LOG_FILTER: &str = "meshchat_client=debug,meshchat_store=info,meshchat_radio=info,warn";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// A running client: the UI's side of the router.
pub struct Client {
    pub handle: ReadHandle,
    pub commands: mpsc::Sender<UiCommand>,
    pub events: mpsc::Receiver<UiEvent>,
    pub router: JoinHandle<RouterExit>,
}

/// Open both stores on the configured database file.
pub fn open_state(config: &ClientConfig) -> anyhow::Result<SharedState> {
    let path = match &config.db_path {
        Some(path) => path.clone(),
        None => Database::default_path().context("Failed to locate the data directory")?,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    tracing::info!(path = %path.display(), "Opening database");

    let directory = NodeDirectory::open(Database::open_at(&path)?)
        .context("Failed to load the node directory")?;
    let conversations = ConversationStore::open(Database::open_at(&path)?);

    Ok(AppState::new(directory, conversations).into_shared())
}

/// Open the database and spawn the event router on the current runtime.
pub fn start<C>(config: ClientConfig, connector: C) -> anyhow::Result<Client>
where
    C: RadioConnector + 'static,
{
    let state = open_state(&config)?;
    let (cmd_tx, cmd_rx) = mpsc::channel(events::UI_CHANNEL_CAPACITY);
    let (ui_tx, ui_rx) = mpsc::channel(events::UI_CHANNEL_CAPACITY);

    tracing::info!("Starting meshchat client");
    let router = EventRouter::new(config, connector, state.clone(), cmd_rx, ui_tx);

    Ok(Client {
        handle: ReadHandle::new(state),
        commands: cmd_tx,
        events: ui_rx,
        router: tokio::spawn(router.run()),
    })
}
