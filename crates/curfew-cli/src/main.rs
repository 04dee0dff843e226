mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use curfew_core::{
    config::{get_data_dir, CurfewConfig},
    TabId,
};

#[derive(Parser)]
#[command(name = "curfew")]
#[command(about = "Daily social media budget and nightly curfew", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the tracking daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the tracking daemon
    Stop,
    /// Show today's usage, remaining budget and curfew state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the daemon whether tracked sites are blocked right now
    Check,
    /// Print and clear the commands queued for the browser bridge
    Drain,
    /// Forward a browser event to the daemon
    Event {
        #[command(subcommand)]
        event: EventAction,
    },
}

#[derive(Subcommand, Debug)]
enum EventAction {
    /// A tab became the active tab
    Activate {
        tab_id: TabId,
        url: Option<String>,
    },
    /// A tab navigated or reloaded
    Update {
        tab_id: TabId,
        /// New URL, if it changed
        #[arg(long)]
        url: Option<String>,
        /// The page started loading
        #[arg(long)]
        loading: bool,
    },
    /// A tab was closed
    Remove { tab_id: TabId },
    /// A browser window gained focus
    Focus {
        /// Active tab of the focused window
        #[arg(long)]
        tab: Option<TabId>,
        #[arg(long)]
        url: Option<String>,
    },
    /// The browser lost focus
    Blur,
    /// Page visibility changed inside a tab
    Visibility {
        tab_id: TabId,
        url: Option<String>,
        /// The page was hidden rather than shown
        #[arg(long)]
        hidden: bool,
    },
    /// Run the periodic reset and status check now
    Alarm,
    /// Block the active tab
    Block,
    /// Re-check the active tab
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;
    let config = CurfewConfig::load_from(&data_dir)?;

    match cli.command {
        Commands::Start => commands::daemon::start_daemon(&data_dir, &config),
        Commands::DaemonInternalStart => commands::daemon::run_daemon_process(config).await,
        Commands::Stop => commands::daemon::stop_daemon(&data_dir, &config).await,
        Commands::Status { json } => commands::status::show_status(&data_dir, &config, json).await,
        Commands::Check => commands::status::check_block(&data_dir, &config).await,
        Commands::Drain => commands::event::drain_commands(&data_dir, &config).await,
        Commands::Event { event } => {
            commands::event::send_event(&data_dir, &config, event.into_browser_event()).await
        }
    }
}

impl EventAction {
    fn into_browser_event(self) -> curfew_core::BrowserEvent {
        use curfew_core::{BrowserEvent, TabInfo};

        match self {
            Self::Activate { tab_id, url } => BrowserEvent::TabActivated { tab_id, url },
            Self::Update {
                tab_id,
                url,
                loading,
            } => BrowserEvent::TabUpdated {
                tab_id,
                url,
                loading,
            },
            Self::Remove { tab_id } => BrowserEvent::TabRemoved { tab_id },
            Self::Focus { tab, url } => BrowserEvent::WindowFocusChanged {
                active_tab: tab.map(|id| TabInfo { id, url }),
            },
            Self::Blur => BrowserEvent::WindowFocusChanged { active_tab: None },
            Self::Visibility {
                tab_id,
                url,
                hidden,
            } => BrowserEvent::VisibilityChanged {
                tab_id,
                url,
                visible: !hidden,
            },
            Self::Alarm => BrowserEvent::AlarmTick,
            Self::Block => BrowserEvent::RequestBlock,
            Self::Refresh => BrowserEvent::RequestStatusRefresh,
        }
    }
}
