use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "vlaps", version, about = "Offline-first swim lap recorder")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Active training profile
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Swim sessions
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Lap capture
    Lap {
        #[command(subcommand)]
        action: commands::lap::LapAction,
    },
    /// Push unsynced laps to the spreadsheet
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Google authorization
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print a shell completion script
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Log to stderr, filtered by `VLAPS_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("VLAPS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Settings { action } => commands::settings::run(action),
        Commands::Session { action } => commands::session::run(action),
        Commands::Lap { action } => commands::lap::run(action),
        Commands::Sync { action } => commands::sync::run(action),
        Commands::Auth { action } => commands::auth::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => commands::completions::run(shell),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
