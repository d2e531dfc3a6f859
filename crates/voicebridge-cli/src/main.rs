use std::sync::Arc;

use clap::{Parser, Subcommand};

use voicebridge_core::config::Config;
use voicebridge_relay::RelayState;
use voicebridge_translate::OpenAiTranslator;

#[derive(Parser)]
#[command(
    name = "voicebridge",
    about = "Session-paired streaming voice-translation relay",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Print the default config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.server_port());
            tracing::info!("Starting VoiceBridge relay on port {port}");

            let translator = Arc::new(OpenAiTranslator::from_config(config.translation.as_ref()));
            let state = Arc::new(RelayState::new(Arc::new(config), translator));
            voicebridge_relay::start_relay(state, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
            }
        },
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let mut filter = config
        .logging
        .as_ref()
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| default_level.to_string());
    if let Some(logging) = &config.logging {
        for directive in &logging.filters {
            filter.push(',');
            filter.push_str(directive);
        }
    }

    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
    );

    let json = config
        .logging
        .as_ref()
        .map(|l| l.format == "json")
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
