mod config_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "booster", about = "Booster build-acceleration gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Config file. Discovered in `.` and the user config dir when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Load and validate the config, then print the enabled engines.
    CheckConfig {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Encrypt an engine store password with the configured credential key.
    EncryptPassword {
        #[arg(long)]
        password: String,
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Credential key, overriding `credentials.key` from the config.
        #[arg(long, env = "BOOSTER_CREDENTIAL_KEY", hide_env_values = true)]
        key: Option<String>,
    },
    /// Print a fresh base64 credential key.
    GenKey,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        Commands::Serve { config } => {
            info!(version = env!("CARGO_PKG_VERSION"), "booster starting");
            let config = config_commands::load(config.as_deref())?;
            booster_gateway::run(config).await?;
            Ok(())
        },
        Commands::CheckConfig { config } => config_commands::check(config.as_deref()),
        Commands::EncryptPassword {
            password,
            config,
            key,
        } => config_commands::encrypt_password(&password, config.as_deref(), key),
        Commands::GenKey => {
            println!("{}", config_commands::gen_key());
            Ok(())
        },
    }
}
