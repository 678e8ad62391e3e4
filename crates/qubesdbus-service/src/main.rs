use clap::{Parser, Subcommand};
use qubesdbus_admin::{Admin, MockFixture};
use qubesdbus_service::config::DEFAULT_CONFIG_PATH;
use qubesdbus_service::{run_domain_manager, run_labels, ServiceConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "qubes-dbus",
    version,
    about = "Mirror Qubes domain and label state onto D-Bus"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Path to the qubesd admin socket (overrides the config file).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Claim the service name on the system bus instead of the session bus.
    #[arg(long, default_value_t = false, global = true)]
    system: bool,

    /// Serve a JSON fixture through the mock backend instead of qubesd.
    #[arg(long, value_name = "FIXTURE", global = true)]
    mock: Option<PathBuf>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the org.qubes.DomainManager1 service.
    Domains,
    /// Run the org.qubes.Labels1 service.
    Labels,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("QUBES_DBUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = ServiceConfig::load(&cli.config)?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    if cli.system {
        config.system_bus = true;
    }

    let admin = match &cli.mock {
        Some(fixture_path) => {
            let json = std::fs::read_to_string(fixture_path)?;
            info!("serving mock fixture {}", fixture_path.display());
            Admin::mock(MockFixture::from_json(&json)?)
        }
        None => {
            info!("qubes-dbus starting, socket: {}", config.socket_path.display());
            Admin::live(&config.socket_path)
        }
    };

    match cli.command {
        Commands::Domains => run_domain_manager(admin, &config).await?,
        Commands::Labels => run_labels(admin, &config).await?,
    }

    Ok(())
}
