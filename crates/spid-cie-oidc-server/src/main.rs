use clap::Parser;

use spid_cie_oidc_server::config::{DEFAULT_CONFIG_FILE, load_config};
use spid_cie_oidc_server::{ServerBuilder, observability};

#[derive(Parser)]
#[command(name = "spid-cie-oidc-server")]
#[command(about = "SPID/CIE OpenID Connect relying party server")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "SPIDCIE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    let cli = Cli::parse();

    let cfg = match load_config(Some(&cli.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %cli.config, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new(cfg).build() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
    }
}
