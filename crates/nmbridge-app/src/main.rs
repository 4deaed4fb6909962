use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use nmbridge_config::BridgeConfig;
use nmbridge_core::logging::{self, LogOptions};
use nmbridge_remote::objects::{
    check_plugin_version, csp_version, plugin_version, FindType, OpenMode, Store, StoreLocation,
    MY_STORE,
};
use nmbridge_remote::Session;
use nmbridge_tools::CertManager;

#[derive(Parser)]
#[command(name = "nmbridge")]
#[command(about = "Drive the CryptoPro browser plugin host from the command line.", long_about = None)]
struct Cli {
    /// Config file (defaults to $NMBRIDGE_CONFIG or the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write stderr logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the plugin and CSP versions.
    Version,

    /// Export the certificates of a store as JSON lines.
    Certs {
        /// Store location (0 memory, 1 local machine, 2 current user, ...).
        #[arg(long, default_value_t = 2)]
        location: u8,

        #[arg(long, default_value = MY_STORE)]
        store: String,

        /// Only the certificate with this SHA1 thumbprint.
        #[arg(long)]
        thumbprint: Option<String>,
    },

    /// List key containers.
    Containers,

    /// Delete a certificate by SHA1 thumbprint.
    DeleteCert { thumbprint: String },
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(&LogOptions {
        json: cli.json_logs,
        ..LogOptions::default()
    })?;

    let config = BridgeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Version => print_versions(&config),
        Command::Certs {
            location,
            store,
            thumbprint,
        } => export_certificates(&config, location, &store, thumbprint.as_deref()),
        Command::Containers => {
            let manager = CertManager::from_config(&config.tools);
            for container in manager.list_containers()? {
                println!("{}", serde_json::to_string(&container)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::DeleteCert { thumbprint } => {
            let manager = CertManager::from_config(&config.tools);
            if manager.delete_certificate(&thumbprint)? {
                println!("deleted {thumbprint}");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("certificate {thumbprint} was not deleted");
                Ok(ExitCode::from(1))
            }
        }
    }
}

fn connect(config: &BridgeConfig) -> Result<Session> {
    let session = Session::spawn(config).context("failed to start plugin session")?;
    info!(tab_id = session.id(), "connected to plugin");
    Ok(session)
}

fn print_versions(config: &BridgeConfig) -> Result<ExitCode> {
    let session = connect(config)?;

    let plugin = match config.min_plugin_version()? {
        Some(requirement) => check_plugin_version(&session, &requirement)?,
        None => plugin_version(&session)?,
    };
    let csp = csp_version(&session)?;

    println!("plugin {plugin}");
    println!("csp {csp}");
    session.close();
    Ok(ExitCode::SUCCESS)
}

fn export_certificates(
    config: &BridgeConfig,
    location: u8,
    store_name: &str,
    thumbprint: Option<&str>,
) -> Result<ExitCode> {
    let location = StoreLocation::try_from(location)
        .map_err(|value| anyhow::anyhow!("unknown store location {value}"))?;
    let session = connect(config)?;

    let store = Store::create(&session)?;
    store.open(location, store_name, OpenMode::MAXIMUM_ALLOWED)?;

    let mut certificates = store.certificates()?;
    if let Some(thumbprint) = thumbprint {
        certificates = certificates.find(FindType::Sha1Hash, &thumbprint.to_string(), false)?;
    }

    let mut incomplete = 0usize;
    for certificate in certificates.items()? {
        let export = certificate.to_export();
        if let Some(err) = &export.error {
            warn!(error = %err, "certificate export incomplete");
            incomplete += 1;
        }
        println!("{}", serde_json::to_string(&export.value)?);
    }

    store.close()?;
    session.close();

    if incomplete > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}
