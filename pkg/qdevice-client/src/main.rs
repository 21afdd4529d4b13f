//! `qdevice-client` — the arbiter-client daemon (spec §1, §6 "Both daemons").
//! Loads its cluster/host/algorithm configuration from a TOML file, connects
//! to the arbiter server named in it, and drives the connection to `Steady`
//! and beyond on a single-threaded cooperative event loop (spec §7).

#[macro_use]
extern crate error_chain;

mod adaptors;
mod app;
mod config;
mod errors;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use errors::*;

/// qdevice-client: cluster-membership quorum-device arbiter client.
#[derive(Parser, Debug)]
#[command(name = "qdevice-client", version, about)]
struct Cli {
	/// Run in the foreground instead of daemonizing.
	#[arg(short = 'f', long)]
	foreground: bool,

	/// Increase logging verbosity (repeatable).
	#[arg(short = 'd', long, action = clap::ArgAction::Count)]
	debug: u8,

	/// Path to the TOML configuration file.
	#[arg(short = 'c', long = "config", value_name = "PATH", default_value = "/etc/qdevice/qdevice-client.toml")]
	config: PathBuf,

	/// Path to a PEM file of trusted CA certificates for STARTTLS.
	#[arg(long = "ca", value_name = "PATH")]
	ca_file: Option<PathBuf>,
}

fn init_logging(debug: u8) {
	let default_level = match debug {
		0 => "qdevice_client=info,qdevice=info",
		1 => "qdevice_client=debug,qdevice=debug",
		_ => "qdevice_client=trace,qdevice=trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	init_logging(cli.debug);

	if !cli.foreground {
		tracing::info!("qdevice-client does not self-daemonize; run it under a service supervisor");
	}

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("fatal: could not start runtime: {}", e);
			return ExitCode::from(1);
		}
	};

	match runtime.block_on(run(cli)) {
		Ok(()) => ExitCode::from(0),
		Err(e) => match e.kind() {
			ErrorKind::Config(msg) => {
				eprintln!("fatal init error: {}", msg);
				ExitCode::from(1)
			}
			_ => {
				eprintln!("fatal runtime error: {}", e);
				ExitCode::from(2)
			}
		},
	}
}

async fn run(cli: Cli) -> Result<()> {
	let file_config = config::FileConfig::load(&cli.config)?;
	let client_cert = file_config.tls_client_cert.as_ref().map(std::path::Path::new);
	let client_key = file_config.tls_client_key.as_ref().map(std::path::Path::new);
	let has_client_cert = client_cert.is_some() && client_key.is_some();
	let tls_connector = app::load_tls_connector(cli.ca_file.as_deref(), client_cert, client_key)?;
	let app = app::App::new(file_config, tls_connector, has_client_cert);
	app.run().await
}
