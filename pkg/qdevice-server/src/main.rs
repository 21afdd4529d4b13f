//! `qdevice-server` — the arbiter-server daemon (spec §1, §6). Accepts
//! connections from arbiter clients, groups them into clusters by the name
//! each one reports at `preinit`, and runs each cluster's decision algorithm
//! on a single-threaded cooperative event loop shared by every connection
//! (spec §7).

#[macro_use]
extern crate error_chain;

mod app;
mod config;
mod errors;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use errors::*;

/// qdevice-server: cluster-membership quorum-device arbiter server.
#[derive(Parser, Debug)]
#[command(name = "qdevice-server", version, about)]
struct Cli {
	/// Run in the foreground instead of daemonizing.
	#[arg(short = 'f', long)]
	foreground: bool,

	/// Increase logging verbosity (repeatable).
	#[arg(short = 'd', long, action = clap::ArgAction::Count)]
	debug: u8,

	/// Path to the TOML configuration file.
	#[arg(short = 'c', long = "config", value_name = "PATH", default_value = "/etc/qdevice/qdevice-server.toml")]
	config: PathBuf,
}

fn init_logging(debug: u8) {
	let default_level = match debug {
		0 => "qdevice_server=info,qdevice=info",
		1 => "qdevice_server=debug,qdevice=debug",
		_ => "qdevice_server=trace,qdevice=trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	init_logging(cli.debug);

	if !cli.foreground {
		tracing::info!("qdevice-server does not self-daemonize; run it under a service supervisor");
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
	let tls_acceptor = app::load_tls_acceptor(
		file_config.tls_cert.as_deref(),
		file_config.tls_key.as_deref(),
		file_config.tls_client_ca.as_deref(),
	)?;
	let app = app::App::new(file_config, tls_acceptor);
	app.run().await
}
