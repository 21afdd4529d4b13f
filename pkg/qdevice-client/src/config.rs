//! TOML configuration file format for the client daemon (spec §7). Mirrors
//! the shape of corosync's own `quorum.device` config block, flattened into
//! a dedicated file instead of being read out of `corosync.conf` directly,
//! since the cmap binding that would read it live is out of scope here.

use std::time::Duration;

use serde::Deserialize;

use qdevice::wire::typed::{DecisionAlgorithm, TlsMode};
use qdevice_primitives::NodeId;

fn default_heartbeat_ms() -> u32 {
	8000
}
fn default_cast_vote_timer_ms() -> u32 {
	10_000
}
fn default_sync_timeout_ms() -> u32 {
	15_000
}

#[derive(Debug, Deserialize)]
pub struct FileConfig {
	pub cluster_name: String,
	pub node_id: Option<NodeId>,
	pub host: Vec<String>,
	#[serde(default)]
	pub algorithm: AlgorithmName,
	#[serde(default)]
	pub tls: TlsModeName,
	/// Client certificate presented for mutual TLS, when the server
	/// advertises `tls-client-cert-required` in its `preinit-reply`.
	pub tls_client_cert: Option<String>,
	pub tls_client_key: Option<String>,
	#[serde(default = "default_heartbeat_ms")]
	pub heartbeat_interval_ms: u32,
	#[serde(default = "default_cast_vote_timer_ms")]
	pub cast_vote_timer_interval_ms: u32,
	#[serde(default = "default_sync_timeout_ms")]
	pub sync_timeout_ms: u32,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmName {
	#[default]
	Test,
	Ffsplit,
	Lms,
	#[serde(rename = "2nodelms")]
	TwoNodeLms,
}

impl AlgorithmName {
	pub fn to_wire(self) -> DecisionAlgorithm {
		match self {
			AlgorithmName::Test => DecisionAlgorithm::Test,
			AlgorithmName::Ffsplit => DecisionAlgorithm::FfSplit,
			AlgorithmName::Lms => DecisionAlgorithm::Lms,
			AlgorithmName::TwoNodeLms => DecisionAlgorithm::TwoNodeLms,
		}
	}
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsModeName {
	#[default]
	Unsupported,
	Supported,
	Required,
}

impl TlsModeName {
	pub fn to_wire(self) -> TlsMode {
		match self {
			TlsModeName::Unsupported => TlsMode::Unsupported,
			TlsModeName::Supported => TlsMode::Supported,
			TlsModeName::Required => TlsMode::Required,
		}
	}
}

impl FileConfig {
	pub fn load(path: &std::path::Path) -> crate::errors::Result<Self> {
		let text = std::fs::read_to_string(path)
			.map_err(|e| crate::errors::ErrorKind::Config(format!("reading {}: {}", path.display(), e)))?;
		toml::from_str(&text).map_err(|e| crate::errors::ErrorKind::Config(format!("parsing {}: {}", path.display(), e)).into())
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms as u64)
	}

	pub fn cast_vote_timer_interval(&self) -> Duration {
		Duration::from_millis(self.cast_vote_timer_interval_ms as u64)
	}

	pub fn sync_timeout(&self) -> Duration {
		Duration::from_millis(self.sync_timeout_ms as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_minimal_config() {
		let cfg: FileConfig = toml::from_str(
			r#"
			cluster_name = "mycluster"
			host = ["10.0.0.1", "10.0.0.2"]
			"#,
		)
		.unwrap();
		assert_eq!(cfg.cluster_name, "mycluster");
		assert_eq!(cfg.host.len(), 2);
		assert_eq!(cfg.heartbeat_interval_ms, 8000);
		assert!(matches!(cfg.algorithm, AlgorithmName::Test));
	}

	#[test]
	fn parses_full_config() {
		let cfg: FileConfig = toml::from_str(
			r#"
			cluster_name = "mycluster"
			node_id = 7
			host = ["qnetd.example.com"]
			algorithm = "ffsplit"
			tls = "required"
			heartbeat_interval_ms = 5000
			cast_vote_timer_interval_ms = 3000
			sync_timeout_ms = 20000
			"#,
		)
		.unwrap();
		assert_eq!(cfg.node_id, Some(7));
		assert!(matches!(cfg.algorithm, AlgorithmName::Ffsplit));
		assert!(matches!(cfg.tls, TlsModeName::Required));
	}
}
