//! TOML configuration for the arbiter server daemon (spec §6/§7).

use std::time::Duration;

use serde::Deserialize;

use qdevice::wire::typed::TlsMode;

fn default_listen() -> String {
	"0.0.0.0:5403".to_string()
}
fn default_protocol_timeout_ms() -> u32 {
	10_000
}

#[derive(Debug, Deserialize)]
pub struct FileConfig {
	#[serde(default = "default_listen")]
	pub listen: String,
	#[serde(default)]
	pub tls: TlsModeName,
	pub tls_cert: Option<String>,
	pub tls_key: Option<String>,
	/// CA bundle used to verify client certificates. Presence implies
	/// mutual TLS is required; absence means clients are never asked for
	/// one.
	pub tls_client_ca: Option<String>,
	#[serde(default = "default_protocol_timeout_ms")]
	pub protocol_timeout_ms: u32,
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

	pub fn protocol_timeout(&self) -> Duration {
		Duration::from_millis(self.protocol_timeout_ms as u64)
	}

	pub fn require_client_cert(&self) -> bool {
		self.tls_client_ca.is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_minimal_config() {
		let cfg: FileConfig = toml::from_str("").unwrap();
		assert_eq!(cfg.listen, "0.0.0.0:5403");
		assert_eq!(cfg.protocol_timeout_ms, 10_000);
		assert!(matches!(cfg.tls, TlsModeName::Unsupported));
	}

	#[test]
	fn parses_tls_config() {
		let cfg: FileConfig = toml::from_str(
			r#"
			listen = "0.0.0.0:5403"
			tls = "required"
			tls_cert = "/etc/qdevice/cert.pem"
			tls_key = "/etc/qdevice/key.pem"
			"#,
		)
		.unwrap();
		assert!(matches!(cfg.tls, TlsModeName::Required));
		assert_eq!(cfg.tls_cert.as_deref(), Some("/etc/qdevice/cert.pem"));
	}
}
