use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::validate;

/// Elliptic curve used for the X.509 CA and broker keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcCurve {
	P256,
	P384,
	P521,
}

impl FromStr for EcCurve {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"p256" => Ok(EcCurve::P256),
			"p384" => Ok(EcCurve::P384),
			"p521" => Ok(EcCurve::P521),
			other => anyhow::bail!("invalid elliptic curve: {other}"),
		}
	}
}

impl fmt::Display for EcCurve {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EcCurve::P256 => write!(f, "p256"),
			EcCurve::P384 => write!(f, "p384"),
			EcCurve::P521 => write!(f, "p521"),
		}
	}
}

/// On-disk configuration, before resolution. Every field has a default so a
/// minimal file (or none at all, for `--validate-only` smoke checks) parses.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
	pub addr: Option<String>,
	pub auth_port: Option<u16>,
	pub signer_port: Option<u16>,

	pub ssh_ca_key: Option<PathBuf>,
	pub db_file: Option<PathBuf>,
	pub ssh_cert_duration_secs: Option<u64>,
	pub max_key_age_days: Option<u64>,
	pub key_age_critical: Option<bool>,

	pub ssl_duration_mins: Option<u64>,
	pub ssl_ca_duration_days: Option<u64>,
	pub ssl_key_curve: Option<String>,
	pub ssl_key: Option<PathBuf>,
	pub ssl_cert: Option<PathBuf>,
	pub ssl_ca: Option<PathBuf>,
	pub ssl_cert_hostname: Option<String>,
	pub ssl_broker_key: Option<PathBuf>,
	pub ssl_broker_cert: Option<PathBuf>,
	pub ssl_broker_hostname: Option<String>,

	pub pwauth: Option<PathBuf>,
	pub unixgroup: Option<PathBuf>,
	pub auth_timeout_secs: Option<u64>,

	pub force_cmd: Option<bool>,
	pub require_client_ip: Option<bool>,
	pub force_user_match: Option<bool>,
	pub extensions: Option<Vec<String>>,
	pub principal_aliases: Option<PathBuf>,
}

/// Resolved configuration. Immutable once built; handlers receive it behind
/// an `Arc` and never mutate it.
#[derive(Debug, Clone)]
pub struct Config {
	pub auth_addr: SocketAddr,
	pub signer_addr: SocketAddr,

	pub ssh_ca_key: PathBuf,
	pub db_file: PathBuf,
	pub ssh_cert_duration: Duration,
	pub max_key_age: Duration,
	pub key_age_critical: bool,

	pub ssl_duration: Duration,
	pub ssl_ca_duration: Duration,
	pub ssl_key_curve: EcCurve,
	pub ssl_key: PathBuf,
	pub ssl_cert: PathBuf,
	pub ssl_ca: PathBuf,
	pub ssl_cert_hostname: String,
	pub ssl_broker_key: PathBuf,
	pub ssl_broker_cert: PathBuf,
	pub ssl_broker_hostname: String,

	pub pwauth: PathBuf,
	pub unixgroup: PathBuf,
	pub auth_timeout: Duration,

	pub force_cmd: bool,
	pub require_client_ip: bool,
	pub force_user_match: bool,
	pub extensions: BTreeMap<String, String>,
	pub principal_aliases: PathBuf,
}

const DAY: u64 = 24 * 60 * 60;

pub fn parse_config(contents: String, filename: Option<PathBuf>) -> anyhow::Result<Config> {
	let raw: RawConfig = serde_yaml::from_str(&contents).context("invalid configuration file")?;
	if let Some(file) = &filename {
		info!("using config file: {}", file.display());
	}
	resolve(raw)
}

fn resolve(raw: RawConfig) -> anyhow::Result<Config> {
	let addr = parse_env::<String>("CURSED_ADDR")?
		.or(raw.addr)
		.unwrap_or_else(|| "127.0.0.1".to_string());
	let addr: IpAddr = addr
		.parse()
		.with_context(|| format!("addr is not an IP literal: {addr}"))?;
	let auth_port = parse_env::<u16>("CURSED_AUTH_PORT")?
		.or(raw.auth_port)
		.unwrap_or(8001);
	let signer_port = parse_env::<u16>("CURSED_SIGNER_PORT")?
		.or(raw.signer_port)
		.unwrap_or(8000);
	// Port 0 asks the OS for ephemeral ports, so two zeros cannot collide.
	if auth_port == signer_port && auth_port != 0 {
		anyhow::bail!("auth_port and signer_port must differ (both {auth_port})");
	}

	let curve = raw
		.ssl_key_curve
		.as_deref()
		.map(EcCurve::from_str)
		.transpose()?
		.unwrap_or(EcCurve::P384);

	let (extensions, invalid) = validate::validate_extensions(
		&raw
			.extensions
			.unwrap_or_else(|| vec!["permit-pty".to_string()]),
	);
	for ext in invalid {
		warn!("invalid extension in config, ignoring: {ext}");
	}

	let ssl_cert = raw.ssl_cert.unwrap_or_else(|| "cursed_ca.crt".into());
	// A missing discrete CA bundle falls back to the CA cert at bootstrap.
	let ssl_ca = raw.ssl_ca.unwrap_or_else(|| ssl_cert.clone());

	let cfg = Config {
		auth_addr: SocketAddr::new(addr, auth_port),
		signer_addr: SocketAddr::new(addr, signer_port),
		ssh_ca_key: raw.ssh_ca_key.unwrap_or_else(|| "user_ca".into()),
		db_file: raw.db_file.unwrap_or_else(|| "cursed.db".into()),
		ssh_cert_duration: Duration::from_secs(raw.ssh_cert_duration_secs.unwrap_or(2 * 60)),
		max_key_age: Duration::from_secs(raw.max_key_age_days.unwrap_or(90) * DAY),
		key_age_critical: raw.key_age_critical.unwrap_or(false),
		ssl_duration: Duration::from_secs(raw.ssl_duration_mins.unwrap_or(60) * 60),
		ssl_ca_duration: Duration::from_secs(raw.ssl_ca_duration_days.unwrap_or(730) * DAY),
		ssl_key_curve: curve,
		ssl_key: raw.ssl_key.unwrap_or_else(|| "cursed_ca.key".into()),
		ssl_cert,
		ssl_ca,
		ssl_cert_hostname: raw.ssl_cert_hostname.unwrap_or_else(|| "localhost".to_string()),
		ssl_broker_key: raw.ssl_broker_key.unwrap_or_else(|| "cursed_broker.key".into()),
		ssl_broker_cert: raw.ssl_broker_cert.unwrap_or_else(|| "cursed_broker.crt".into()),
		ssl_broker_hostname: raw
			.ssl_broker_hostname
			.unwrap_or_else(|| "localhost".to_string()),
		pwauth: raw.pwauth.unwrap_or_else(|| "/usr/sbin/pwauth".into()),
		unixgroup: raw.unixgroup.unwrap_or_else(|| "/usr/sbin/unixgroup".into()),
		auth_timeout: Duration::from_secs(raw.auth_timeout_secs.unwrap_or(10)),
		force_cmd: raw.force_cmd.unwrap_or(false),
		require_client_ip: raw.require_client_ip.unwrap_or(false),
		force_user_match: raw.force_user_match.unwrap_or(true),
		extensions,
		principal_aliases: raw
			.principal_aliases
			.unwrap_or_else(|| "principal_aliases".into()),
	};

	validate_config(&cfg)?;
	Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
	if cfg.ssh_ca_key.as_os_str().is_empty() {
		anyhow::bail!("ssh_ca_key is a required field");
	}
	if cfg.pwauth.as_os_str().is_empty() || cfg.unixgroup.as_os_str().is_empty() {
		anyhow::bail!("pwauth and unixgroup are required fields");
	}
	if cfg.ssl_key.as_os_str().is_empty() || cfg.ssl_cert.as_os_str().is_empty() {
		anyhow::bail!("ssl_key and ssl_cert are required fields");
	}
	if cfg.ssh_cert_duration.is_zero() {
		anyhow::bail!("ssh_cert_duration_secs must be non-zero");
	}
	if cfg.ssl_duration.is_zero() {
		anyhow::bail!("ssl_duration_mins must be non-zero");
	}
	Ok(())
}

fn parse_env<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
	T::Err: std::error::Error + Send + Sync + 'static,
{
	match env::var(name) {
		Ok(v) if !v.is_empty() => Ok(Some(
			v.parse().with_context(|| format!("invalid {name}: {v}"))?,
		)),
		_ => Ok(None),
	}
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
