use std::collections::BTreeMap;
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions sshd understands on user certificates; anything else is dropped
/// from the configuration at startup.
pub const VALID_EXTENSIONS: &[&str] = &[
	"permit-X11-forwarding",
	"permit-agent-forwarding",
	"permit-port-forwarding",
	"permit-pty",
	"permit-user-rc",
];

static USERNAME_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)^[a-z_][a-z0-9_-]{0,31}$").expect("static regex"));

pub fn valid_username(user: &str) -> bool {
	USERNAME_RE.is_match(user)
}

pub fn valid_ip(ip: &str) -> bool {
	ip.parse::<IpAddr>().is_ok()
}

/// Filter a configured extension list against the allow-list.
///
/// Returns the effective extension map (values are empty, as the SSH wire
/// format expects) and the rejected entries for the caller to warn about.
pub fn validate_extensions(requested: &[String]) -> (BTreeMap<String, String>, Vec<String>) {
	let mut exts = BTreeMap::new();
	let mut invalid = Vec::new();
	for ext in requested {
		if VALID_EXTENSIONS.contains(&ext.as_str()) {
			exts.insert(ext.clone(), String::new());
		} else {
			invalid.push(ext.clone());
		}
	}
	(exts, invalid)
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
