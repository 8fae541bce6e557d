use super::*;

#[test]
fn usernames() {
	assert!(valid_username("alice"));
	assert!(valid_username("_svc"));
	assert!(valid_username("Alice-01"));
	assert!(valid_username("a"));
	assert!(valid_username(&"a".repeat(32)));

	assert!(!valid_username(""));
	assert!(!valid_username("1alice"));
	assert!(!valid_username("-alice"));
	assert!(!valid_username("al ice"));
	assert!(!valid_username("alice$"));
	assert!(!valid_username(&"a".repeat(33)));
}

#[test]
fn ip_literals() {
	assert!(valid_ip("203.0.113.7"));
	assert!(valid_ip("::1"));
	assert!(valid_ip("2001:db8::42"));

	assert!(!valid_ip(""));
	assert!(!valid_ip("bastion.example.com"));
	assert!(!valid_ip("203.0.113.7/24"));
	assert!(!valid_ip("203.0.113.256"));
}

#[test]
fn extensions_filtered_against_allow_list() {
	let requested = vec![
		"permit-pty".to_string(),
		"permit-agent-forwarding".to_string(),
		"permit-everything".to_string(),
		"no-touch-required".to_string(),
	];
	let (exts, invalid) = validate_extensions(&requested);
	assert_eq!(exts.len(), 2);
	assert!(exts.contains_key("permit-pty"));
	assert!(exts.contains_key("permit-agent-forwarding"));
	assert_eq!(exts.get("permit-pty").map(String::as_str), Some(""));
	assert_eq!(
		invalid,
		vec!["permit-everything".to_string(), "no-touch-required".to_string()]
	);
}

#[test]
fn all_known_extensions_accepted() {
	let requested: Vec<String> = VALID_EXTENSIONS.iter().map(|e| e.to_string()).collect();
	let (exts, invalid) = validate_extensions(&requested);
	assert_eq!(exts.len(), VALID_EXTENSIONS.len());
	assert!(invalid.is_empty());
}
