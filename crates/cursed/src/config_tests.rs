use super::*;

#[test]
fn minimal_config_gets_defaults() {
	let cfg = parse_config("{}".to_string(), None).unwrap();
	assert_eq!(cfg.auth_addr.to_string(), "127.0.0.1:8001");
	assert_eq!(cfg.signer_addr.to_string(), "127.0.0.1:8000");
	assert_eq!(cfg.ssh_cert_duration, Duration::from_secs(120));
	assert_eq!(cfg.ssl_key_curve, EcCurve::P384);
	assert!(!cfg.force_cmd);
	assert!(cfg.force_user_match);
	assert!(!cfg.key_age_critical);
	assert!(cfg.extensions.contains_key("permit-pty"));
	// The discrete CA bundle defaults to the CA cert path.
	assert_eq!(cfg.ssl_ca, cfg.ssl_cert);
}

#[test]
fn full_config_round_trips() {
	let yaml = r#"
addr: "0.0.0.0"
auth_port: 9101
signer_port: 9100
ssh_ca_key: /etc/cursed/user_ca
db_file: /var/lib/cursed/cursed.db
ssh_cert_duration_secs: 300
max_key_age_days: 30
ssl_duration_mins: 15
ssl_ca_duration_days: 365
ssl_key_curve: p256
ssl_cert_hostname: ca.internal
ssl_broker_hostname: bastion.internal
pwauth: /usr/local/sbin/pwauth
unixgroup: /usr/local/sbin/unixgroup
auth_timeout_secs: 3
force_cmd: true
require_client_ip: true
force_user_match: false
extensions: ["permit-pty", "permit-port-forwarding"]
principal_aliases: /etc/cursed/principal_aliases
"#;
	let cfg = parse_config(yaml.to_string(), None).unwrap();
	assert_eq!(cfg.auth_addr.to_string(), "0.0.0.0:9101");
	assert_eq!(cfg.signer_addr.to_string(), "0.0.0.0:9100");
	assert_eq!(cfg.ssl_key_curve, EcCurve::P256);
	assert_eq!(cfg.max_key_age, Duration::from_secs(30 * 24 * 60 * 60));
	assert_eq!(cfg.ssl_duration, Duration::from_secs(15 * 60));
	assert!(cfg.force_cmd);
	assert!(cfg.require_client_ip);
	assert!(!cfg.force_user_match);
	assert_eq!(cfg.extensions.len(), 2);
}

#[test]
fn unknown_extension_dropped() {
	let yaml = r#"
extensions: ["permit-pty", "permit-root-login"]
"#;
	let cfg = parse_config(yaml.to_string(), None).unwrap();
	assert_eq!(cfg.extensions.len(), 1);
	assert!(!cfg.extensions.contains_key("permit-root-login"));
}

#[test]
fn same_ports_rejected() {
	let yaml = r#"
auth_port: 9000
signer_port: 9000
"#;
	assert!(parse_config(yaml.to_string(), None).is_err());
}

#[test]
fn bad_curve_rejected() {
	let yaml = r#"
ssl_key_curve: p192
"#;
	assert!(parse_config(yaml.to_string(), None).is_err());
}

#[test]
fn bad_addr_rejected() {
	let yaml = r#"
addr: bastion.example.com
"#;
	assert!(parse_config(yaml.to_string(), None).is_err());
}

#[test]
fn unknown_field_rejected() {
	let yaml = r#"
no_such_option: true
"#;
	assert!(parse_config(yaml.to_string(), None).is_err());
}
