use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use warden_core::config::{LogFormat, WardenConfig, WardenConfigBuilder};
use warden_core::{NodeId, WardenError};

#[test]
fn test_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[node]
id = 131343
peer_director = 131599
reboot_command = "/usr/bin/systemctl"
reboot_args = ["reboot", "--force"]

[election]
discover_peer_timeout = "3s"
pre_active_script = "/opt/ha/pre-active"
pre_active_script_timeout = "500ms"

[failover]
node_failover_delay = "30s"
node_failover_node_wait = "1m"

[consensus]
enabled = true
relaxed_node_promotion = true
takeover_valid_time = "45s"

[logging]
level = "debug"
format = "compact"
"#
    )
    .unwrap();

    let config = WardenConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.node_id(), NodeId(0x2010f));
    assert_eq!(config.node.peer_director, Some(NodeId(0x2020f)));
    assert_eq!(config.node.reboot_command, PathBuf::from("/usr/bin/systemctl"));
    assert_eq!(config.election.discover_peer_timeout, Duration::from_secs(3));
    assert_eq!(
        config.election.pre_active_script,
        Some(PathBuf::from("/opt/ha/pre-active"))
    );
    assert_eq!(
        config.election.pre_active_script_timeout,
        Duration::from_millis(500)
    );
    assert_eq!(config.failover.node_failover_delay, Duration::from_secs(30));
    assert_eq!(config.failover.node_failover_node_wait, Duration::from_secs(60));
    assert!(config.consensus.enabled);
    assert!(config.consensus.relaxed_node_promotion);
    assert!(!config.consensus.remote_fencing);
    assert_eq!(config.consensus.takeover_valid_time, Duration::from_secs(45));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Compact);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let config = WardenConfig::from_toml_str("[node]\nid = 7\n").unwrap();
    let defaults = WardenConfig::default();

    assert_eq!(config.node.id, 7);
    assert_eq!(config.election, defaults.election);
    assert_eq!(config.failover, defaults.failover);
    assert_eq!(config.consensus, defaults.consensus);
    assert_eq!(config.election.discover_peer_timeout, Duration::from_secs(2));
    assert_eq!(config.failover.node_failover_node_wait, Duration::from_secs(15));
}

#[test]
fn test_malformed_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[failover]\nnode_failover_delay = \"ten seconds\"").unwrap();

    let result = WardenConfig::from_file(file.path());
    assert!(matches!(result, Err(WardenError::ConfigParse(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = WardenConfig::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(WardenError::IoError(_))));
}

#[test]
fn test_rendered_config_parses_back() {
    let config = WardenConfigBuilder::new()
        .node_id(0x2010f)
        .peer_director(0x2020f)
        .log_level("trace")
        .build()
        .unwrap();

    let rendered = config.to_toml_string().unwrap();
    assert_eq!(WardenConfig::from_toml_str(&rendered).unwrap(), config);
}

#[test]
fn test_zero_node_wait_is_invalid() {
    let mut config = WardenConfig::test();
    config.failover.node_failover_node_wait = Duration::ZERO;
    assert!(matches!(
        config.validate(),
        Err(WardenError::Configuration { .. })
    ));
}

#[test]
fn test_enabled_consensus_needs_takeover_valid_time() {
    let mut config = WardenConfig::test();
    config.consensus.enabled = true;
    config.consensus.takeover_valid_time = Duration::ZERO;
    assert!(config.validate().is_err());

    config.consensus.enabled = false;
    assert!(config.validate().is_ok());
}
