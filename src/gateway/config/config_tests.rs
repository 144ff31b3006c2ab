use super::*;
use crate::gateway::types::BackendType;

#[test]
fn precedence_global_drive() {
    let global = GlobalGatewayConfig::default();
    let mut drive = DriveConfig::default();
    drive.preview_window_bytes = Some(1024);
    drive.security_check_enabled = Some(false);

    let eff = EffectiveConfig::from_layers(&global, &drive);
    assert_eq!(eff.preview_window_bytes, 1024);
    assert!(!eff.security_check_enabled);
    assert_eq!(eff.preview_max_scan_bytes, 500_000);
    assert_eq!(eff.preview_retry_attempts, 20);
    assert_eq!(eff.min_part_size, 5 * 1024 * 1024);
}

#[test]
fn zero_window_is_clamped() {
    let global = GlobalGatewayConfig { preview_window_bytes: 0, ..Default::default() };
    let eff = EffectiveConfig::from_layers(&global, &DriveConfig::default());
    assert_eq!(eff.preview_window_bytes, 1);
}

#[test]
fn parses_drives_from_json() {
    let text = r#"{
        "global": { "preview_window_bytes": 4096 },
        "drives": [
            { "id": "archive", "backend_type": "memory",
              "properties": [ { "name": "bucket", "value": "b1" } ],
              "security_rules": [ { "role_name": "staff", "path_pattern": ".*", "access_level": "read", "exclude": false } ] },
            { "id": "share", "backend_type": "local_filesystem",
              "properties": [ { "name": "root", "value": "/srv/share" } ],
              "config": { "security_check_enabled": false } }
        ]
    }"#;
    let cfg = GatewayConfig::from_json(text).unwrap();
    assert_eq!(cfg.global.preview_window_bytes, 4096);
    assert_eq!(cfg.global.preview_retry_attempts, 20);
    assert_eq!(cfg.drives.len(), 2);
    assert_eq!(cfg.drives[0].backend_type, BackendType::Memory);
    assert_eq!(cfg.drives[0].property("bucket"), Some("b1"));
    assert_eq!(cfg.drives[0].security_rules.len(), 1);
    assert!(!cfg.effective(&cfg.drives[1]).security_check_enabled);
}

#[test]
fn duplicate_drive_ids_rejected() {
    let text = r#"{ "drives": [ { "id": "a", "backend_type": "memory" }, { "id": "a", "backend_type": "s3" } ] }"#;
    assert!(GatewayConfig::from_json(text).is_err());
}
