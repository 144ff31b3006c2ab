use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

fn mem_drive(id: &str, bucket: &str) -> Drive {
    Drive::new(id, BackendType::Memory).with_property("bucket", bucket)
}

#[test]
fn providers_are_built_once_and_cached() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(mem_drive("m1", "b1")).unwrap();
    let a = reg.provider("m1").unwrap();
    let b = reg.provider("m1").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.drive().id, "m1");
    assert!(a.tiering().is_some());
}

#[test]
fn unknown_drive_is_backend_unavailable() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    let err = reg.provider("nope").err().unwrap();
    assert!(matches!(err, StorageError::BackendUnavailable { .. }));
    assert_eq!(err.http_status(), 503);
}

#[test]
fn missing_required_property_is_rejected() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(Drive::new("m1", BackendType::Memory)).unwrap();
    reg.add_drive(Drive::new("l1", BackendType::LocalFilesystem).with_property("root", " ")).unwrap();
    assert!(matches!(reg.provider("m1").err(), Some(StorageError::InvalidArgument(_))));
    assert!(matches!(reg.provider("l1").err(), Some(StorageError::InvalidArgument(_))));
}

#[test]
fn backend_without_driver_is_unavailable() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(Drive::new("s3", BackendType::S3).with_property("bucket", "x")).unwrap();
    assert!(matches!(reg.provider("s3").err(), Some(StorageError::BackendUnavailable { .. })));
}

struct CountingFactory {
    built: AtomicUsize,
}

impl ProviderFactory for CountingFactory {
    fn required_property_keys(&self) -> Vec<&'static str> {
        vec!["bucket"]
    }

    fn build(&self, drive: &Drive, eff: &EffectiveConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        self.built.fetch_add(1, Ordering::SeqCst);
        let store = MemoryObjectStore::new(drive.property("bucket").unwrap_or_default());
        Ok(Arc::new(ObjectStoreProvider::new(drive.clone(), store, eff.min_part_size)?))
    }
}

#[test]
fn third_party_factories_plug_in() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    let factory = Arc::new(CountingFactory { built: AtomicUsize::new(0) });
    reg.register_factory(BackendType::S3, factory.clone());
    reg.add_drive(Drive::new("s3", BackendType::S3).with_property("bucket", "lake")).unwrap();
    reg.provider("s3").unwrap();
    reg.provider("s3").unwrap();
    assert_eq!(factory.built.load(Ordering::SeqCst), 1);
}

#[test]
fn drives_naming_one_bucket_share_it() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(mem_drive("a", "shared")).unwrap();
    reg.add_drive(mem_drive("b", "shared").with_property("minPartSize", "16")).unwrap();
    reg.provider("a").unwrap();
    reg.provider("b").unwrap();
    assert!(reg.memory().bucket("shared").is_some());
    assert!(reg.memory().bucket("other").is_none());

    reg.add_drive(mem_drive("bad", "b2").with_property("minPartSize", "lots")).unwrap();
    assert!(matches!(reg.provider("bad").err(), Some(StorageError::InvalidArgument(_))));
}

#[test]
fn duplicate_and_updated_drives() {
    let reg = DriveRegistry::new(GlobalGatewayConfig::default());
    reg.add_drive(mem_drive("m", "b")).unwrap();
    assert!(matches!(reg.add_drive(mem_drive("m", "b")), Err(StorageError::AlreadyExists { .. })));
    let before = reg.provider("m").unwrap();
    reg.update_drive(mem_drive("m", "b-new")).unwrap();
    let after = reg.provider("m").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.drive().property("bucket"), Some("b-new"));
    assert!(reg.remove_drive("m").is_some());
    assert!(reg.provider("m").is_err());
}

#[test]
fn from_config_loads_drives() {
    let cfg = GatewayConfig::from_json(
        r#"{ "global": { "preview_window_bytes": 64 },
             "drives": [ { "id": "mem", "backend_type": "memory", "properties": [ { "name": "bucket", "value": "b" } ] } ] }"#,
    )
    .unwrap();
    let reg = DriveRegistry::from_config(cfg).unwrap();
    assert_eq!(reg.drives().len(), 1);
    assert_eq!(reg.global().preview_window_bytes, 64);
    let d = reg.drive("mem").unwrap();
    assert_eq!(reg.effective(&d).preview_window_bytes, 64);
}
