//! Configuration and mapping schema files.

use std::sync::Arc;

use tempfile::tempdir;

use orm_core::mapping::{MappingRegistry, MappingSchema};
use orm_core::storage::MemoryDriver;
use orm_core::types::Value;
use orm_core::{BatchFetchStyle, FlushMode, OrmConfig, OrmError, Query, SessionFactory};

use crate::helpers::{registry, HookLog};

#[test]
fn test_config_file_overrides_defaults() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("orm.json");
    std::fs::write(&path, r#"{ "default_batch_size": 8, "batch_fetch_style": "padded" }"#)?;

    let config = OrmConfig::from_file(&path)?;
    assert_eq!(config.default_batch_size, 8);
    assert_eq!(config.batch_fetch_style, BatchFetchStyle::Padded);
    assert_eq!(config.flush_mode, FlushMode::Auto);
    Ok(())
}

#[test]
fn test_invalid_config_rejected() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("orm.json");
    std::fs::write(&path, r#"{ "default_batch_size": 0 }"#)?;
    assert!(matches!(OrmConfig::from_file(&path), Err(OrmError::InvalidConfig(_))));

    std::fs::write(&path, "{ not json")?;
    assert!(matches!(OrmConfig::from_file(&path), Err(OrmError::Serialization(_))));

    assert!(OrmConfig::from_file(dir.path().join("missing.json")).is_err());

    let log = HookLog::default();
    let driver = MemoryDriver::with_mapping(&registry(&log))?;
    let zero = OrmConfig {
        default_batch_size: 0,
        ..OrmConfig::default()
    };
    assert!(matches!(
        SessionFactory::new(registry(&log), Arc::new(driver), zero),
        Err(OrmError::InvalidConfig(_))
    ));
    Ok(())
}

#[test]
fn test_schema_file_drives_a_working_factory() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("schema.json");
    let log = HookLog::default();
    MappingSchema::from_registry(&registry(&log)).save(&path)?;

    let loaded = MappingSchema::load(&path)?;
    assert_eq!(loaded, MappingSchema::from_registry(&registry(&log)));
    let registry: Arc<MappingRegistry> = Arc::new(loaded.into_registry()?);
    assert_eq!(registry.entity_names(), vec!["Element".to_string(), "Node".to_string()]);

    let driver = MemoryDriver::with_mapping(&registry)?;
    let factory = SessionFactory::new(registry, Arc::new(driver.clone()), OrmConfig::default())?;
    let mut session = factory.open_session()?;
    let n = session.create("Node")?;
    session.set(n, "string", "from schema")?;
    session.begin()?;
    session.persist(n)?;
    session.commit()?;

    let mut reader = factory.open_session()?;
    let found = reader.query(&Query::new("Node"))?;
    assert_eq!(reader.get(found[0], "string")?, &Value::from("from schema"));
    // Hooks are not part of the schema.
    assert!(log.calls().is_empty());
    Ok(())
}
