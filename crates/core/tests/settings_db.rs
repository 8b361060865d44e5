use helios_core::db::{DbError, SettingsDb, CURRENT_SCHEMA_VERSION};
use helios_core::services::{BackgroundTask, Scheduler, TaskState};
use tempfile::tempdir;

#[test]
fn fresh_database_is_migrated_to_the_current_schema() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("settings.db");

    let db = SettingsDb::open(&db_path).expect("open db");
    assert_eq!(db.schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
    drop(db);

    // Re-opening is a no-op migration.
    let db = SettingsDb::open(&db_path).expect("re-open db");
    assert_eq!(db.schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
}

#[test]
fn version_one_databases_gain_the_task_log_and_keep_their_settings() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("settings.db");
    {
        let conn = rusqlite::Connection::open(&db_path).expect("raw open");
        conn.execute_batch(
            r#"
            CREATE TABLE settings (
                transformer_id TEXT NOT NULL,
                param TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (transformer_id, param)
            );
            INSERT INTO settings (transformer_id, param, value, updated_at)
            VALUES ('cfr', 'showversion', 'true', '2024-01-01T00:00:00Z');
            PRAGMA user_version = 1;
            "#,
        )
        .expect("seed v1 schema");
    }

    let db = SettingsDb::open(&db_path).expect("migrate");
    assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    assert_eq!(db.get_setting("cfr", "showversion").unwrap().as_deref(), Some("true"));
    assert!(db.list_task_runs(10).unwrap().is_empty());
}

#[test]
fn newer_schema_versions_are_refused() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("settings.db");
    {
        let conn = rusqlite::Connection::open(&db_path).expect("raw open");
        conn.execute_batch("PRAGMA user_version = 99;").expect("bump version");
    }

    match SettingsDb::open(&db_path) {
        Err(DbError::UnsupportedSchemaVersion { found, max_supported, .. }) => {
            assert_eq!(found, 99);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("expected unsupported schema version, got {other:?}"),
    }
}

#[test]
fn put_is_an_upsert_and_listing_is_filtered_by_transformer() {
    let db = SettingsDb::open_in_memory().expect("db");
    db.put_setting("cfr", "showversion", "false").unwrap();
    db.put_setting("cfr", "showversion", "true").unwrap();
    db.put_setting("javap", "verbose", "true").unwrap();

    assert_eq!(db.get_setting("cfr", "showversion").unwrap().as_deref(), Some("true"));
    assert_eq!(db.get_setting("cfr", "missing").unwrap(), None);

    let cfr = db.list_settings(Some("cfr")).unwrap();
    assert_eq!(cfr.len(), 1);
    assert_eq!(cfr[0].value, "true");
    assert_eq!(db.list_settings(None).unwrap().len(), 2);
}

#[test]
fn finished_tasks_can_be_logged() {
    let db = SettingsDb::open_in_memory().expect("db");
    let scheduler = Scheduler::new();
    let done = scheduler.submit(BackgroundTask::new("decompile Foo.class (CFR)", |_| Ok(()))).unwrap();
    assert_eq!(done.wait(), TaskState::Completed);

    for record in scheduler.history() {
        db.insert_task_run(&record).unwrap();
    }

    let runs = db.list_task_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].0, "decompile Foo.class (CFR)");
    assert_eq!(runs[0].1, "completed");
    assert!(!runs[0].2.is_empty());
}
