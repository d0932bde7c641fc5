//! Tests for CLI configuration resolution

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use shoreline_migrate::settings::{load_config, resolve_database_url};

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn test_flag_wins_over_environment() {
    let url = resolve_database_url(
        Some("postgresql://flag@localhost/app".to_string()),
        env(&[("SHORELINE_DATABASE_URL", "postgresql://env@localhost/app")]),
    );
    assert_eq!(url.as_deref(), Some("postgresql://flag@localhost/app"));
}

#[test]
fn test_shoreline_variable_wins_over_generic_one() {
    let url = resolve_database_url(
        None,
        env(&[
            ("DATABASE_URL", "postgresql://generic@localhost/app"),
            ("SHORELINE_DATABASE_URL", "postgresql://specific@localhost/app"),
        ]),
    );
    assert_eq!(url.as_deref(), Some("postgresql://specific@localhost/app"));
}

#[test]
fn test_empty_variables_are_ignored() {
    let url = resolve_database_url(
        None,
        env(&[
            ("SHORELINE_DATABASE_URL", "  "),
            ("DATABASE_URL", "postgresql://generic@localhost/app"),
        ]),
    );
    assert_eq!(url.as_deref(), Some("postgresql://generic@localhost/app"));
    assert_eq!(resolve_database_url(None, env(&[])), None);
}

#[test]
fn test_flags_override_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shoreline.toml");
    fs::write(
        &path,
        r#"
[database]
host = "db.internal"
database = "directory"
user = "app"
password = "secret"
max_connections = 4

[migrations]
directory = "db/migrations"
table_name = "schema_history"
"#,
    )
    .unwrap();

    let config = load_config(
        Some(&path),
        Some("postgresql://cli@localhost:5432/directory".to_string()),
        Some(PathBuf::from("sql")),
    )
    .unwrap();

    assert_eq!(config.database.url.as_deref(), Some("postgresql://cli@localhost:5432/directory"));
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.migrations.directory, PathBuf::from("sql"));
    assert_eq!(config.migrations.table_name, "schema_history");
    assert!(config.database.validate().is_ok());
}
