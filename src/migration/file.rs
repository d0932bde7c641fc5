//! SQL migration files
//!
//! A file unit is named `<version>_<slug>.sql`, e.g. `001_create_users.sql`.
//! Its content is plain SQL, optionally split into sections by marker lines:
//!
//! ```sql
//! -- migrate:up
//! CREATE TABLE users (id BIGSERIAL PRIMARY KEY);
//!
//! -- migrate:down
//! DROP TABLE users;
//! ```
//!
//! A file without markers is entirely the `up` section.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use super::checksum::checksum_of;
use super::migration::Migration;
use super::schema_manager::SchemaManager;
use crate::executor::DbError;
use crate::migration::MigrationError;

static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_([A-Za-z0-9_]+)\.sql$").expect("filename pattern is valid"));

const UP_MARKER: &str = "migrate:up";
const DOWN_MARKER: &str = "migrate:down";

/// Parse a migration file name into `(version, name)`
///
/// The name is the file stem, so `001_create_users.sql` gives
/// `(1, "001_create_users")`.
///
/// # Errors
///
/// Returns a reason string if the name does not match `<digits>_<slug>.sql`
/// or the version is not a positive `i64`.
pub fn parse_filename(file_name: &str) -> Result<(i64, String), String> {
    let caps = FILENAME_RE.captures(file_name).ok_or_else(|| {
        format!("file name {file_name:?} does not match <version>_<slug>.sql")
    })?;

    let digits = &caps[1];
    let version = digits
        .parse::<i64>()
        .map_err(|e| format!("version {digits:?} in {file_name:?} is not a valid i64: {e}"))?;
    if version <= 0 {
        return Err(format!("version in {file_name:?} must be greater than zero"));
    }

    let stem = file_name.trim_end_matches(".sql").to_string();
    Ok((version, stem))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

fn marker(line: &str) -> Option<Section> {
    let body = line.trim().strip_prefix("--")?.trim();
    if body.eq_ignore_ascii_case(UP_MARKER) {
        Some(Section::Up)
    } else if body.eq_ignore_ascii_case(DOWN_MARKER) {
        Some(Section::Down)
    } else {
        None
    }
}

fn is_blank_or_comment(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with("--")
}

fn has_statements(sql: &str) -> bool {
    !sql.lines().all(is_blank_or_comment)
}

/// Split file content into its `up` and optional `down` sections
fn split_sections(content: &str) -> Result<(String, Option<String>), String> {
    if !content.lines().any(|line| marker(line).is_some()) {
        if !has_statements(content) {
            return Err("migration has no statements".to_string());
        }
        return Ok((content.to_string(), None));
    }

    let mut current = Section::Preamble;
    let mut up: Option<Vec<&str>> = None;
    let mut down: Option<Vec<&str>> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        match marker(line) {
            Some(Section::Up) => {
                if up.is_some() {
                    return Err(format!("line {line_no}: repeated `-- {UP_MARKER}` marker"));
                }
                if down.is_some() {
                    return Err(format!(
                        "line {line_no}: `-- {UP_MARKER}` must come before `-- {DOWN_MARKER}`"
                    ));
                }
                up = Some(Vec::new());
                current = Section::Up;
            }
            Some(Section::Down) => {
                if down.is_some() {
                    return Err(format!("line {line_no}: repeated `-- {DOWN_MARKER}` marker"));
                }
                if up.is_none() {
                    return Err(format!(
                        "line {line_no}: `-- {DOWN_MARKER}` without a preceding `-- {UP_MARKER}`"
                    ));
                }
                down = Some(Vec::new());
                current = Section::Down;
            }
            Some(Section::Preamble) => unreachable!("marker() never yields the preamble"),
            None => match current {
                Section::Preamble => {
                    if !is_blank_or_comment(line) {
                        return Err(format!(
                            "line {line_no}: SQL before the `-- {UP_MARKER}` marker"
                        ));
                    }
                }
                Section::Up => up.get_or_insert_with(Vec::new).push(line),
                Section::Down => down.get_or_insert_with(Vec::new).push(line),
            },
        }
    }

    let up = up.map(|lines| lines.join("\n")).unwrap_or_default();
    if !has_statements(&up) {
        return Err(format!("the `-- {UP_MARKER}` section is empty"));
    }
    let down = down
        .map(|lines| lines.join("\n"))
        .filter(|sql| has_statements(sql));

    Ok((up, down))
}

/// A migration unit backed by a `.sql` file
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    version: i64,
    path: PathBuf,
    up: String,
    down: Option<String>,
    checksum: String,
}

impl SqlMigration {
    /// Read and parse a migration file
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Discovery` if the file cannot be read, is not
    /// UTF-8, or its name or content is malformed.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let bytes = fs::read(path).map_err(|e| MigrationError::discovery(path, e.to_string()))?;
        let content = String::from_utf8(bytes)
            .map_err(|e| MigrationError::discovery(path, format!("file is not UTF-8: {e}")))?;
        Self::from_source(path, &content)
    }

    /// Build a unit from a file path and its content without touching the filesystem
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Discovery` if the name or content is malformed.
    pub fn from_source(path: impl Into<PathBuf>, content: &str) -> Result<Self, MigrationError> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::discovery(&path, "file name is not valid UTF-8"))?;

        let (version, name) =
            parse_filename(file_name).map_err(|reason| MigrationError::discovery(&path, reason))?;
        let (up, down) =
            split_sections(content).map_err(|reason| MigrationError::discovery(&path, reason))?;

        Ok(Self {
            name,
            version,
            checksum: checksum_of(content.as_bytes()),
            path,
            up,
            down,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        manager.batch_execute(&self.up)
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        match &self.down {
            Some(sql) => manager.batch_execute(sql),
            None => Err(DbError::Other(format!(
                "migration \"{}\" has no down section",
                self.name
            ))),
        }
    }

    fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    fn checksum(&self) -> Option<&str> {
        Some(&self.checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("001_create_users.sql").unwrap(),
            (1, "001_create_users".to_string())
        );
        assert_eq!(
            parse_filename("20240120120000_add_orders.sql").unwrap(),
            (20240120120000, "20240120120000_add_orders".to_string())
        );
    }

    #[test]
    fn test_parse_filename_rejects_malformed_names() {
        assert!(parse_filename("create_users.sql").is_err());
        assert!(parse_filename("001-create-users.sql").is_err());
        assert!(parse_filename("001_create users.sql").is_err());
        assert!(parse_filename("001_create_users.SQL").is_err());
        assert!(parse_filename("000_zero.sql").is_err());
        assert!(parse_filename("99999999999999999999_overflow.sql").is_err());
    }

    #[test]
    fn test_file_without_markers_is_all_up() {
        let sql = "CREATE TABLE users (id BIGINT);\n";
        let unit = SqlMigration::from_source("migrations/001_create_users.sql", sql).unwrap();

        assert_eq!(unit.name(), "001_create_users");
        assert_eq!(unit.version(), 1);
        assert_eq!(unit.up_sql(), sql);
        assert_eq!(unit.down_sql(), None);
        assert!(!unit.is_reversible());
        assert_eq!(unit.checksum(), Some(checksum_of(sql.as_bytes()).as_str()));
    }

    #[test]
    fn test_up_and_down_sections() {
        let sql = "-- users table\n\
                   -- migrate:up\n\
                   CREATE TABLE users (id BIGINT);\n\
                   -- migrate:down\n\
                   DROP TABLE users;\n";
        let unit = SqlMigration::from_source("001_create_users.sql", sql).unwrap();

        assert_eq!(unit.up_sql().trim(), "CREATE TABLE users (id BIGINT);");
        assert_eq!(unit.down_sql().map(str::trim), Some("DROP TABLE users;"));
        assert!(unit.is_reversible());
    }

    #[test]
    fn test_empty_down_section_is_irreversible() {
        let sql = "-- migrate:up\nSELECT 1;\n-- migrate:down\n\n-- nothing to undo\n";
        let unit = SqlMigration::from_source("001_noop.sql", sql).unwrap();
        assert_eq!(unit.down_sql(), None);
    }

    #[test]
    fn test_malformed_content_is_a_discovery_error() {
        let cases = [
            "",
            "-- only a comment\n",
            "-- migrate:up\n\n-- migrate:down\nDROP TABLE users;\n",
            "CREATE TABLE users (id BIGINT);\n-- migrate:up\nSELECT 1;\n",
            "-- migrate:down\nDROP TABLE users;\n",
            "-- migrate:up\nSELECT 1;\n-- migrate:up\nSELECT 2;\n",
            "-- migrate:up\nSELECT 1;\n-- migrate:down\nSELECT 2;\n-- migrate:down\nSELECT 3;\n",
        ];

        for content in cases {
            let err = SqlMigration::from_source("001_bad.sql", content).unwrap_err();
            assert!(
                matches!(err, MigrationError::Discovery { .. }),
                "{content:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002_add_email_index.sql");
        fs::write(&path, "CREATE INDEX idx_users_email ON users (email);").unwrap();

        let unit = SqlMigration::load(&path).unwrap();
        assert_eq!(unit.name(), "002_add_email_index");
        assert_eq!(unit.path(), path.as_path());
    }

    #[test]
    fn test_up_runs_the_whole_section_as_one_batch() {
        let db = crate::test_helpers::MemoryDatabase::new();
        let sql = "CREATE TABLE a (id BIGINT);\nCREATE TABLE b (id BIGINT);";
        let unit = SqlMigration::from_source("001_two_tables.sql", sql).unwrap();

        unit.up(&SchemaManager::new(&db)).unwrap();
        assert_eq!(db.committed_statements(), vec![sql.to_string()]);
    }
}
