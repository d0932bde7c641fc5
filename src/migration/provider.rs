//! Migration providers
//!
//! A provider supplies the full, ordered set of known migration units. It is
//! read-only and knows nothing about which units have been applied.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::file::SqlMigration;
use super::migration::Migration;
use crate::migration::MigrationError;

/// Source of migration units
pub trait MigrationProvider: Send + Sync {
    /// Every known unit, ascending by version
    ///
    /// # Errors
    ///
    /// Returns `Discovery` if the source cannot be read or a unit is malformed,
    /// and `DuplicateUnit` if two units share a name or a version. No partial
    /// list is ever returned.
    fn list_units(&self) -> Result<Vec<Arc<dyn Migration>>, MigrationError>;
}

/// Reject units sharing a name or a version
///
/// `units` must already be sorted by version.
fn check_unique(units: &[&dyn Migration]) -> Result<(), MigrationError> {
    let mut names: HashMap<&str, usize> = HashMap::with_capacity(units.len());
    for (index, unit) in units.iter().enumerate() {
        if let Some(&first) = names.get(unit.name()) {
            return Err(MigrationError::DuplicateUnit {
                key: format!("name \"{}\"", unit.name()),
                first: units[first].name().to_string(),
                second: unit.name().to_string(),
            });
        }
        names.insert(unit.name(), index);
    }

    for pair in units.windows(2) {
        if pair[0].version() == pair[1].version() {
            return Err(MigrationError::DuplicateUnit {
                key: format!("version {}", pair[0].version()),
                first: pair[0].name().to_string(),
                second: pair[1].name().to_string(),
            });
        }
    }

    Ok(())
}

/// Reads `*.sql` units from a directory
///
/// The directory is resolved to an absolute path when the provider is built,
/// so later changes to the working directory do not affect discovery. Files
/// without a `.sql` extension and sub-directories are ignored.
#[derive(Debug, Clone)]
pub struct FileMigrationProvider {
    dir: PathBuf,
}

impl FileMigrationProvider {
    /// # Errors
    ///
    /// Returns `MigrationError::Discovery` if `dir` does not exist or is not a directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let dir = dir.as_ref();
        let absolute = dir
            .canonicalize()
            .map_err(|e| MigrationError::discovery(dir, e.to_string()))?;
        if !absolute.is_dir() {
            return Err(MigrationError::discovery(absolute, "not a directory"));
        }
        Ok(Self { dir: absolute })
    }

    pub fn absolute_dir(&self) -> &Path {
        &self.dir
    }

    /// Discover and parse every unit file, ascending by version
    ///
    /// # Errors
    ///
    /// Same as [`MigrationProvider::list_units`].
    pub fn load(&self) -> Result<Vec<SqlMigration>, MigrationError> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| MigrationError::discovery(&self.dir, e.to_string()))?;

        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::discovery(&self.dir, e.to_string()))?;
            let path = entry.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| MigrationError::discovery(&path, e.to_string()))?;
            if file_type.is_dir() {
                continue;
            }

            let unit = SqlMigration::load(&path)?;
            log::debug!("discovered migration {} ({})", unit.name(), path.display());
            units.push(unit);
        }

        units.sort_by(|a, b| a.version().cmp(&b.version()).then_with(|| a.name().cmp(b.name())));
        check_unique(&units.iter().map(|u| u as &dyn Migration).collect::<Vec<_>>())?;
        Ok(units)
    }
}

impl MigrationProvider for FileMigrationProvider {
    fn list_units(&self) -> Result<Vec<Arc<dyn Migration>>, MigrationError> {
        Ok(self
            .load()?
            .into_iter()
            .map(|unit| Arc::new(unit) as Arc<dyn Migration>)
            .collect())
    }
}

/// Units defined in Rust, registered at compile time
///
/// ```no_run
/// use std::sync::Arc;
/// use shoreline::migration::{Migration, SchemaManager, StaticMigrationProvider};
/// use shoreline::DbError;
///
/// struct CreateUsers;
///
/// impl Migration for CreateUsers {
///     fn name(&self) -> &str { "001_create_users" }
///     fn version(&self) -> i64 { 1 }
///     fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
///         manager.batch_execute("CREATE TABLE users (id BIGSERIAL PRIMARY KEY)")
///     }
/// }
///
/// let provider = StaticMigrationProvider::new(vec![Arc::new(CreateUsers) as Arc<dyn Migration>]).unwrap();
/// ```
#[derive(Clone)]
pub struct StaticMigrationProvider {
    units: Vec<Arc<dyn Migration>>,
}

impl StaticMigrationProvider {
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateUnit` if two units share a name or a version.
    pub fn new(mut units: Vec<Arc<dyn Migration>>) -> Result<Self, MigrationError> {
        units.sort_by(|a, b| a.version().cmp(&b.version()).then_with(|| a.name().cmp(b.name())));
        check_unique(&units.iter().map(|u| u.as_ref()).collect::<Vec<_>>())?;
        Ok(Self { units })
    }
}

impl MigrationProvider for StaticMigrationProvider {
    fn list_units(&self) -> Result<Vec<Arc<dyn Migration>>, MigrationError> {
        Ok(self.units.clone())
    }
}
