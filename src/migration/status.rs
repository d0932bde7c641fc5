//! Migration status: reconciling known units against the ledger

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::checksum::checksums_match;
use super::migration::Migration;
use super::record::LedgerRecord;
use crate::migration::MigrationError;

/// Applied and pending units of one database
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied migrations (from the ledger), oldest first
    pub applied: Vec<LedgerRecord>,

    /// Pending migrations, in the order they would be applied
    pub pending: Vec<PendingMigration>,
}

/// A known unit with no ledger record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub name: String,
    pub version: i64,
    pub checksum: Option<String>,
    pub reversible: bool,
}

impl PendingMigration {
    fn from_unit(unit: &dyn Migration) -> Self {
        Self {
            name: unit.name().to_string(),
            version: unit.version(),
            checksum: unit.checksum().map(str::to_string),
            reversible: unit.is_reversible(),
        }
    }
}

impl MigrationStatus {
    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get the latest applied migration version
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<i64> {
        self.applied.iter().map(|record| record.version).max()
    }

    #[must_use]
    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|pending| pending.version)
    }
}

/// Units still to run, after the ledger has been checked against the source
pub(crate) struct Plan {
    pub applied: Vec<LedgerRecord>,
    pub pending: Vec<Arc<dyn Migration>>,
}

impl Plan {
    pub fn status(&self) -> MigrationStatus {
        MigrationStatus {
            applied: self.applied.clone(),
            pending: self
                .pending
                .iter()
                .map(|unit| PendingMigration::from_unit(unit.as_ref()))
                .collect(),
        }
    }
}

/// Check the ledger against the ordered units and compute the pending list
///
/// `units` must be sorted by version. Fails on the first of:
/// - an applied name with no unit (`MissingUnit`)
/// - an applied unit whose checksum changed (`ChecksumMismatch`)
/// - a pending unit ordered before the latest applied one (`OutOfOrder`),
///   unless `allow_out_of_order` is set
pub(crate) fn reconcile(
    units: Vec<Arc<dyn Migration>>,
    applied: Vec<LedgerRecord>,
    allow_out_of_order: bool,
) -> Result<Plan, MigrationError> {
    let by_name: HashMap<&str, &dyn Migration> =
        units.iter().map(|unit| (unit.name(), unit.as_ref())).collect();

    let mut latest_applied: Option<&dyn Migration> = None;
    for record in &applied {
        let unit = by_name
            .get(record.name.as_str())
            .copied()
            .ok_or_else(|| MigrationError::MissingUnit {
                name: record.name.clone(),
            })?;

        if !checksums_match(record.checksum.as_deref(), unit.checksum()) {
            return Err(MigrationError::ChecksumMismatch {
                name: record.name.clone(),
                stored: record.checksum.clone().unwrap_or_default(),
                current: unit.checksum().unwrap_or_default().to_string(),
            });
        }

        if latest_applied.map_or(true, |latest| unit.version() > latest.version()) {
            latest_applied = Some(unit);
        }
    }

    let applied_names: BTreeSet<&str> = applied.iter().map(|record| record.name.as_str()).collect();
    let pending: Vec<Arc<dyn Migration>> = units
        .iter()
        .filter(|unit| !applied_names.contains(unit.name()))
        .cloned()
        .collect();

    if let Some(latest) = latest_applied {
        for unit in pending.iter().filter(|unit| unit.version() < latest.version()) {
            if !allow_out_of_order {
                return Err(MigrationError::OutOfOrder {
                    pending: unit.name().to_string(),
                    applied: latest.name().to_string(),
                });
            }
            log::warn!(
                "applying migration \"{}\" out of order (after \"{}\")",
                unit.name(),
                latest.name()
            );
        }
    }

    Ok(Plan { applied, pending })
}
