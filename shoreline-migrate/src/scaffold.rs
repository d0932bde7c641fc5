//! `shoreline-migrate new`: create the next numbered migration file

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use shoreline::migration::file::parse_filename;

/// Width of the version prefix when the directory has no migrations yet
const DEFAULT_WIDTH: usize = 3;

/// Next version and its zero-padded width, from the `.sql` files in `dir`
///
/// Files whose names do not parse are skipped here; discovery reports them.
pub fn next_version(dir: &Path) -> Result<(i64, usize)> {
    if !dir.exists() {
        return Ok((1, DEFAULT_WIDTH));
    }

    let mut latest: Option<(i64, usize)> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Ok((version, name)) = parse_filename(file_name) else {
            continue;
        };
        let width = name.find('_').unwrap_or(name.len());
        if latest.map_or(true, |(v, _)| version > v) {
            latest = Some((version, width));
        }
    }

    match latest {
        Some((version, width)) => match version.checked_add(1) {
            Some(next) => Ok((next, width)),
            None => bail!("no version left after {version} in {}", dir.display()),
        },
        None => Ok((1, DEFAULT_WIDTH)),
    }
}

/// Body of a new migration file
pub fn template(name: &str) -> String {
    format!(
        "-- {name}\n\
         -- Created {}\n\
         \n\
         -- migrate:up\n\
         \n\
         \n\
         -- migrate:down\n\
         \n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Create `<next version>_<slug>.sql` in `dir`, creating `dir` if needed
///
/// The `up` section starts out empty, and discovery rejects an empty `up`
/// section, so the file cannot be applied before it is filled in.
pub fn create_migration(dir: &Path, slug: &str) -> Result<PathBuf> {
    let (version, width) = next_version(dir)?;
    let file_name = format!("{version:0width$}_{slug}.sql");
    if let Err(reason) = parse_filename(&file_name) {
        bail!("invalid migration name {slug:?}: {reason}");
    }

    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(&file_name);
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let name = file_name.trim_end_matches(".sql");
    fs::write(&path, template(name)).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
