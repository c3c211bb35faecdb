//! Walks the static and source trees. Static files are copied as-is; content
//! documents are handed to [`crate::content::process`], which reports the
//! directories and tags whose aggregate pages need regenerating.

use crate::build::{Error, Result, Site};
use crate::cache::{EntryRecord, Kind};
use crate::config::normalize;
use crate::content::{self, file_name_of, parent_of, relative_path};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// What a document pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Affected {
    /// Directories (relative to the source root, never the root itself) with
    /// a new or updated entry somewhere beneath them.
    pub paths: BTreeSet<String>,

    /// Tags carried by a new or updated entry.
    pub tags: BTreeSet<String>,

    /// The number of entries written.
    pub entries: usize,
}

impl Affected {
    /// Whether anything aggregated needs regenerating.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.entries == 0
    }
}

fn sorted_walk(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
}

/// Copies every regular file under the static directory into the same
/// relative location under the destination. Returns the number of files
/// copied or updated.
pub fn copy_static(site: &Site<'_>) -> Result<usize> {
    let config = site.config;
    let root = &config.static_directory;
    if !root.is_dir() {
        debug!("no static directory at {}", root.display());
        return Ok(0);
    }

    let mut copied = 0;
    for entry in sorted_walk(root) {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let relative = relative_path(entry.path(), root);
        let synced = site.syncer.copy(
            &relative,
            entry.path(),
            &config.destination_directory.join(&relative),
        )?;
        if let Some(datetime) = synced.timestamp() {
            let path = site.cache.path_id(parent_of(&relative))?;
            let record = EntryRecord::new(Kind::Static, path, file_name_of(&relative), datetime, synced.is_update())
                .source(&relative);
            site.cache.add_entry(&record)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Processes content documents. With an empty `files` list every file under
/// the source directory with the configured extension is processed, in
/// sorted order; otherwise exactly the named files are. Named files are
/// resolved against the working directory and must lie under the source
/// directory.
pub fn process_documents(site: &Site<'_>, files: &[PathBuf]) -> Result<Affected> {
    let mut affected = Affected::default();
    if files.is_empty() {
        for path in documents(site)? {
            content::process(site, &path, &mut affected)?;
        }
    } else {
        let cwd = env::current_dir()?;
        for file in files {
            let path = resolve(&cwd, file, &site.config.source_directory)?;
            if !path.is_file() {
                warn!("missing document: {}", path.display());
                continue;
            }
            content::process(site, &path, &mut affected)?;
        }
    }
    debug!(
        "affected {} paths, {} tags",
        affected.paths.len(),
        affected.tags.len()
    );
    Ok(affected)
}

fn documents(site: &Site<'_>) -> Result<Vec<PathBuf>> {
    let root = &site.config.source_directory;
    if !root.is_dir() {
        warn!("no source directory at {}", root.display());
        return Ok(Vec::new());
    }

    let extension = site.config.extension.as_str();
    let mut out = Vec::new();
    for entry in sorted_walk(root) {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == extension) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Resolves `file` to an absolute, normalized path under `root`.
fn resolve(cwd: &Path, file: &Path, root: &Path) -> Result<PathBuf> {
    let path = normalize(&cwd.join(file));
    if path.starts_with(root) && path != root {
        Ok(path)
    } else {
        Err(Error::BoundaryViolation {
            path,
            root: root.to_owned(),
        })
    }
}
