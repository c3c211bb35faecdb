//! Exports the [`build_site`] function which stitches together the high-level
//! steps of a run: opening the build record ([`crate::cache`]), copying
//! static assets and processing documents ([`crate::walk`]), and regenerating
//! the listings, home page, and feed affected by those documents
//! ([`crate::aggregate`]).

use crate::aggregate;
use crate::cache::{self, Cache, Stats};
use crate::config::{self, Config};
use crate::feed;
use crate::metadata;
use crate::sync::Syncer;
use crate::template::{self, Templates};
use crate::walk;
use std::fmt;
use std::path::PathBuf;
use tracing::info;

/// Everything a build step needs, borrowed for the duration of a run.
pub struct Site<'a> {
    pub config: &'a Config,
    pub cache: &'a Cache,
    pub templates: &'a Templates,
    pub syncer: Syncer,
}

/// What a run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub affected_paths: usize,
    pub affected_tags: usize,
    pub stats: Stats,
}

/// Builds the site described by `config`. With an empty `files` list every
/// document under the source directory is considered; otherwise only the
/// named documents are.
///
/// The cache is opened here and closed before returning. On error it is
/// dropped (and thereby closed) while the error propagates.
pub fn build_site(config: &Config, files: &[PathBuf]) -> Result<Summary> {
    let cache = Cache::open(&config.cache_file, config.rebuild)?;
    if cache.created() {
        info!("created cache {}", cache.path().display());
    }
    let templates = Templates::load(&config.template_directory)?;

    let site = Site {
        config,
        cache: &cache,
        templates: &templates,
        syncer: Syncer::new(config.rebuild),
    };

    walk::copy_static(&site)?;

    // The whole document pass has to finish before aggregating, otherwise
    // listings would be built from a partial set.
    let affected = walk::process_documents(&site, files)?;
    aggregate::aggregate(&site, &affected)?;

    let stats = cache.stats()?;
    info!("cache: {}", stats);
    cache.close()?;

    Ok(Summary {
        affected_paths: affected.paths.len(),
        affected_tags: affected.tags.len(),
        stats,
    })
}

/// The result of a build step.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for building a site.
#[derive(Debug)]
pub enum Error {
    /// Returned for configuration problems.
    Config(config::Error),

    /// Returned for failures of the build record. Always fatal.
    Cache(cache::Error),

    /// Returned for malformed front matter.
    Metadata(metadata::Error),

    /// Returned for template loading and rendering errors.
    Template(template::Error),

    /// Returned for errors writing the feed.
    Feed(feed::Error),

    /// Returned when an explicitly named document lies outside the source
    /// directory.
    BoundaryViolation { path: PathBuf, root: PathBuf },

    /// Returned for WalkDir I/O errors.
    WalkDir(walkdir::Error),

    /// Returned for other I/O errors.
    Io(std::io::Error),

    /// An error with an annotation.
    Annotated(String, Box<Error>),
}

impl Error {
    /// Wraps the error with a description of what was being done.
    pub fn annotate<S: Into<String>>(self, annotation: S) -> Error {
        Error::Annotated(annotation.into(), Box::new(self))
    }
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(err) => err.fmt(f),
            Error::Cache(err) => err.fmt(f),
            Error::Metadata(err) => err.fmt(f),
            Error::Template(err) => err.fmt(f),
            Error::Feed(err) => err.fmt(f),
            Error::BoundaryViolation { path, root } => write!(
                f,
                "'{}' is outside of the source directory '{}'",
                path.display(),
                root.display()
            ),
            Error::WalkDir(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
            Error::Annotated(annotation, err) => write!(f, "{}: {}", annotation, err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::Cache(err) => Some(err),
            Error::Metadata(err) => Some(err),
            Error::Template(err) => Some(err),
            Error::Feed(err) => Some(err),
            Error::BoundaryViolation { .. } => None,
            Error::WalkDir(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Annotated(_, err) => Some(err),
        }
    }
}

impl From<config::Error> for Error {
    fn from(err: config::Error) -> Error {
        Error::Config(err)
    }
}

impl From<cache::Error> for Error {
    fn from(err: cache::Error) -> Error {
        Error::Cache(err)
    }
}

impl From<metadata::Error> for Error {
    fn from(err: metadata::Error) -> Error {
        Error::Metadata(err)
    }
}

impl From<template::Error> for Error {
    fn from(err: template::Error) -> Error {
        Error::Template(err)
    }
}

impl From<feed::Error> for Error {
    fn from(err: feed::Error) -> Error {
        Error::Feed(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts a [`walkdir::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator while walking directories.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
