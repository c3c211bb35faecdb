//! Loads the site configuration. The configuration file (`kiln.yaml`) is a
//! flat mapping in the same format as document front matter. It is found by
//! searching the working directory and its ancestors, unless one is named
//! explicitly. Every value in the file, plus a handful of derived values, is
//! made available to every template.

use crate::metadata::{self, MetaValue, Metadata};
use crate::sync;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// The name of the configuration file searched for by
/// [`Config::from_directory`].
pub const CONFIG_FILE: &str = "kiln.yaml";

const DEFAULT_NUM_ENTRIES: usize = 5;
const DEFAULT_SHORT_SIZE: usize = 200;

/// Values given on the command line. They take precedence over the
/// configuration file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub static_directory: Option<PathBuf>,
    pub template_directory: Option<PathBuf>,
    pub rebuild: bool,
}

/// The resolved configuration for a run.
#[derive(Clone, Debug)]
pub struct Config {
    pub root_directory: PathBuf,
    pub cache_file: PathBuf,
    pub source_directory: PathBuf,
    pub destination_directory: PathBuf,
    pub static_directory: PathBuf,
    pub template_directory: PathBuf,

    /// The extension of content documents, without the dot.
    pub extension: String,

    /// Directories whose documents are always pages, in leading-slash form
    /// (`/` is the source root).
    pub page_directories: Vec<String>,

    /// The number of entries on the home page and in the feed.
    pub num_entries: usize,

    /// The offset after which an excerpt may be cut.
    pub short_size: usize,

    /// Ignore the cache and regenerate everything.
    pub rebuild: bool,

    /// The site URL prefix, always ending in a slash.
    pub base_url: String,

    /// The flat value map merged into every template's data.
    pub values: Metadata,
}

impl Config {
    /// Loads the configuration for a run started in `cwd`.
    pub fn load(cwd: &Path, overrides: &Overrides) -> Result<Config> {
        match &overrides.config_file {
            Some(path) => {
                let path = normalize(&cwd.join(path));
                if !path.is_file() {
                    return Err(Error::Missing(path));
                }
                Config::from_project_file(&path, cwd, overrides)
            }
            None => Config::from_directory(cwd, cwd, overrides),
        }
    }

    /// Searches `dir` and its ancestors for [`CONFIG_FILE`]. Falls back to
    /// defaults rooted at `cwd` if none is found.
    pub fn from_directory(dir: &Path, cwd: &Path, overrides: &Overrides) -> Result<Config> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Config::from_project_file(&path, cwd, overrides)
        } else {
            match dir.parent() {
                Some(parent) => Config::from_directory(parent, cwd, overrides),
                None => Config::resolve(Metadata::new(), cwd, cwd, overrides),
            }
        }
    }

    /// Loads the configuration from the file at `path`.
    pub fn from_project_file(path: &Path, cwd: &Path, overrides: &Overrides) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|err| Error::Read {
            path: path.to_owned(),
            err,
        })?;
        let values = Metadata::parse(&contents).map_err(|err| Error::Parse {
            path: path.to_owned(),
            err,
        })?;
        let project_dir = path.parent().unwrap_or(cwd);
        Config::resolve(values, project_dir, cwd, overrides)
    }

    /// Resolves directories and defaults. Relative `root` values in the file
    /// are relative to `project_dir`; other relative directories are
    /// relative to the root. Command-line paths are relative to `cwd`.
    pub fn resolve(mut values: Metadata, project_dir: &Path, cwd: &Path, overrides: &Overrides) -> Result<Config> {
        let root_directory = match &overrides.root {
            Some(root) => normalize(&cwd.join(root)),
            None => normalize(&project_dir.join(values.scalar("root").unwrap_or(""))),
        };

        let dir = |key: &str, flag: &Option<PathBuf>, default: &str| -> PathBuf {
            match flag {
                Some(path) => normalize(&cwd.join(path)),
                None => normalize(&root_directory.join(values.scalar(key).unwrap_or(default))),
            }
        };
        let cache_file = dir("cache", &overrides.cache, "cache.db");
        let source_directory = dir("source", &overrides.source, "content");
        let destination_directory = dir("destination", &overrides.destination, "public");
        let static_directory = dir("static", &overrides.static_directory, "static");
        let template_directory = dir("template", &overrides.template_directory, "template");

        let number = |key: &str, default: usize| -> Result<usize> {
            match values.scalar(key) {
                Some(s) => s.trim().parse().map_err(|_| Error::InvalidValue {
                    key: key.to_owned(),
                    value: s.to_owned(),
                }),
                None => Ok(default),
            }
        };
        let num_entries = number("num_entries", DEFAULT_NUM_ENTRIES)?;
        let short_size = number("short_size", DEFAULT_SHORT_SIZE)?;

        let extension = values
            .scalar("extension")
            .unwrap_or("md")
            .trim_start_matches('.')
            .to_owned();
        let page_directories = values
            .list("pages")
            .iter()
            .map(|dir| page_directory(dir))
            .collect();

        let mut base_url = values.scalar("base_url").unwrap_or("/").to_owned();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let scalar = |s: &str| MetaValue::Scalar(s.to_owned());
        let path_value = |p: &Path| MetaValue::Scalar(p.display().to_string());
        values.set_default("author", scalar("Unknown"));
        values.set_default("home_name", scalar("Home"));
        values.set_default("tags_name", scalar("Tags"));
        let title = values.scalar("home_name").unwrap_or("Home").to_owned();
        values.set_default("title", scalar(&title));
        values.set("base_url", scalar(&base_url));
        values.set("home_url", scalar(&base_url));
        values.set("tags_url", scalar(&format!("{}tags/", base_url)));
        values.set("now", scalar(&sync::now()));
        values.set("root", path_value(&root_directory));
        values.set("cache", path_value(&cache_file));
        values.set("source", path_value(&source_directory));
        values.set("destination", path_value(&destination_directory));
        values.set("static", path_value(&static_directory));
        values.set("template", path_value(&template_directory));

        Ok(Config {
            root_directory,
            cache_file,
            source_directory,
            destination_directory,
            static_directory,
            template_directory,
            extension,
            page_directories,
            num_entries,
            short_size,
            rebuild: overrides.rebuild,
            base_url,
            values,
        })
    }

    /// The URL prefix of tag listings.
    pub fn tags_url(&self) -> String {
        format!("{}tags/", self.base_url)
    }

    /// The run's timestamp.
    pub fn now(&self) -> &str {
        self.values.scalar("now").unwrap_or("")
    }

    /// A configuration value, if set.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.scalar(key)
    }

    /// Whether documents in `dir` (relative to the source root, `""` for the
    /// root itself) are always pages.
    pub fn is_page_directory(&self, dir: &str) -> bool {
        let dir = page_directory(dir);
        self.page_directories.iter().any(|d| *d == dir)
    }
}

/// Converts a directory into leading-slash form without a trailing slash,
/// so that `""`, `/`, and `./` all name the root.
fn page_directory(dir: &str) -> String {
    let trimmed = dir.trim().trim_start_matches("./").trim_matches('/');
    format!("/{}", trimmed)
}

/// Lexically normalizes a path: removes `.` components and folds `..` into
/// the preceding component. Doesn't touch the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push(component);
                }
            }
            _ => out.push(component),
        }
    }
    out
}

/// The result of loading a configuration.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a problem loading the configuration.
#[derive(Debug)]
pub enum Error {
    /// Returned when an explicitly named configuration file doesn't exist.
    Missing(PathBuf),

    /// Returned when the configuration file can't be read.
    Read { path: PathBuf, err: std::io::Error },

    /// Returned when the configuration file isn't a valid flat mapping.
    Parse { path: PathBuf, err: metadata::Error },

    /// Returned when a numeric setting doesn't parse.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Missing(path) => {
                write!(f, "Configuration file '{}' does not exist", path.display())
            }
            Error::Read { path, err } => {
                write!(f, "Reading configuration file '{}': {}", path.display(), err)
            }
            Error::Parse { path, err } => {
                write!(f, "Parsing configuration file '{}': {}", path.display(), err)
            }
            Error::InvalidValue { key, value } => {
                write!(f, "Invalid value for `{}`: '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Missing(_) => None,
            Error::Read { path: _, err } => Some(err),
            Error::Parse { path: _, err } => Some(err),
            Error::InvalidValue { .. } => None,
        }
    }
}
