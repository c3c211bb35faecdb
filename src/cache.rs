//! The persistent build record. A [`Cache`] is a SQLite database holding
//! four record kinds that survive across runs:
//!
//! * `paths`: hierarchical directory-like names (`blog/2024`), the empty
//!   name being the root,
//! * `tags`: free-text, case-sensitive labels,
//! * `entries`: one row per produced output file, unique by
//!   `(path, slug, file)`,
//! * `tagged_entries`: the many-to-many link between tags and entries.
//!
//! Paths and tags have get-or-create semantics and are never deleted, so
//! their identifiers are stable across runs. Entries are upserted, which is
//! what lets repeated runs converge instead of accumulating duplicates.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, CachedStatement, Connection, Row};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS paths (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS tags (
      id INTEGER PRIMARY KEY,
      name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS entries (
      id INTEGER PRIMARY KEY,
      kind INTEGER NOT NULL,
      source TEXT NOT NULL,
      path INTEGER NOT NULL REFERENCES paths(id),
      slug TEXT NOT NULL DEFAULT '',
      file TEXT NOT NULL,
      title TEXT,
      created TEXT NOT NULL,
      updated TEXT,
      UNIQUE (path, slug, file)
    );

    CREATE TABLE IF NOT EXISTS tagged_entries (
      tag INTEGER NOT NULL REFERENCES tags(id),
      entry INTEGER NOT NULL REFERENCES entries(id),
      PRIMARY KEY (tag, entry)
    );

    CREATE INDEX IF NOT EXISTS idx_entries_kind_created ON entries(kind, created);
    CREATE INDEX IF NOT EXISTS idx_tagged_entries_entry ON tagged_entries(entry);
"#;

/// Identifies a row in one of the cache tables.
pub type Id = i64;

/// The kind of output an entry describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// A file copied from the static directory.
    Static = 0,
    /// A rendered document classified as a page.
    Page = 1,
    /// A rendered document classified as an entry (shows up in listings).
    Entry = 2,
    /// A named code block extracted from a document.
    Source = 3,
    /// An attachment copied next to a rendered document.
    File = 4,
    /// A generated directory or tag listing.
    Listing = 5,
    /// The generated home page.
    HomeIndex = 6,
    /// The generated feed.
    Feed = 7,
}

impl Kind {
    fn from_i64(value: i64) -> Option<Kind> {
        Some(match value {
            0 => Kind::Static,
            1 => Kind::Page,
            2 => Kind::Entry,
            3 => Kind::Source,
            4 => Kind::File,
            5 => Kind::Listing,
            6 => Kind::HomeIndex,
            7 => Kind::Feed,
            _ => return None,
        })
    }
}

/// An entry to be written with [`Cache::add_entry`].
#[derive(Clone, Debug)]
pub struct EntryRecord {
    pub kind: Kind,
    /// The originating source, relative to the source directory. Empty for
    /// generated outputs.
    pub source: String,
    /// The containing path's id.
    pub path: Id,
    pub slug: Option<String>,
    pub file: String,
    pub title: Option<String>,
    /// The timestamp of the write that produced the output.
    pub datetime: String,
    /// Whether the write overwrote an existing output. Updates only touch
    /// the `updated` column; `created` keeps its first value.
    pub is_update: bool,
}

impl EntryRecord {
    pub fn new(kind: Kind, path: Id, file: &str, datetime: &str, is_update: bool) -> EntryRecord {
        EntryRecord {
            kind,
            source: String::new(),
            path,
            slug: None,
            file: file.to_owned(),
            title: None,
            datetime: datetime.to_owned(),
            is_update,
        }
    }

    pub fn source(mut self, source: &str) -> EntryRecord {
        self.source = source.to_owned();
        self
    }

    pub fn slug(mut self, slug: &str) -> EntryRecord {
        self.slug = Some(slug.to_owned()).filter(|s| !s.is_empty());
        self
    }

    pub fn title(mut self, title: &str) -> EntryRecord {
        self.title = Some(title.to_owned());
        self
    }
}

/// An entry as read back from the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryRow {
    pub id: Id,
    pub kind: Kind,
    pub source: String,
    /// The containing path's name.
    pub path: String,
    pub slug: String,
    pub file: String,
    pub title: Option<String>,
    pub created: String,
    pub updated: Option<String>,
}

impl EntryRow {
    /// The most recent of `updated` and `created`.
    pub fn date(&self) -> &str {
        self.updated.as_deref().unwrap_or(&self.created)
    }

    /// The output location relative to the destination root's URL, in
    /// directory form for `index.html` files (`blog/hi/`).
    pub fn url_path(&self) -> String {
        let mut url = String::new();
        for part in [self.path.as_str(), self.slug.as_str()].iter() {
            if !part.is_empty() {
                url.push_str(part);
                url.push('/');
            }
        }
        if self.file != "index.html" {
            url.push_str(&self.file);
        }
        url
    }
}

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    let kind: i64 = row.get(1)?;
    Ok(EntryRow {
        id: row.get(0)?,
        kind: Kind::from_i64(kind).ok_or(rusqlite::Error::IntegralValueOutOfRange(1, kind))?,
        source: row.get(2)?,
        path: row.get(3)?,
        slug: row.get(4)?,
        file: row.get(5)?,
        title: row.get(6)?,
        created: row.get(7)?,
        updated: row.get(8)?,
    })
}

fn read_name(row: &Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

fn read_tag(row: &Row<'_>) -> rusqlite::Result<(Id, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

const ENTRY_COLUMNS: &str = "e.id, e.kind, e.source, p.name, e.slug, e.file, e.title, e.created, e.updated";

/// A prepared read query. Each call to [`Query::rows`] re-runs the
/// statement and yields its rows lazily; no cursor outlives the iterator.
pub struct Query<'c, T> {
    stmt: CachedStatement<'c>,
    params: Vec<SqlValue>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
}

impl<'c, T> Query<'c, T> {
    pub fn rows(&mut self) -> Result<impl Iterator<Item = Result<T>> + '_> {
        let rows = self
            .stmt
            .query_map(params_from_iter(self.params.iter()), self.map)?;
        Ok(rows.map(lift_row::<T>))
    }

    /// Runs the query and collects every row.
    pub fn collect(&mut self) -> Result<Vec<T>> {
        self.rows()?.collect()
    }
}

fn lift_row<T>(row: rusqlite::Result<T>) -> Result<T> {
    row.map_err(Error::from)
}

/// Row counts per record kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub paths: i64,
    pub tags: i64,
    pub entries: i64,
    pub tagged_entries: i64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} paths, {} tags, {} entries, {} tag links",
            self.paths, self.tags, self.entries, self.tagged_entries
        )
    }
}

/// The build record. The connection is closed when the cache is dropped.
#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    conn: Connection,
    created: bool,
}

impl Cache {
    /// Opens the cache at `path`, creating the file and schema if needed.
    /// With `rebuild` set an existing file is deleted first.
    pub fn open(path: &Path, rebuild: bool) -> Result<Cache> {
        if rebuild {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(Error::Io(err)),
            }
        }
        let created = !path.exists();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Cache {
            path: path.to_owned(),
            conn,
            created,
        })
    }

    /// Opens a throwaway in-memory cache.
    pub fn in_memory() -> Result<Cache> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Cache {
            path: PathBuf::new(),
            conn,
            created: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the schema was created by this open (empty cache).
    pub fn created(&self) -> bool {
        self.created
    }

    /// Closes the connection, reporting any error the implicit close on
    /// drop would swallow.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| Error::Sql(err))
    }

    fn get_id(&self, insert: &str, select: &str, name: &str) -> Result<Id> {
        self.conn.prepare_cached(insert)?.execute(params![name])?;
        Ok(self
            .conn
            .prepare_cached(select)?
            .query_row(params![name], |row| row.get(0))?)
    }

    /// Returns the id of the path `name`, creating it if needed.
    pub fn path_id(&self, name: &str) -> Result<Id> {
        self.get_id(
            "INSERT OR IGNORE INTO paths(name) VALUES (?1)",
            "SELECT id FROM paths WHERE name = ?1",
            name,
        )
    }

    /// Returns the id of the tag `name`, creating it if needed.
    pub fn tag_id(&self, name: &str) -> Result<Id> {
        self.get_id(
            "INSERT OR IGNORE INTO tags(name) VALUES (?1)",
            "SELECT id FROM tags WHERE name = ?1",
            name,
        )
    }

    /// Inserts an entry, or updates `kind`, `source`, `title` and `updated`
    /// of the existing entry with the same `(path, slug, file)`. Returns the
    /// entry's id.
    pub fn add_entry(&self, entry: &EntryRecord) -> Result<Id> {
        let updated = if entry.is_update {
            Some(entry.datetime.as_str())
        } else {
            None
        };
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO entries(kind, source, path, slug, file, title, created)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(path, slug, file) DO UPDATE
              SET kind = ?1, source = ?2, title = ?6, updated = ?8
            RETURNING id
            "#,
        )?;
        Ok(stmt.query_row(
            params![
                entry.kind as i64,
                entry.source,
                entry.path,
                entry.slug.as_deref().unwrap_or(""),
                entry.file,
                entry.title,
                entry.datetime,
                updated,
            ],
            |row| row.get(0),
        )?)
    }

    /// Links the tag `name` (created if needed) to `entry`. Linking twice is
    /// a no-op.
    pub fn add_tag(&self, entry: Id, name: &str) -> Result<()> {
        let tag = self.tag_id(name)?;
        self.conn
            .prepare_cached("INSERT OR IGNORE INTO tagged_entries(tag, entry) VALUES (?1, ?2)")?
            .execute(params![tag, entry])?;
        Ok(())
    }

    /// The page, entry and fragment rows produced from `source` that no
    /// longer live under `(path, slug)`.
    pub fn superseded_entries(&self, source: &str, path: Id, slug: &str) -> Result<Query<'_, EntryRow>> {
        self.query(
            &format!(
                "SELECT {} FROM entries e JOIN paths p ON p.id = e.path
                 WHERE e.source = ?1 AND e.kind IN (?4, ?5, ?6)
                   AND NOT (e.path = ?2 AND e.slug = ?3)",
                ENTRY_COLUMNS
            ),
            vec![
                SqlValue::Text(source.to_owned()),
                SqlValue::Integer(path),
                SqlValue::Text(slug.to_owned()),
                SqlValue::Integer(Kind::Page as i64),
                SqlValue::Integer(Kind::Entry as i64),
                SqlValue::Integer(Kind::Source as i64),
            ],
            read_entry_row,
        )
    }

    /// Deletes an entry and its tag links.
    pub fn remove_entry(&self, entry: Id) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM tagged_entries WHERE entry = ?1")?
            .execute(params![entry])?;
        self.conn
            .prepare_cached("DELETE FROM entries WHERE id = ?1")?
            .execute(params![entry])?;
        Ok(())
    }

    fn query<T>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Query<'_, T>> {
        Ok(Query {
            stmt: self.conn.prepare_cached(sql)?,
            params,
            map,
        })
    }

    /// The `limit` most recent entries of `kind`, newest first by
    /// `coalesce(updated, created)`.
    pub fn most_recent_entries(&self, kind: Kind, limit: usize) -> Result<Query<'_, EntryRow>> {
        self.query(
            &format!(
                "SELECT {} FROM entries e JOIN paths p ON p.id = e.path
                 WHERE e.kind = ?1
                 ORDER BY coalesce(e.updated, e.created) DESC, e.id DESC
                 LIMIT ?2",
                ENTRY_COLUMNS
            ),
            vec![SqlValue::Integer(kind as i64), SqlValue::Integer(limit as i64)],
            read_entry_row,
        )
    }

    /// The names of the paths exactly one level below `path`, in descending
    /// order.
    pub fn subpaths_of(&self, path: Id) -> Result<Query<'_, String>> {
        self.query(
            r#"
            SELECT c.name FROM paths p JOIN paths c
              ON CASE WHEN p.name = ''
                   THEN c.name <> '' AND instr(c.name, '/') = 0
                   ELSE substr(c.name, 1, length(p.name) + 1) = p.name || '/'
                     AND length(c.name) > length(p.name) + 1
                     AND instr(substr(c.name, length(p.name) + 2), '/') = 0
                 END
            WHERE p.id = ?1
            ORDER BY c.name DESC
            "#,
            vec![SqlValue::Integer(path)],
            read_name,
        )
    }

    /// The entries of `kind` directly under `path`, newest first.
    pub fn entries_under_path(&self, path: Id, kind: Kind) -> Result<Query<'_, EntryRow>> {
        self.query(
            &format!(
                "SELECT {} FROM entries e JOIN paths p ON p.id = e.path
                 WHERE e.path = ?1 AND e.kind = ?2
                 ORDER BY e.created DESC, e.id DESC",
                ENTRY_COLUMNS
            ),
            vec![SqlValue::Integer(path), SqlValue::Integer(kind as i64)],
            read_entry_row,
        )
    }

    /// The entries of `kind` linked to `tag`, newest first.
    pub fn entries_for_tag(&self, tag: Id, kind: Kind) -> Result<Query<'_, EntryRow>> {
        self.query(
            &format!(
                "SELECT {} FROM entries e
                 JOIN paths p ON p.id = e.path
                 JOIN tagged_entries t ON t.entry = e.id
                 WHERE t.tag = ?1 AND e.kind = ?2
                 ORDER BY e.created DESC, e.id DESC",
                ENTRY_COLUMNS
            ),
            vec![SqlValue::Integer(tag), SqlValue::Integer(kind as i64)],
            read_entry_row,
        )
    }

    /// Every known tag as `(id, name)`, by ascending name.
    pub fn all_tags(&self) -> Result<Query<'_, (Id, String)>> {
        self.query("SELECT id, name FROM tags ORDER BY name ASC", Vec::new(), read_tag)
    }

    /// The names of the tags linked to `entry` in ascending order.
    pub fn tags_for_entry(&self, entry: Id) -> Result<Query<'_, String>> {
        self.query(
            "SELECT t.name FROM tags t JOIN tagged_entries te ON te.tag = t.id
             WHERE te.entry = ?1
             ORDER BY t.name ASC",
            vec![SqlValue::Integer(entry)],
            read_name,
        )
    }

    pub fn stats(&self) -> Result<Stats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT count(*) FROM {}", table), [], |row| row.get(0))?)
        };
        Ok(Stats {
            paths: count("paths")?,
            tags: count("tags")?,
            entries: count("entries")?,
            tagged_entries: count("tagged_entries")?,
        })
    }
}

/// The result of a cache operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure of the build record. These are never recovered
/// from: once a write fails, later staleness decisions can't be trusted.
#[derive(Debug)]
pub enum Error {
    /// Returned for SQLite errors (open, schema, prepare, bind, step).
    Sql(rusqlite::Error),

    /// Returned for I/O errors managing the cache file.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Sql(err) => write!(f, "sqlite: {}", err),
            Error::Io(err) => write!(f, "cache file: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sql(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::Sql(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
