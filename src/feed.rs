//! Support for creating Atom feeds from the most recent entries.

use atom_syndication::{Content, Entry, Error as AtomError, Feed, Link, Person};
use chrono::{DateTime, FixedOffset, ParseError};
use std::fmt;
use std::io::Write;

/// Bundled configuration for creating a feed.
pub struct FeedConfig {
    pub title: String,
    pub id: String,
    pub author: Option<String>,
    pub home_page: String,
    /// The feed's `updated` timestamp (RFC 3339).
    pub updated: String,
}

/// One feed entry.
#[derive(Clone, Debug)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// The excerpt, as HTML.
    pub excerpt: String,
    pub id: String,
}

/// Creates a feed from some configuration ([`FeedConfig`]) and a list of
/// [`FeedEntry`]s and writes the result to a [`std::io::Write`].
pub fn write_feed<W: Write>(config: FeedConfig, entries: &[FeedEntry], w: W) -> Result<()> {
    feed(config, entries)?.write_to(w)?;
    Ok(())
}

/// Renders the feed into a byte buffer.
pub fn render_feed(config: FeedConfig, entries: &[FeedEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_feed(config, entries, &mut out)?;
    Ok(out)
}

fn parse_timestamp(timestamp: &str) -> std::result::Result<DateTime<FixedOffset>, ParseError> {
    DateTime::parse_from_rfc3339(timestamp)
}

fn feed(config: FeedConfig, entries: &[FeedEntry]) -> Result<Feed> {
    let mut feed = Feed::default();
    feed.set_entries(feed_entries(&config, entries)?);
    feed.set_title(config.title);
    feed.set_id(config.id);
    feed.set_updated(parse_timestamp(&config.updated)?);
    feed.set_authors(author_to_people(config.author));
    feed.set_links(vec![alternate(config.home_page)]);
    Ok(feed)
}

fn feed_entries(config: &FeedConfig, entries: &[FeedEntry]) -> Result<Vec<Entry>> {
    let mut out: Vec<Entry> = Vec::with_capacity(entries.len());

    for entry in entries {
        let date = parse_timestamp(&entry.timestamp)?;

        let mut content = Content::default();
        content.set_content_type(Some("html".to_owned()));
        content.set_value(Some(entry.excerpt.clone()));

        let mut e = Entry::default();
        e.set_id(entry.id.clone());
        e.set_title(entry.title.clone());
        e.set_updated(date);
        e.set_published(Some(date));
        e.set_authors(author_to_people(config.author.clone()));
        e.set_links(vec![alternate(entry.url.clone())]);
        e.set_content(Some(content));
        out.push(e);
    }
    Ok(out)
}

fn alternate(href: String) -> Link {
    let mut link = Link::default();
    link.set_href(href);
    link.set_rel("alternate".to_owned());
    link
}

fn author_to_people(author: Option<String>) -> Vec<Person> {
    match author {
        Some(name) => {
            let mut person = Person::default();
            person.set_name(name);
            vec![person]
        }
        None => Vec::new(),
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed. Variants include I/O, Atom, and
/// date-time parsing issues.
#[derive(Debug)]
pub enum Error {
    /// Returned when there is a generic I/O error.
    Io(std::io::Error),

    /// Returned when there is an Atom-related error.
    Atom(AtomError),

    /// Returned when there is an issue parsing an entry's timestamp.
    DateTimeParse(ParseError),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => err.fmt(f),
            Error::Atom(err) => err.fmt(f),
            Error::DateTimeParse(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Atom(err) => Some(err),
            Error::DateTimeParse(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator in fallible feed operations.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<AtomError> for Error {
    /// Converts [`AtomError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: AtomError) -> Error {
        Error::Atom(err)
    }
}

impl From<ParseError> for Error {
    /// Converts [`ParseError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: ParseError) -> Error {
        Error::DateTimeParse(err)
    }
}
