//! Defines the [`Metadata`] and [`MetaValue`] types along with the codec for
//! the front-matter block at the top of a source document. The block is
//! fenced by lines consisting solely of `---` and holds a flat YAML mapping
//! whose values are either scalars or sequences of scalars:
//!
//! ```md
//! ---
//! title: Hello, world!
//! tags: [greet, misc]
//! ---
//! # Hello
//!
//! World
//! ```
//!
//! The same flat mapping format is used for the configuration file (see
//! [`crate::config`]).

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_yaml::Value as Yaml;
use std::fmt;

/// The fence line that opens and closes a front-matter block.
pub const FENCE: &str = "---";

/// A single front-matter value. Array-ness is explicit per key: `tags: foo`
/// is a [`MetaValue::Scalar`] while `tags: [foo]` is a [`MetaValue::Array`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaValue {
    Scalar(String),
    Array(Vec<String>),
}

impl MetaValue {
    /// Returns the scalar string, or `None` for arrays.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            MetaValue::Scalar(s) => Some(s),
            MetaValue::Array(_) => None,
        }
    }

    /// Returns the array items, or `None` for scalars.
    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            MetaValue::Scalar(_) => None,
            MetaValue::Array(items) => Some(items),
        }
    }

    /// Views the value as a list: arrays as-is, a non-empty scalar as a
    /// single-item list.
    pub fn to_list(&self) -> Vec<String> {
        match self {
            MetaValue::Scalar(s) if s.is_empty() => Vec::new(),
            MetaValue::Scalar(s) => vec![s.clone()],
            MetaValue::Array(items) => items.clone(),
        }
    }
}

impl Serialize for MetaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            MetaValue::Scalar(s) => serializer.serialize_str(s),
            MetaValue::Array(items) => items.serialize(serializer),
        }
    }
}

/// An ordered key/value map. Insertion order is preserved so that rewriting
/// a document's front matter doesn't shuffle the author's keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    fields: Vec<(String, MetaValue)>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns the value for `key` if it is a non-empty scalar.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(MetaValue::as_scalar)
            .filter(|s| !s.is_empty())
    }

    /// Returns the value for `key` viewed as a list (see [`MetaValue::to_list`]).
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key).map(MetaValue::to_list).unwrap_or_default()
    }

    /// Sets `key` to `value`, replacing an existing value in place or
    /// appending a new key at the end.
    pub fn set(&mut self, key: &str, value: MetaValue) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_owned(), value)),
        }
    }

    /// Sets `key` only if it isn't present yet.
    pub fn set_default(&mut self, key: &str, value: MetaValue) {
        if self.get(key).is_none() {
            self.fields.push((key.to_owned(), value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlays every field of `other` onto `self`.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.set(k, v.clone());
        }
    }

    /// Parses a YAML mapping. An empty (or whitespace-only) block yields
    /// empty metadata.
    pub fn parse(block: &str) -> Result<Metadata> {
        if block.trim().is_empty() {
            return Ok(Metadata::new());
        }

        let mapping = match serde_yaml::from_str::<Yaml>(block)? {
            Yaml::Mapping(mapping) => mapping,
            Yaml::Null => return Ok(Metadata::new()),
            _ => return Err(Error::NotAMapping),
        };

        let mut metadata = Metadata::new();
        for (key, value) in mapping {
            let key = scalar_to_string(&key).ok_or(Error::InvalidKey)?;
            let value = match &value {
                Yaml::Sequence(items) => MetaValue::Array(
                    items
                        .iter()
                        .map(|item| {
                            scalar_to_string(item).ok_or_else(|| Error::Unsupported(key.clone()))
                        })
                        .collect::<Result<Vec<String>>>()?,
                ),
                other => MetaValue::Scalar(
                    scalar_to_string(other).ok_or_else(|| Error::Unsupported(key.clone()))?,
                ),
            };
            metadata.set(&key, value);
        }
        Ok(metadata)
    }

    /// Serializes the metadata as a YAML mapping without document markers.
    pub fn serialize(&self) -> Result<String> {
        if self.is_empty() {
            return Ok(String::from("{}"));
        }
        let yaml = serde_yaml::to_string(self)?;
        let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);
        Ok(yaml.trim_end().to_owned())
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

fn scalar_to_string(value: &Yaml) -> Option<String> {
    match value {
        Yaml::Null => Some(String::new()),
        Yaml::Bool(b) => Some(b.to_string()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::String(s) => Some(s.clone()),
        Yaml::Sequence(_) | Yaml::Mapping(_) => None,
    }
}

/// A document split into its front matter and body.
#[derive(Debug, Default)]
pub struct Document<'a> {
    pub metadata: Metadata,
    pub body: &'a str,
}

/// Finds the front-matter block. Returns the byte ranges of the block
/// contents and the start of the body, or `None` if `input` doesn't begin
/// with a fence line or the closing fence is missing.
fn frontmatter_indices(input: &str) -> Option<(usize, usize, usize)> {
    let first_line_end = input.find('\n')?;
    if input[..first_line_end].trim_end_matches('\r') != FENCE {
        return None;
    }

    let block_start = first_line_end + 1;
    let mut offset = block_start;
    while offset <= input.len() {
        let line_end = input[offset..]
            .find('\n')
            .map(|i| offset + i)
            .unwrap_or_else(|| input.len());
        if input[offset..line_end].trim_end_matches('\r') == FENCE {
            let body_start = (line_end + 1).min(input.len());
            return Some((block_start, offset, body_start));
        }
        if line_end == input.len() {
            break;
        }
        offset = line_end + 1;
    }
    None
}

/// Splits raw document content into metadata and body. Content that doesn't
/// begin with a fenced block is all body.
pub fn split(input: &str) -> Result<Document<'_>> {
    match frontmatter_indices(input) {
        Some((block_start, block_stop, body_start)) => Ok(Document {
            metadata: Metadata::parse(&input[block_start..block_stop])?,
            body: &input[body_start..],
        }),
        None => Ok(Document {
            metadata: Metadata::new(),
            body: input,
        }),
    }
}

/// Joins metadata and body back into document content.
pub fn join(metadata: &Metadata, body: &str) -> Result<String> {
    let yaml = metadata.serialize()?;
    let mut out = String::with_capacity(yaml.len() + body.len() + 2 * FENCE.len() + 3);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&yaml);
    out.push('\n');
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(body);
    Ok(out)
}

/// The result of a metadata parse or serialize operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a problem decoding or encoding a metadata block.
#[derive(Debug)]
pub enum Error {
    /// Returned when the block isn't valid YAML.
    Yaml(serde_yaml::Error),

    /// Returned when the block is valid YAML but not a mapping.
    NotAMapping,

    /// Returned when a mapping key isn't a scalar.
    InvalidKey,

    /// Returned when a value is a nested mapping (or a sequence containing
    /// non-scalars). Holds the offending key.
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Yaml(err) => err.fmt(f),
            Error::NotAMapping => write!(f, "metadata block must be a mapping"),
            Error::InvalidKey => write!(f, "metadata keys must be scalars"),
            Error::Unsupported(key) => {
                write!(f, "metadata key `{}` must be a scalar or a list of scalars", key)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Yaml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    /// Converts a [`serde_yaml::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator for [`serde_yaml`] functions.
    fn from(err: serde_yaml::Error) -> Error {
        Error::Yaml(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_without_frontmatter() -> Result<()> {
        let doc = split("# Hi\nHello")?;
        assert!(doc.metadata.is_empty());
        assert_eq!("# Hi\nHello", doc.body);
        Ok(())
    }

    #[test]
    fn test_split_scalars_and_arrays() -> Result<()> {
        let doc = split("---\ntitle: Hello\ntags: [a, b]\ncount: 3\n---\nbody\n")?;
        assert_eq!(Some("Hello"), doc.metadata.scalar("title"));
        assert_eq!(
            Some(&MetaValue::Array(vec!["a".to_owned(), "b".to_owned()])),
            doc.metadata.get("tags")
        );
        assert_eq!(Some("3"), doc.metadata.scalar("count"));
        assert_eq!("body\n", doc.body);
        Ok(())
    }

    #[test]
    fn test_split_empty_mapping() -> Result<()> {
        let doc = split("---\n{}\n---\n# Hi\nHello")?;
        assert!(doc.metadata.is_empty());
        assert_eq!("# Hi\nHello", doc.body);
        Ok(())
    }

    #[test]
    fn test_split_missing_closing_fence_is_body() -> Result<()> {
        let doc = split("---\ntitle: x\nno end")?;
        assert!(doc.metadata.is_empty());
        assert_eq!("---\ntitle: x\nno end", doc.body);
        Ok(())
    }

    #[test]
    fn test_nested_mapping_rejected() {
        match split("---\nauthor:\n  name: x\n---\n") {
            Err(Error::Unsupported(key)) => assert_eq!("author", key),
            other => panic!("unexpected: {:?}", other.map(|d| d.metadata)),
        }
    }

    #[test]
    fn test_join_preserves_order_and_body() -> Result<()> {
        let doc = split("---\nzeta: 1\nalpha: [x]\n---\nthe body\n\n")?;
        let joined = join(&doc.metadata, doc.body)?;
        assert!(joined.starts_with("---\n"));
        assert!(joined.ends_with("\n---\nthe body\n\n"));
        assert!(joined.find("zeta").unwrap() < joined.find("alpha").unwrap());

        let again = split(&joined)?;
        assert_eq!(doc.metadata, again.metadata);
        assert_eq!(doc.body, again.body);
        Ok(())
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut m = Metadata::new();
        m.set("a", MetaValue::Scalar("1".to_owned()));
        m.set("b", MetaValue::Scalar("2".to_owned()));
        m.set("a", MetaValue::Scalar("3".to_owned()));
        m.set_default("b", MetaValue::Scalar("4".to_owned()));
        let keys: Vec<&str> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(vec!["a", "b"], keys);
        assert_eq!(Some("3"), m.scalar("a"));
        assert_eq!(Some("2"), m.scalar("b"));
    }

    #[test]
    fn test_list_views_scalar_as_single_item() {
        let mut m = Metadata::new();
        m.set("tags", MetaValue::Scalar("solo".to_owned()));
        assert_eq!(vec!["solo".to_owned()], m.list("tags"));
        assert!(m.list("missing").is_empty());
    }
}
