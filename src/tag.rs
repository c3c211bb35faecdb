//! Defines the [`Tag`] type, a tag name paired with the URL of its listing
//! page, as handed to templates for tag cross-links.

use gtmpl::Value;
use std::collections::HashMap;

/// Represents a document tag. Tag names are case-sensitive and are used
/// verbatim as the listing directory name (`{tags_url}{name}/`).
#[derive(Clone, Debug)]
pub struct Tag {
    /// The tag's name.
    pub name: String,

    /// The URL for the tag's listing page.
    pub url: String,
}

impl Tag {
    /// Creates a tag whose listing lives under `tags_url`, which should end
    /// in a slash.
    pub fn new(name: &str, tags_url: &str) -> Tag {
        Tag {
            name: name.to_owned(),
            url: format!("{}{}/", tags_url, name),
        }
    }

    /// Converts a list of tag names into template values.
    pub fn values<S: AsRef<str>>(names: &[S], tags_url: &str) -> Vec<Value> {
        names
            .iter()
            .map(|name| Value::from(&Tag::new(name.as_ref(), tags_url)))
            .collect()
    }
}

impl From<&Tag> for Value {
    /// Converts [`Tag`]s into [`Value`]s for templating.
    fn from(t: &Tag) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("name".to_owned(), Value::String(t.name.clone()));
        m.insert("url".to_owned(), Value::String(t.url.clone()));
        Value::Object(m)
    }
}
