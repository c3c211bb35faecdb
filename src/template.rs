//! Loads and applies the site's templates. Templates use Go's text/template
//! syntax (via [`gtmpl`]) and live in the template directory as
//! `<name>.html`. An optional `base.html` is prepended to every template so
//! that shared `{{define}}` blocks can be reused.

use crate::metadata::{MetaValue, Metadata};
use gtmpl::{Context, Template, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The template for documents classified as pages.
pub const PAGE: &str = "page";
/// The template for documents classified as entries.
pub const ENTRY: &str = "entry";
/// The template for per-directory listings.
pub const LIST: &str = "list";
/// The template for the global tag index.
pub const TAGS: &str = "tags";
/// The template for a single tag's listing.
pub const TAG: &str = "tag";
/// The template for the home page.
pub const INDEX: &str = "index";

const NAMES: [&str; 6] = [PAGE, ENTRY, LIST, TAGS, TAG, INDEX];
const BASE: &str = "base.html";

/// The parsed templates, keyed by name. Templates whose file doesn't exist
/// are simply absent; rendering them is an error.
pub struct Templates {
    templates: HashMap<&'static str, Template>,
}

impl Templates {
    /// Loads every known template from `dir`.
    pub fn load(dir: &Path) -> Result<Templates> {
        let base = dir.join(BASE);
        let mut templates = HashMap::new();
        for name in NAMES.iter() {
            let path = dir.join(format!("{}.html", name));
            if !path.is_file() {
                continue;
            }
            let files = if base.is_file() {
                vec![base.clone(), path]
            } else {
                vec![path]
            };
            templates.insert(*name, parse_template(files.iter())?);
        }
        Ok(Templates { templates })
    }

    /// Builds a set of templates from in-memory sources.
    pub fn from_sources<'a>(sources: impl IntoIterator<Item = (&'static str, &'a str)>) -> Result<Templates> {
        let mut templates = HashMap::new();
        for (name, source) in sources {
            let mut template = Template::default();
            template.parse(source).map_err(Error::Parse)?;
            templates.insert(name, template);
        }
        Ok(Templates { templates })
    }

    /// Applies the template `name` to `data`.
    pub fn render(&self, name: &str, data: Value) -> Result<Vec<u8>> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| Error::Missing(name.to_owned()))?;
        let context = Context::from(data).map_err(Error::Execute)?;
        let mut out = Vec::new();
        template.execute(&mut out, &context).map_err(Error::Execute)?;
        Ok(out)
    }
}

// Loads the template file contents, concatenates them, and parses the result
// into a template.
fn parse_template<P: AsRef<Path>>(template_files: impl Iterator<Item = P>) -> Result<Template> {
    let mut contents = String::new();
    for template_file in template_files {
        use std::io::Read;
        let template_file = template_file.as_ref();
        File::open(&template_file)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|e| Error::Open {
                path: template_file.to_owned(),
                err: e,
            })?;
        contents.push(' ');
    }

    let mut template = Template::default();
    template.parse(&contents).map_err(Error::Parse)?;
    Ok(template)
}

/// Template data under construction: a flat object of named values.
#[derive(Clone, Debug, Default)]
pub struct Data(HashMap<String, Value>);

impl Data {
    pub fn new() -> Data {
        Data::default()
    }

    /// Starts from every field in `metadata`.
    pub fn from_metadata(metadata: &Metadata) -> Data {
        let mut data = Data::new();
        data.merge(metadata);
        data
    }

    /// Overlays every field in `metadata`.
    pub fn merge(&mut self, metadata: &Metadata) {
        for (key, value) in metadata.iter() {
            self.0.insert(key.to_owned(), meta_to_value(value));
        }
    }

    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) -> &mut Data {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    pub fn set_str(&mut self, key: &str, value: &str) -> &mut Data {
        self.set(key, Value::String(value.to_owned()))
    }

    pub fn set_list(&mut self, key: &str, items: Vec<Value>) -> &mut Data {
        self.set(key, Value::Array(items))
    }
}

impl From<Data> for Value {
    fn from(data: Data) -> Value {
        Value::Object(data.0)
    }
}

fn meta_to_value(value: &MetaValue) -> Value {
    match value {
        MetaValue::Scalar(s) => Value::String(s.clone()),
        MetaValue::Array(items) => Value::Array(items.iter().map(|s| Value::String(s.clone())).collect()),
    }
}

/// The result of a template operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a problem loading or applying a template.
#[derive(Debug)]
pub enum Error {
    /// Returned for I/O problems while opening template files.
    Open { path: PathBuf, err: std::io::Error },

    /// Returned for errors parsing template files.
    Parse(String),

    /// Returned for errors applying a template.
    Execute(String),

    /// Returned when rendering a template whose file wasn't found.
    Missing(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Open { path, err } => {
                write!(f, "Opening template file '{}': {}", path.display(), err)
            }
            Error::Parse(err) => write!(f, "Parsing template: {}", err),
            Error::Execute(err) => write!(f, "Executing template: {}", err),
            Error::Missing(name) => write!(f, "Missing template '{}.html'", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Open { path: _, err } => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_render_nested_blocks() -> Result<()> {
        let templates = Templates::from_sources(vec![(
            ENTRY,
            "{{.title}}:{{range .tags}}[{{.name}}={{.url}}]{{end}}",
        )])?;

        let mut tag = Data::new();
        tag.set_str("name", "rust").set_str("url", "/tags/rust/");
        let mut data = Data::new();
        data.set_str("title", "Hi").set_list("tags", vec![tag.into()]);

        let out = templates.render(ENTRY, data.into())?;
        assert_eq!("Hi:[rust=/tags/rust/]", String::from_utf8_lossy(&out));
        Ok(())
    }

    #[test]
    fn test_metadata_merge() -> Result<()> {
        let templates = Templates::from_sources(vec![(PAGE, "{{.author}} {{range .files}}{{.}};{{end}}")])?;
        let mut metadata = Metadata::new();
        metadata.set("author", MetaValue::Scalar("me".to_owned()));
        metadata.set("files", MetaValue::Array(vec!["a.png".to_owned(), "b.png".to_owned()]));

        let out = templates.render(PAGE, Data::from_metadata(&metadata).into())?;
        assert_eq!("me a.png;b.png;", String::from_utf8_lossy(&out));
        Ok(())
    }

    #[test]
    fn test_missing_template() {
        let templates = Templates::from_sources(Vec::new()).unwrap();
        match templates.render(TAG, Data::new().into()) {
            Err(Error::Missing(name)) => assert_eq!("tag", name),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_load_prepends_base() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("base.html"), r#"{{define "head"}}<h>{{.title}}</h>{{end}}"#)?;
        fs::write(dir.path().join("list.html"), r#"{{template "head" .}}body"#)?;

        let templates = Templates::load(dir.path())?;
        let mut data = Data::new();
        data.set_str("title", "T");
        let out = templates.render(LIST, data.into())?;
        assert_eq!("<h>T</h>body", String::from_utf8_lossy(&out).trim());
        assert!(templates.render(PAGE, Data::new().into()).is_err());
        Ok(())
    }
}
