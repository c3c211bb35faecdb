//! Converts a document body from markdown to HTML while collecting what the
//! build needs to know about it: the first level-1 heading (the inferred
//! title), local files referenced by links and images (attachments), and
//! named code blocks (source fragments).
//!
//! A code block is named by appending `:NAME` to its language, e.g.
//! ` ```rust:src/main.rs `. Named blocks are written next to the rendered
//! document as standalone files.

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag};

/// The result of parsing a document body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    /// The rendered HTML.
    pub html: String,

    /// The text of the first level-1 heading, if any.
    pub title: Option<String>,

    /// The slugified title, if a title was found.
    pub slug: Option<String>,

    /// Local files referenced by links and images, in order of appearance.
    pub files: Vec<String>,

    /// Named code blocks as `(name, contents)` pairs.
    pub fragments: Vec<(String, String)>,
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Renders markdown to HTML without collecting anything.
pub fn to_html(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(markdown, options()));
    out
}

/// Renders `markdown` and collects its title, attachments, and fragments.
pub fn parse(markdown: &str) -> Parsed {
    let mut collector = Collector::default();
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(
        &mut out,
        Parser::new_ext(markdown, options()).inspect(|ev| collector.on_event(ev)),
    );

    let title = collector.title.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty());
    Parsed {
        html: out,
        slug: title.as_deref().map(slug::slugify).filter(|s| !s.is_empty()),
        title,
        files: collector.files,
        fragments: collector.fragments,
    }
}

#[derive(Default)]
struct Collector {
    title: Option<String>,
    in_title: bool,
    fragment: Option<(String, String)>,
    files: Vec<String>,
    fragments: Vec<(String, String)>,
}

impl Collector {
    fn on_event(&mut self, ev: &Event<'_>) {
        match ev {
            Event::Start(Tag::Heading(1)) if self.title.is_none() => {
                self.in_title = true;
                self.title = Some(String::new());
            }
            Event::End(Tag::Heading(1)) if self.in_title => self.in_title = false,
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                self.fragment = fragment_name(info).map(|name| (name, String::new()));
            }
            Event::End(Tag::CodeBlock(_)) => {
                if let Some(fragment) = self.fragment.take() {
                    self.fragments.push(fragment);
                }
            }
            Event::Start(Tag::Link(_, dest, _)) | Event::Start(Tag::Image(_, dest, _)) => {
                if let Some(file) = local_file(dest) {
                    self.files.push(file);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, contents)) = &mut self.fragment {
                    contents.push_str(text);
                } else if self.in_title {
                    if let Some(title) = &mut self.title {
                        title.push_str(text);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Extracts `NAME` from a `lang:NAME` info string.
fn fragment_name(info: &CowStr<'_>) -> Option<String> {
    let first = info.split_whitespace().next()?;
    let (_, name) = split_once(first, ':')?;
    if is_safe_relative(name) {
        Some(name.to_owned())
    } else {
        None
    }
}

/// Returns the file a link destination refers to if it is a local,
/// relative, non-document reference.
fn local_file(dest: &str) -> Option<String> {
    let end = dest.find(|c| c == '#' || c == '?').unwrap_or_else(|| dest.len());
    let path = &dest[..end];
    if path.is_empty() || has_scheme(path) || path.ends_with(".md") {
        return None;
    }
    let path = path.strip_prefix("./").unwrap_or(path);
    if is_safe_relative(path) {
        Some(path.to_owned())
    } else {
        None
    }
}

fn has_scheme(url: &str) -> bool {
    match url.find(':') {
        Some(colon) => !url[..colon].contains('/'),
        None => false,
    }
}

pub(crate) fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.starts_with('\\')
        && path.split('/').all(|part| part != "..")
}

fn split_once(s: &str, sep: char) -> Option<(&str, &str)> {
    let i = s.find(sep)?;
    Some((&s[..i], &s[i + sep.len_utf8()..]))
}
