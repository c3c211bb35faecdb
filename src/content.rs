//! Processes a single content document: completes its front matter, renders
//! it through the page or entry template, writes any named code fragments and
//! copies its attachments, recording every output in the cache.

use crate::build::{Result, Site};
use crate::cache::{EntryRecord, Id, Kind};
use crate::markdown::{self, Parsed};
use crate::metadata::{self, MetaValue, Metadata};
use crate::sync;
use crate::tag::Tag;
use crate::template::{Data, ENTRY, PAGE};
use crate::walk::Affected;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.html";

/// Processes the document at `path`, which must lie under the source
/// directory. Entry outputs add their ancestor directories and their tags to
/// `affected`.
pub fn process(site: &Site<'_>, path: &Path, affected: &mut Affected) -> Result<()> {
    process_document(site, path, affected)
        .map_err(|err| err.annotate(format!("Processing '{}'", path.display())))
}

fn process_document(site: &Site<'_>, path: &Path, affected: &mut Affected) -> Result<()> {
    let config = site.config;
    let relative = relative_path(path, &config.source_directory);
    let dir = parent_of(&relative);

    let raw = fs::read_to_string(path)?;
    let document = metadata::split(&raw)?;
    let mut meta = document.metadata;
    let body = document.body;

    let is_page = meta.scalar("type") == Some("page") || config.is_page_directory(dir);
    let parsed = markdown::parse(body);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let title = title_of(&meta, &parsed, &stem);
    let slug = slug_of(&meta, &parsed, &title, &stem);
    debug!("{}: title '{}', slug '{}'", relative, title, slug);

    let mtime = sync::mtime(path)?;
    let timestamp = sync::timestamp(mtime);
    let created = meta.scalar("created").map(str::to_owned);
    match created {
        None => meta.set("created", MetaValue::Scalar(timestamp)),
        Some(created) if created != timestamp => meta.set("updated", MetaValue::Scalar(timestamp)),
        Some(_) => {}
    }
    merge_files(&mut meta, &parsed.files);

    fs::write(path, metadata::join(&meta, body)?)?;
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime))?;

    let base = join_path(dir, &slug);
    let tags = unique(meta.list("tags"));
    let tags_url = config.tags_url();

    let mut data = Data::from_metadata(&config.values);
    data.merge(&meta);
    data.set_str("title", &title)
        .set_str("slug", &slug)
        .set_str("path", dir)
        .set_str("source", &relative)
        .set_str("url", &format!("{}{}/", config.base_url, base))
        .set_str("content", &parsed.html)
        .set_list("tags", Tag::values(&tags, &tags_url));
    let html = site
        .templates
        .render(if is_page { PAGE } else { ENTRY }, data.into())?;

    let output_dir = config.destination_directory.join(&base);
    let synced = site.syncer.write(
        &join_path(&base, INDEX_FILE),
        &html,
        path,
        &output_dir.join(INDEX_FILE),
    )?;

    if let Some(datetime) = synced.timestamp() {
        let path_id = site.cache.path_id(dir)?;
        supersede(site, &relative, path_id, &slug, affected)?;

        let kind = if is_page { Kind::Page } else { Kind::Entry };
        let record = EntryRecord::new(kind, path_id, INDEX_FILE, datetime, synced.is_update())
            .source(&relative)
            .slug(&slug)
            .title(&title);
        let id = site.cache.add_entry(&record)?;

        if !is_page {
            for ancestor in ancestors(dir) {
                site.cache.path_id(ancestor)?;
                affected.paths.insert(ancestor.to_owned());
            }
            for tag in &tags {
                site.cache.add_tag(id, tag)?;
                affected.tags.insert(tag.clone());
            }
            affected.entries += 1;
        }
    }

    for (name, contents) in &parsed.fragments {
        let synced = site.syncer.write(
            &join_path(&base, name),
            contents.as_bytes(),
            path,
            &output_dir.join(name),
        )?;
        if let Some(datetime) = synced.timestamp() {
            let record = EntryRecord::new(Kind::Source, site.cache.path_id(dir)?, name, datetime, synced.is_update())
                .source(&relative)
                .slug(&slug);
            site.cache.add_entry(&record)?;
        }
    }

    let source_dir = path.parent().unwrap_or_else(|| config.source_directory.as_path());
    for file in meta.list("files") {
        if !markdown::is_safe_relative(&file) {
            warn!("{}: ignoring attachment '{}'", relative, file);
            continue;
        }
        let synced = site.syncer.copy(
            &join_path(&base, &file),
            &source_dir.join(&file),
            &output_dir.join(&file),
        )?;
        if let Some(datetime) = synced.timestamp() {
            let record = EntryRecord::new(Kind::File, site.cache.path_id(dir)?, &file, datetime, synced.is_update())
                .source(&join_path(dir, &file))
                .slug(&slug);
            site.cache.add_entry(&record)?;
        }
    }

    Ok(())
}

/// Removes the outputs and records `source` produced under a slug or
/// directory it no longer has. Listings that showed a removed entry are
/// marked affected.
fn supersede(site: &Site<'_>, source: &str, path: Id, slug: &str, affected: &mut Affected) -> Result<()> {
    let stale = site.cache.superseded_entries(source, path, slug)?.collect()?;
    for row in stale {
        let output = row.url_path();
        info!("remove: {}", output);
        let file = if row.file == INDEX_FILE {
            site.config.destination_directory.join(&output).join(INDEX_FILE)
        } else {
            site.config.destination_directory.join(&output)
        };
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if row.kind == Kind::Entry {
            for ancestor in ancestors(&row.path) {
                affected.paths.insert(ancestor.to_owned());
            }
            for tag in site.cache.tags_for_entry(row.id)?.collect()? {
                affected.tags.insert(tag);
            }
            affected.entries += 1;
        }
        site.cache.remove_entry(row.id)?;
    }
    Ok(())
}

fn title_of(meta: &Metadata, parsed: &Parsed, stem: &str) -> String {
    meta.scalar("title")
        .map(str::to_owned)
        .or_else(|| parsed.title.clone())
        .unwrap_or_else(|| stem.to_owned())
}

fn slug_of(meta: &Metadata, parsed: &Parsed, title: &str, stem: &str) -> String {
    let slug = meta
        .scalar("slug")
        .map(str::to_owned)
        .or_else(|| parsed.slug.clone())
        .unwrap_or_else(|| slug::slugify(title));
    if slug.is_empty() || !markdown::is_safe_relative(&slug) {
        slug::slugify(stem)
    } else {
        slug
    }
}

/// Unions the `files` field with the discovered attachments. A missing or
/// scalar `files` field counts as empty. Directory references are dropped.
fn merge_files(meta: &mut Metadata, discovered: &[String]) {
    let mut files = meta
        .get("files")
        .and_then(MetaValue::as_array)
        .map(<[String]>::to_vec)
        .unwrap_or_default();
    files.extend(discovered.iter().cloned());
    files.retain(|f| !f.is_empty() && !f.ends_with('/'));
    files.sort();
    files.dedup();
    meta.set("files", MetaValue::Array(files));
}

fn unique(mut items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| !item.is_empty() && seen.insert(item.clone()));
    items
}

/// The `/`-separated path of `path` relative to `root`.
pub(crate) fn relative_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// The directory part of a `/`-separated relative path; `""` at the root.
pub(crate) fn parent_of(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(i) => &relative[..i],
        None => "",
    }
}

/// The file part of a `/`-separated relative path.
pub(crate) fn file_name_of(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(i) => &relative[i + 1..],
        None => relative,
    }
}

pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// `dir` and each of its ancestors, deepest first, excluding the root.
pub(crate) fn ancestors(dir: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = dir;
    while !current.is_empty() {
        out.push(current);
        current = parent_of(current);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{Config, Overrides};
    use crate::sync::Syncer;
    use crate::template::Templates;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_ancestors() {
        assert_eq!(vec!["a/b/c", "a/b", "a"], ancestors("a/b/c"));
        assert!(ancestors("").is_empty());
    }

    #[test]
    fn test_path_helpers() {
        let root = Path::new("/site/content");
        assert_eq!("blog/hello.md", relative_path(Path::new("/site/content/blog/hello.md"), root));
        assert_eq!("blog", parent_of("blog/hello.md"));
        assert_eq!("", parent_of("hello.md"));
        assert_eq!("hello.md", file_name_of("blog/hello.md"));
        assert_eq!("hi/index.html", join_path("", "hi/index.html"));
    }

    #[test]
    fn test_merge_files() {
        let mut meta = Metadata::new();
        meta.set("files", MetaValue::Scalar("nope".to_owned()));
        merge_files(
            &mut meta,
            &["b.png".to_owned(), "a.png".to_owned(), "dir/".to_owned(), "b.png".to_owned()],
        );
        assert_eq!(vec!["a.png".to_owned(), "b.png".to_owned()], meta.list("files"));

        let mut meta = Metadata::new();
        meta.set("files", MetaValue::Array(vec!["z.txt".to_owned()]));
        merge_files(&mut meta, &["a.png".to_owned()]);
        assert_eq!(vec!["a.png".to_owned(), "z.txt".to_owned()], meta.list("files"));
    }

    #[test]
    fn test_slug_fallbacks() {
        let meta = Metadata::new();
        let parsed = Parsed::default();
        assert_eq!("my-post", slug_of(&meta, &parsed, "My Post", "file"));
        assert_eq!("file", slug_of(&meta, &parsed, "!!!", "file"));
    }

    struct Fixture {
        dir: TempDir,
        config: Config,
        cache: Cache,
        templates: Templates,
    }

    impl Fixture {
        fn new() -> std::result::Result<Fixture, Box<dyn std::error::Error>> {
            let dir = TempDir::new()?;
            let config = Config::resolve(Metadata::new(), dir.path(), dir.path(), &Overrides::default())?;
            let templates = Templates::from_sources(vec![
                (ENTRY, "<h1>{{.title}}</h1>{{.content}}{{range .tags}}<a href=\"{{.url}}\">{{.name}}</a>{{end}}"),
                (PAGE, "page:{{.title}}"),
            ])?;
            Ok(Fixture {
                dir,
                config,
                cache: Cache::in_memory()?,
                templates,
            })
        }

        fn site(&self) -> Site<'_> {
            Site {
                config: &self.config,
                cache: &self.cache,
                templates: &self.templates,
                syncer: Syncer::new(false),
            }
        }

        fn write(&self, relative: &str, contents: &str) -> std::io::Result<PathBuf> {
            let path = self.config.source_directory.join(relative);
            fs::create_dir_all(path.parent().unwrap_or(self.dir.path()))?;
            fs::write(&path, contents)?;
            Ok(path)
        }
    }

    #[test]
    fn test_process_entry() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        let path = fixture.write(
            "a/b/c/post.md",
            "---\ntags: [rust, notes, rust]\n---\n# Hello World\n\n![pic](pic.png)\n\n```sh:run.sh\necho hi\n```\n",
        )?;
        fixture.write("a/b/c/pic.png", "png")?;
        let mtime = fs::metadata(&path)?.modified()?;

        let mut affected = Affected::default();
        process(&fixture.site(), &path, &mut affected)?;

        let out = fixture.config.destination_directory.join("a/b/c/hello-world");
        let html = fs::read_to_string(out.join("index.html"))?;
        assert!(html.starts_with("<h1>Hello World</h1>"));
        assert!(html.contains("href=\"/tags/rust/\""));
        assert_eq!("echo hi\n", fs::read_to_string(out.join("run.sh"))?);
        assert_eq!("png", fs::read_to_string(out.join("pic.png"))?);

        let paths: Vec<&str> = affected.paths.iter().map(String::as_str).collect();
        assert_eq!(vec!["a", "a/b", "a/b/c"], paths);
        let tags: Vec<&str> = affected.tags.iter().map(String::as_str).collect();
        assert_eq!(vec!["notes", "rust"], tags);

        let rewritten = fs::read_to_string(&path)?;
        let document = metadata::split(&rewritten)?;
        assert!(document.metadata.scalar("created").is_some());
        assert!(document.metadata.get("updated").is_none());
        assert_eq!(vec!["pic.png".to_owned()], document.metadata.list("files"));
        assert_eq!(mtime, fs::metadata(&path)?.modified()?);

        let stats = fixture.cache.stats()?;
        assert_eq!(3, stats.entries);
        assert_eq!(2, stats.tagged_entries);
        Ok(())
    }

    #[test]
    fn test_process_page_adds_nothing() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        let path = fixture.write("about/me.md", "---\ntype: page\ntitle: About\ntags: [x]\n---\nhi\n")?;

        let mut affected = Affected::default();
        process(&fixture.site(), &path, &mut affected)?;

        let html = fs::read_to_string(fixture.config.destination_directory.join("about/about/index.html"))?;
        assert_eq!("page:About", html);
        assert_eq!(Affected::default(), affected);
        Ok(())
    }

    #[test]
    fn test_unchanged_document_is_skipped() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        let path = fixture.write("blog/hello.md", "# Hi\nHello")?;

        let mut first = Affected::default();
        process(&fixture.site(), &path, &mut first)?;
        assert_eq!(1, first.entries);

        let mut second = Affected::default();
        process(&fixture.site(), &path, &mut second)?;
        assert_eq!(Affected::default(), second);
        Ok(())
    }
}
