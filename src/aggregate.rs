//! Regenerates the pages that summarize many entries: one listing per
//! affected directory, the tag index and one page per affected tag, the home
//! page, and the Atom feed. Everything here is derived from the cache, so it
//! runs after the whole document pass.

use crate::build::{Result, Site};
use crate::cache::{EntryRecord, EntryRow, Id, Kind, Query};
use crate::content::{file_name_of, join_path, parent_of};
use crate::excerpt::excerpt;
use crate::feed::{render_feed, FeedConfig, FeedEntry};
use crate::markdown;
use crate::metadata;
use crate::tag::Tag;
use crate::template::{Data, INDEX, LIST, TAG, TAGS};
use crate::walk::Affected;
use gtmpl::Value;
use std::fs;
use std::io;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.html";
const FEED_FILE: &str = "feed.xml";
const TAGS_PATH: &str = "tags";

/// Regenerates everything affected by a document pass. Does nothing if no
/// entry changed.
pub fn aggregate(site: &Site<'_>, affected: &Affected) -> Result<()> {
    if affected.is_empty() {
        debug!("no entries changed, skipping aggregation");
        return Ok(());
    }

    for path in affected.paths.iter().filter(|p| !p.is_empty()) {
        write_listing(site, path)?;
    }

    if !affected.tags.is_empty() {
        write_tag_index(site)?;
        for tag in &affected.tags {
            write_tag_listing(site, tag)?;
        }
    }

    write_home_and_feed(site)
}

/// Template values describing an entry in a listing.
fn entry_value(site: &Site<'_>, row: &EntryRow) -> Result<Data> {
    let mut tags = Vec::new();
    for tag in site.cache.tags_for_entry(row.id)?.rows()? {
        tags.push(tag?);
    }
    let mut data = Data::new();
    data.set_str("title", row.title.as_deref().unwrap_or(""))
        .set_str("slug", &row.slug)
        .set_str("path", &row.path)
        .set_str("url", &format!("{}{}", site.config.base_url, row.url_path()))
        .set_str("date", row.date())
        .set_str("created", &row.created)
        .set_str("updated", row.updated.as_deref().unwrap_or(""))
        .set_list("tags", Tag::values(&tags, &site.config.tags_url()));
    Ok(data)
}

/// Renders every row of `query` into template values.
fn entry_values(site: &Site<'_>, mut query: Query<'_, EntryRow>) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for row in query.rows()? {
        out.push(entry_value(site, &row?)?.into());
    }
    Ok(out)
}

fn directory_url(site: &Site<'_>, path: &str) -> String {
    if path.is_empty() {
        site.config.base_url.clone()
    } else {
        format!("{}{}/", site.config.base_url, path)
    }
}

/// Writes `content` to `<destination>/<relative>` and records it.
fn publish(site: &Site<'_>, relative: &str, content: &[u8], record: impl FnOnce(bool) -> EntryRecord) -> Result<()> {
    let dst = site.config.destination_directory.join(relative);
    let existed = site.syncer.publish(relative, content, &dst)?;
    site.cache.add_entry(&record(existed))?;
    Ok(())
}

fn write_listing(site: &Site<'_>, path: &str) -> Result<()> {
    let cache = site.cache;
    let now = site.config.now();
    let path_id = cache.path_id(path)?;
    let name = file_name_of(path);

    let mut subpaths: Vec<Value> = Vec::new();
    for subpath in cache.subpaths_of(path_id)?.rows()? {
        let subpath = subpath?;
        let mut data = Data::new();
        data.set_str("name", file_name_of(&subpath))
            .set_str("path", &subpath)
            .set_str("url", &directory_url(site, &subpath));
        subpaths.push(data.into());
    }
    let entries = entry_values(site, cache.entries_under_path(path_id, Kind::Entry)?)?;

    let mut data = Data::from_metadata(&site.config.values);
    data.set_str("title", name)
        .set_str("name", name)
        .set_str("path", path)
        .set_str("url", &directory_url(site, path))
        .set_str("parent_url", &directory_url(site, parent_of(path)))
        .set_list("subpaths", subpaths)
        .set_list("entries", entries);
    let html = site.templates.render(LIST, data.into())?;

    publish(site, &join_path(path, INDEX_FILE), &html, |existed| {
        EntryRecord::new(Kind::Listing, path_id, INDEX_FILE, now, existed).title(name)
    })
}

fn write_tag_index(site: &Site<'_>) -> Result<()> {
    let cache = site.cache;
    let config = site.config;
    let mut tags: Vec<Value> = Vec::new();
    for tag in cache.all_tags()?.rows()? {
        let (tag_id, name) = tag?;
        let entries = entry_values(site, cache.entries_for_tag(tag_id, Kind::Entry)?)?;
        let mut data = Data::new();
        data.set_str("name", &name)
            .set_str("url", &Tag::new(&name, &config.tags_url()).url)
            .set("count", Value::from(entries.len() as i64))
            .set_list("entries", entries);
        tags.push(data.into());
    }

    let title = config.value("tags_name").unwrap_or("Tags");
    let mut data = Data::from_metadata(&config.values);
    data.set_str("title", title)
        .set_str("url", &config.tags_url())
        .set_list("tags", tags);
    let html = site.templates.render(TAGS, data.into())?;

    let path_id = cache.path_id(TAGS_PATH)?;
    publish(site, &join_path(TAGS_PATH, INDEX_FILE), &html, |existed| {
        EntryRecord::new(Kind::Listing, path_id, INDEX_FILE, config.now(), existed).title(title)
    })
}

fn write_tag_listing(site: &Site<'_>, tag: &str) -> Result<()> {
    if !markdown::is_safe_relative(tag) {
        warn!("skipping listing for tag '{}'", tag);
        return Ok(());
    }
    let cache = site.cache;
    let config = site.config;
    let tag_id: Id = cache.tag_id(tag)?;
    let entries = entry_values(site, cache.entries_for_tag(tag_id, Kind::Entry)?)?;

    let mut data = Data::from_metadata(&config.values);
    data.set_str("title", tag)
        .set_str("name", tag)
        .set_str("url", &Tag::new(tag, &config.tags_url()).url)
        .set_str("parent_url", &config.tags_url())
        .set_list("entries", entries);
    let html = site.templates.render(TAG, data.into())?;

    let path_id = cache.path_id(TAGS_PATH)?;
    let relative = join_path(&join_path(TAGS_PATH, tag), INDEX_FILE);
    publish(site, &relative, &html, |existed| {
        EntryRecord::new(Kind::Listing, path_id, INDEX_FILE, config.now(), existed)
            .slug(tag)
            .title(tag)
    })
}

/// Reads an entry's source and cuts its body down to an HTML excerpt.
/// Returns `None` if the source has disappeared since it was recorded.
fn excerpt_html(site: &Site<'_>, row: &EntryRow) -> Result<Option<String>> {
    let path = site.config.source_directory.join(&row.source);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!("missing source for '{}': {}", row.url_path(), path.display());
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let document = metadata::split(&raw)?;
    Ok(Some(markdown::to_html(excerpt(document.body, site.config.short_size))))
}

fn write_home_and_feed(site: &Site<'_>) -> Result<()> {
    let cache = site.cache;
    let config = site.config;
    let mut entries: Vec<Value> = Vec::with_capacity(config.num_entries);
    let mut feed_entries = Vec::with_capacity(config.num_entries);
    for row in cache.most_recent_entries(Kind::Entry, config.num_entries)?.rows()? {
        let row = row?;
        let html = match excerpt_html(site, &row)? {
            Some(html) => html,
            None => continue,
        };
        let mut data = entry_value(site, &row)?;
        data.set_str("excerpt", &html);
        entries.push(data.into());

        let url = format!("{}{}", config.base_url, row.url_path());
        feed_entries.push(FeedEntry {
            title: row.title.clone().unwrap_or_default(),
            url: url.clone(),
            timestamp: row.date().to_owned(),
            excerpt: html,
            id: url,
        });
    }

    let title = config.value("home_name").unwrap_or("Home");
    let mut data = Data::from_metadata(&config.values);
    data.set_str("title", title)
        .set_str("url", &config.base_url)
        .set_list("entries", entries);
    let html = site.templates.render(INDEX, data.into())?;

    let root = cache.path_id("")?;
    publish(site, INDEX_FILE, &html, |existed| {
        EntryRecord::new(Kind::HomeIndex, root, INDEX_FILE, config.now(), existed).title(title)
    })?;

    let feed = render_feed(
        FeedConfig {
            title: config.value("title").unwrap_or(title).to_owned(),
            id: config.base_url.clone(),
            author: config.value("author").map(str::to_owned),
            home_page: config.base_url.clone(),
            updated: config.now().to_owned(),
        },
        &feed_entries,
    )?;
    publish(site, FEED_FILE, &feed, |existed| {
        EntryRecord::new(Kind::Feed, root, FEED_FILE, config.now(), existed)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{Config, Overrides};
    use crate::metadata::Metadata;
    use crate::sync::Syncer;
    use crate::template::Templates;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        cache: Cache,
        templates: Templates,
    }

    impl Fixture {
        fn new() -> std::result::Result<Fixture, Box<dyn std::error::Error>> {
            let dir = TempDir::new()?;
            let config = Config::resolve(Metadata::new(), dir.path(), dir.path(), &Overrides::default())?;
            let templates = Templates::from_sources(vec![
                (LIST, "{{.title}}|{{range .subpaths}}{{.name}};{{end}}|{{range .entries}}{{.title}}@{{.url}};{{end}}"),
                (TAGS, "{{range .tags}}{{.name}}={{.count}};{{end}}"),
                (TAG, "{{.name}}:{{range .entries}}{{.title}};{{end}}"),
                (INDEX, "{{range .entries}}[{{.title}}]{{.excerpt}}{{end}}"),
            ])?;
            Ok(Fixture {
                _dir: dir,
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

        fn entry(&self, dir: &str, slug: &str, created: &str, tags: &[&str]) -> std::result::Result<(), Box<dyn std::error::Error>> {
            let source = format!("{}/{}.md", dir, slug);
            let path = self.config.source_directory.join(&source);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(&path, format!(
                "---\ntitle: {}\n---\nBody of {}\n<!-- more -->\nsecond paragraph\n",
                slug, slug
            ))?;
            let record = EntryRecord::new(Kind::Entry, self.cache.path_id(dir)?, INDEX_FILE, created, false)
                .source(&source)
                .slug(slug)
                .title(slug);
            let id = self.cache.add_entry(&record)?;
            for tag in tags {
                self.cache.add_tag(id, tag)?;
            }
            Ok(())
        }

        fn read(&self, relative: &str) -> std::io::Result<String> {
            fs::read_to_string(self.config.destination_directory.join(relative))
        }
    }

    #[test]
    fn test_nothing_affected() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        aggregate(&fixture.site(), &Affected::default())?;
        assert!(!fixture.config.destination_directory.exists());
        Ok(())
    }

    #[test]
    fn test_aggregate() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        fixture.cache.path_id("blog")?;
        fixture.entry("blog/2023", "old", "2023-01-01T00:00:00Z", &["rust"])?;
        fixture.entry("blog", "new", "2024-01-01T00:00:00Z", &["rust", "life"])?;

        let mut affected = Affected::default();
        affected.paths.insert("blog".to_owned());
        affected.paths.insert("blog/2023".to_owned());
        affected.tags.insert("rust".to_owned());
        affected.entries = 1;
        aggregate(&fixture.site(), &affected)?;

        assert_eq!(
            "blog|2023;|new@/blog/new/;",
            fixture.read("blog/index.html")?
        );
        assert_eq!("life=1;rust=2;", fixture.read("tags/index.html")?);
        assert_eq!("rust:new;old;", fixture.read("tags/rust/index.html")?);
        assert!(!fixture.config.destination_directory.join("tags/life").exists());

        let home = fixture.read("index.html")?;
        assert!(home.starts_with("[new]<p>Body of new</p>"));
        assert!(!home.contains("second paragraph"));
        assert!(home.contains("[old]"));

        let feed = fixture.read("feed.xml")?;
        assert!(feed.contains("href=\"/blog/new/\""));

        let listings = fixture
            .cache
            .entries_under_path(fixture.cache.path_id("blog")?, Kind::Listing)?
            .collect()?;
        assert_eq!(1, listings.len());
        assert_eq!(None, listings[0].updated);
        Ok(())
    }

    #[test]
    fn test_listing_update_is_recorded() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        fixture.entry("blog", "post", "2024-01-01T00:00:00Z", &[])?;
        let mut affected = Affected::default();
        affected.paths.insert("blog".to_owned());

        aggregate(&fixture.site(), &affected)?;
        aggregate(&fixture.site(), &affected)?;

        let root = fixture.cache.path_id("")?;
        let home = fixture.cache.most_recent_entries(Kind::HomeIndex, 10)?.collect()?;
        assert_eq!(1, home.len());
        assert!(home[0].updated.is_some());
        assert!(fixture.cache.entries_under_path(root, Kind::Feed)?.collect()?.len() == 1);
        Ok(())
    }
}
