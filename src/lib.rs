//! The library code for the `kiln` incremental site builder. A run is
//! broken down into three steps:
//!
//! 1. Copying static assets ([`crate::walk::copy_static`])
//! 2. Processing content documents ([`crate::walk::process_documents`] and
//!    [`crate::content`])
//! 3. Regenerating aggregate pages ([`crate::aggregate`])
//!
//! Every output is recorded in a SQLite cache ([`crate::cache`]) that
//! survives between runs. A document or asset is only regenerated when its
//! source is newer than its output ([`crate::sync`]), and the aggregate
//! pages (directory listings, tag pages, the home page and the feed) are
//! rebuilt from the cache only for the directories and tags that the second
//! step touched.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod aggregate;
pub mod build;
pub mod cache;
pub mod config;
pub mod content;
pub mod excerpt;
pub mod feed;
pub mod markdown;
pub mod metadata;
pub mod sync;
pub mod tag;
pub mod template;
pub mod walk;
