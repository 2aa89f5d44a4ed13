//! Product catalog subsystem
//!
//! Everything between a product search request and the paid upstreams lives
//! here: the content-addressed Asset Store, the ranked search providers, the
//! try-on render client, and the orchestration that decides when a cached
//! result is good enough to skip the upstreams entirely.

pub mod affiliate;
pub mod compliance;
pub mod hash;
pub mod providers;
pub mod render;
pub mod service;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for catalog operations
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Render failed for source image: {source_image_url}")]
    RenderFailed { source_image_url: String },
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        CatalogError::Database(e.to_string())
    }
}

/// Compliance flags persisted with every rendered asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub ai_disclosure_applied: bool,
    pub synthetic_watermark_applied: bool,
}

/// One row of the Asset Store: a unique source product image, its descriptive
/// metadata, and zero or more try-on renders produced for it.
///
/// `content_hash` is the hash of the canonicalized `source_image_url` and is
/// the table's only identity; re-ingesting the same image upserts this row.
/// `merchant_url` is always stored raw; affiliate wrapping happens at serve
/// time only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub content_hash: String,
    pub source_identifier: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub source_image_url: String,
    pub merchant_url: String,
    /// Empty means "not yet rendered": such a row is a text-search hit but a
    /// render-cache miss.
    pub rendered_image_urls: Vec<String>,
    pub primary_rendered_url: Option<String>,
    pub compliance: ComplianceFlags,
    pub disclosure_text: Option<String>,
    pub is_trending: bool,
    pub trend_keyword: Option<String>,
    pub trend_refreshed_at: Option<DateTime<Utc>>,
    /// Lowercase tokens used by the fallback substring search.
    pub search_tags: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    /// A fresh, unrendered record for a source image. Callers fill in the
    /// descriptive fields they know and derive `search_tags` before
    /// persisting.
    pub fn new(content_hash: String, source_image_url: String) -> Self {
        let now = Utc::now();
        Self {
            content_hash,
            source_identifier: None,
            title: None,
            brand: None,
            category: None,
            price: None,
            currency: None,
            source_image_url,
            merchant_url: String::new(),
            rendered_image_urls: Vec::new(),
            primary_rendered_url: None,
            compliance: ComplianceFlags::default(),
            disclosure_text: None,
            is_trending: false,
            trend_keyword: None,
            trend_refreshed_at: None,
            search_tags: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A merged, serve-ready product as returned by `CatalogService::search`.
///
/// `id` is the content hash of the product's source image, so callers can
/// pass it straight back into the render path. `affiliate_url` is derived
/// fresh on every response and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedProduct {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_url: String,
    pub affiliate_url: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub merchant_offer_id: Option<String>,
    /// Where this entry came from: `cache`, a provider name, or `fallback`.
    pub source: String,
}

/// Persistent store for Asset Records, keyed by content hash.
///
/// The storage layer enforces the dedup invariant (one row per hash) with its
/// primary key; `upsert` must be idempotent so racing writers converge.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    /// Exact lookup by content hash.
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<AssetRecord>, CatalogError>;

    /// Best-effort substring/tag match over title and `search_tags`, with an
    /// optional exact category filter. Bounded by `limit`, returned in
    /// storage order. Used only when no exact hash is known yet.
    async fn find_by_text(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AssetRecord>, CatalogError>;

    /// Trend-tagged rows, most recently refreshed first.
    async fn find_trending(&self, limit: usize) -> Result<Vec<AssetRecord>, CatalogError>;

    /// Insert-or-update keyed by `content_hash`; last-write-wins on every
    /// field except the hash itself and `created_at`. Calling twice with the
    /// same data leaves the store unchanged in effect.
    async fn upsert(&self, record: &AssetRecord) -> Result<(), CatalogError>;
}

const TITLE_TAG_WORDS: usize = 4;

/// Derive the lowercase token string the text lookup matches against.
///
/// Tokens come from the brand, category, trend keyword, and the leading words
/// of the title, deduplicated in that order.
pub fn derive_search_tags(
    title: Option<&str>,
    brand: Option<&str>,
    category: Option<&str>,
    trend_keyword: Option<&str>,
) -> String {
    let mut tags: Vec<String> = Vec::new();
    let mut push_words = |text: Option<&str>, max: usize| {
        let Some(text) = text else { return };
        for word in text.split_whitespace().take(max) {
            let word = word.to_lowercase();
            if !word.is_empty() && !tags.contains(&word) {
                tags.push(word);
            }
        }
    };

    push_words(brand, usize::MAX);
    push_words(category, usize::MAX);
    push_words(trend_keyword, usize::MAX);
    push_words(title, TITLE_TAG_WORDS);

    tags.join(" ")
}
