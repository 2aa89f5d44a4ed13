//! Policy constants and environment-backed settings
//!
//! Cache policy, timeouts, and merge tuning live here as named constants
//! rather than as inline literals in the orchestration code.

use std::path::PathBuf;
use std::time::Duration;

/// Minimum number of text-cache records that counts as a full cache hit for
/// `search`. Below this the cached rows alone aren't a browsable result set,
/// so the aggregator still fans out to the upstream providers.
pub const CACHE_SUFFICIENCY_THRESHOLD: usize = 5;

/// Maximum age of a completed generation job that is still served as a cache
/// hit. Generation models get upgraded; a day-old result is acceptable, a
/// month-old one is not.
pub const GENERATION_FRESHNESS_HOURS: i64 = 24;

/// Ceiling for a single upstream product-provider call. One slow provider
/// must not stall the whole aggregation.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(8);

/// How many items to request from each product provider per search.
pub const PROVIDER_RESULT_LIMIT: usize = 10;

/// Bound on rows fetched by the Asset Store text lookup.
pub const TEXT_LOOKUP_LIMIT: usize = 20;

/// Normalized-title prefix length used as the merge key when a provider
/// record has no native offer id.
pub const MERGE_KEY_TITLE_LEN: usize = 40;

/// Deadline for one try-on render, submission to final output. Renders run
/// tens of seconds to minutes; past this the render is treated as failed.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(180);

/// Poll cadence while a submitted render is in flight.
pub const RENDER_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Bound on any single HTTP round trip to the render service. The render
/// deadline is only checked between polls, so each request carries its own
/// timeout.
pub const RENDER_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard ceiling the orchestrator holds over one whole render call: the
/// client-side deadline plus slack for the submit and a final in-flight poll.
pub const RENDER_CALL_CEILING: Duration =
    Duration::from_secs(RENDER_TIMEOUT.as_secs() + 2 * RENDER_HTTP_TIMEOUT.as_secs());

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// Directory holding `stylecast.db` (both cache tables).
    pub data_dir: PathBuf,
    pub serpapi_key: String,
    pub ebay_client_id: String,
    pub ebay_client_secret: String,
    pub tryon_api_key: String,
    pub tryon_api_base: String,
    /// Skimlinks publisher site id used by the link rewriter.
    pub affiliate_site_id: String,
    /// The house model reference image handed to the try-on upstream when a
    /// request doesn't override it.
    pub model_image_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("STYLECAST_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8460".to_string()),
            data_dir: std::env::var("STYLECAST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./stylecast-data")),
            serpapi_key: std::env::var("SERPAPI_API_KEY").unwrap_or_default(),
            ebay_client_id: std::env::var("EBAY_CLIENT_ID").unwrap_or_default(),
            ebay_client_secret: std::env::var("EBAY_CLIENT_SECRET").unwrap_or_default(),
            tryon_api_key: std::env::var("FASHN_API_KEY").unwrap_or_default(),
            tryon_api_base: std::env::var("FASHN_API_BASE")
                .unwrap_or_else(|_| "https://api.fashn.ai".to_string()),
            affiliate_site_id: std::env::var("SKIMLINKS_SITE_ID")
                .unwrap_or_else(|_| "000000X000000".to_string()),
            model_image_url: std::env::var("STYLECAST_MODEL_IMAGE_URL").unwrap_or_else(|_| {
                "https://cdn.stylecast.app/models/studio-default.jpg".to_string()
            }),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("stylecast.db")
    }
}
