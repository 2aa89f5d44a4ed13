//! Monetization wrapper for merchant links
//!
//! Wrapping happens at serve time only. Stored records always keep the raw
//! merchant URL so the affiliate network can be swapped without re-ingesting.

use url::Url;

const WRAPPER_BASE: &str = "https://go.skimresources.com/";

/// Rewrites merchant URLs through the affiliate redirect service.
#[derive(Debug, Clone)]
pub struct AffiliateLinker {
    site_id: String,
}

impl AffiliateLinker {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
        }
    }

    /// Wrap a merchant URL, attaching the user id as the attribution
    /// sub-tag when present.
    ///
    /// Placeholder links ("#"), empty strings, non-http URLs, and links that
    /// are already wrapped all pass through unchanged.
    pub fn wrap(&self, merchant_url: &str, user_id: Option<&str>) -> String {
        if merchant_url.is_empty() || merchant_url == "#" {
            return merchant_url.to_string();
        }

        let parsed = match Url::parse(merchant_url) {
            Ok(parsed) => parsed,
            Err(_) => return merchant_url.to_string(),
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return merchant_url.to_string();
        }
        if parsed.host_str() == Some("go.skimresources.com") {
            return merchant_url.to_string();
        }

        // WRAPPER_BASE is a constant valid URL.
        let mut wrapped = Url::parse(WRAPPER_BASE).unwrap();
        {
            let mut pairs = wrapped.query_pairs_mut();
            pairs.append_pair("id", &self.site_id);
            pairs.append_pair("xs", "1");
            pairs.append_pair("url", merchant_url);
            if let Some(user_id) = user_id {
                pairs.append_pair("xcust", user_id);
            }
        }
        wrapped.to_string()
    }
}
