//! eBay Browse API product source
//!
//! Uses the application-level OAuth2 client-credentials grant. Tokens are
//! cached until shortly before expiry so a burst of searches costs one
//! token exchange at most.

use crate::catalog::CatalogError;
use crate::catalog::providers::{ProductProvider, ProviderProduct, parse_price};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.ebay.com";
const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
/// Refresh this long before the reported expiry to avoid using a token
/// that dies mid-request.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
/// Longest token lifetime we accept from the response; `expires_in` is
/// untrusted input and extreme values overflow date arithmetic.
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Secondary product source backed by the eBay Browse API.
pub struct EbayProvider {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl EbayProvider {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, CatalogError> {
        let mut guard = self.token.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() + Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) {
                return Ok(cached.access_token.clone());
            }
        }

        let credentials = BASE64.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .client
            .post(format!("{}/identity/v1/oauth2/token", self.api_base))
            .header("Authorization", format!("Basic {credentials}"))
            .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
            .send()
            .await
            .map_err(|e| CatalogError::Upstream(format!("ebay token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CatalogError::Upstream(format!(
                "ebay token endpoint returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::Upstream(format!("ebay token response unreadable: {e}")))?;

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CatalogError::Upstream("ebay token response missing access_token".to_string())
            })?
            .to_string();
        let expires_in = body.get("expires_in").and_then(Value::as_i64).unwrap_or(7200);

        debug!("Refreshed ebay application token (expires in {expires_in}s)");
        *guard = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: token_expiry(expires_in),
        });
        Ok(access_token)
    }
}

fn token_expiry(expires_in: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS))
}

#[async_trait::async_trait]
impl ProductProvider for EbayProvider {
    fn name(&self) -> &str {
        "ebay"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ProviderProduct>, CatalogError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/buy/browse/v1/item_summary/search", self.api_base))
            .header("Authorization", format!("Bearer {token}"))
            .header("X-EBAY-C-MARKETPLACE-ID", "EBAY_US")
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| CatalogError::Upstream(format!("ebay search failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CatalogError::Upstream(format!(
                "ebay search returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::Upstream(format!("ebay response unreadable: {e}")))?;

        let products: Vec<ProviderProduct> = body
            .get("itemSummaries")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(parse_item_summary)
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        debug!("ebay answered {:?} with {} products", query, products.len());
        Ok(products)
    }
}

fn parse_item_summary(item: &Value) -> Option<ProviderProduct> {
    let title = item.get("title").and_then(Value::as_str)?.to_string();
    let image_url = item
        .get("image")
        .and_then(|image| image.get("imageUrl"))
        .and_then(Value::as_str)?
        .to_string();

    let price = item
        .get("price")
        .and_then(|price| price.get("value"))
        .and_then(Value::as_str)
        .and_then(parse_price);
    let currency = item
        .get("price")
        .and_then(|price| price.get("currency"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(ProviderProduct {
        title,
        price,
        currency,
        image_url,
        merchant_url: item
            .get("itemWebUrl")
            .and_then(Value::as_str)
            .unwrap_or("#")
            .to_string(),
        brand: item.get("brand").and_then(Value::as_str).map(str::to_string),
        category: None,
        merchant_name: item
            .get("seller")
            .and_then(|seller| seller.get("username"))
            .and_then(Value::as_str)
            .map(str::to_string),
        offer_id: item
            .get("itemId")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
