//! Google Shopping results via the SerpAPI proxy

use crate::catalog::CatalogError;
use crate::catalog::providers::{ProductProvider, ProviderProduct, parse_price};
use serde_json::Value;
use tracing::debug;

const SEARCH_ENDPOINT: &str = "https://serpapi.com/search.json";

/// Primary product source. Queries Google Shopping through SerpAPI and
/// normalizes the `shopping_results` array.
pub struct SerpApiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl SerpApiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl ProductProvider for SerpApiProvider {
    fn name(&self) -> &str {
        "serpapi"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ProviderProduct>, CatalogError> {
        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("engine", "google_shopping"),
                ("q", query),
                ("num", &limit.to_string()),
                ("api_key", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| CatalogError::Upstream(format!("serpapi request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CatalogError::Upstream(format!(
                "serpapi returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::Upstream(format!("serpapi response unreadable: {e}")))?;

        let products: Vec<ProviderProduct> = body
            .get("shopping_results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(parse_shopping_result)
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        debug!("serpapi answered {:?} with {} products", query, products.len());
        Ok(products)
    }
}

/// Items without a usable thumbnail are dropped, everything downstream
/// assumes a source image exists.
fn parse_shopping_result(item: &Value) -> Option<ProviderProduct> {
    let title = item.get("title").and_then(Value::as_str)?.to_string();
    let image_url = item.get("thumbnail").and_then(Value::as_str)?.to_string();

    let price = item
        .get("extracted_price")
        .and_then(Value::as_f64)
        .or_else(|| {
            item.get("price")
                .and_then(Value::as_str)
                .and_then(parse_price)
        });

    let merchant_url = item
        .get("product_link")
        .and_then(Value::as_str)
        .or_else(|| item.get("link").and_then(Value::as_str))
        .unwrap_or("#")
        .to_string();

    Some(ProviderProduct {
        title,
        price,
        currency: Some("USD".to_string()),
        image_url,
        merchant_url,
        brand: None,
        category: None,
        merchant_name: item
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_string),
        offer_id: item
            .get("product_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_shopping_result() {
        let item = json!({
            "title": "Vintage Leather Jacket",
            "extracted_price": 129.99,
            "price": "$129.99",
            "thumbnail": "https://img.example.com/jacket.jpg",
            "product_link": "https://www.google.com/shopping/product/123",
            "source": "Nordstrom",
            "product_id": "123456789"
        });

        let product = parse_shopping_result(&item).unwrap();
        assert_eq!(product.title, "Vintage Leather Jacket");
        assert_eq!(product.price, Some(129.99));
        assert_eq!(product.image_url, "https://img.example.com/jacket.jpg");
        assert_eq!(product.merchant_name.as_deref(), Some("Nordstrom"));
        assert_eq!(product.offer_id.as_deref(), Some("123456789"));
    }

    #[test]
    fn test_parse_falls_back_to_price_string() {
        let item = json!({
            "title": "Jacket",
            "price": "$89",
            "thumbnail": "https://img.example.com/a.jpg"
        });

        let product = parse_shopping_result(&item).unwrap();
        assert_eq!(product.price, Some(89.0));
        assert_eq!(product.merchant_url, "#");
    }

    #[test]
    fn test_parse_drops_results_without_thumbnail() {
        let item = json!({
            "title": "Jacket",
            "price": "$89"
        });
        assert!(parse_shopping_result(&item).is_none());
    }
}
