//! Upstream product sources
//!
//! Each provider normalizes its own wire format into `ProviderProduct` so the
//! aggregation layer never sees provider-specific JSON.

pub mod ebay;
pub mod serpapi;

use crate::catalog::CatalogError;

/// A product as reported by a single upstream source, before merging.
#[derive(Debug, Clone)]
pub struct ProviderProduct {
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_url: String,
    pub merchant_url: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub merchant_name: Option<String>,
    /// Provider-native listing id, used as the preferred dedup key.
    pub offer_id: Option<String>,
}

/// A searchable upstream product source.
#[async_trait::async_trait]
pub trait ProductProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ProviderProduct>, CatalogError>;
}

/// Best-effort price extraction from display strings like "$1,299.99".
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Curated floor returned when every live source comes back empty.
///
/// These are editorial picks with no merchant relationship, hence the "#"
/// placeholder links that the affiliate layer passes through untouched.
pub fn fallback_products() -> Vec<ProviderProduct> {
    let picks = [
        (
            "Classic Trench Coat",
            128.0,
            "Meridian",
            "Outerwear",
            "https://cdn.stylecast.app/catalog/trench-coat.jpg",
            "curated-001",
        ),
        (
            "Satin Slip Dress",
            89.0,
            "Vella",
            "Dresses",
            "https://cdn.stylecast.app/catalog/slip-dress.jpg",
            "curated-002",
        ),
        (
            "Relaxed Linen Shirt",
            54.0,
            "Harbor & Pine",
            "Tops",
            "https://cdn.stylecast.app/catalog/linen-shirt.jpg",
            "curated-003",
        ),
        (
            "Wide-Leg Cargo Pants",
            72.0,
            "Arroyo",
            "Bottoms",
            "https://cdn.stylecast.app/catalog/cargo-pants.jpg",
            "curated-004",
        ),
        (
            "Leather Chelsea Boots",
            149.0,
            "Calder",
            "Shoes",
            "https://cdn.stylecast.app/catalog/chelsea-boots.jpg",
            "curated-005",
        ),
        (
            "Oversized Wool Blazer",
            164.0,
            "Meridian",
            "Outerwear",
            "https://cdn.stylecast.app/catalog/wool-blazer.jpg",
            "curated-006",
        ),
    ];

    picks
        .into_iter()
        .map(
            |(title, price, brand, category, image_url, offer_id)| ProviderProduct {
                title: title.to_string(),
                price: Some(price),
                currency: Some("USD".to_string()),
                image_url: image_url.to_string(),
                merchant_url: "#".to_string(),
                brand: Some(brand.to_string()),
                category: Some(category.to_string()),
                merchant_name: None,
                offer_id: Some(offer_id.to_string()),
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_handles_symbols_and_separators() {
        assert_eq!(parse_price("$89.99"), Some(89.99));
        assert_eq!(parse_price("1,299.00"), Some(1299.0));
        assert_eq!(parse_price("USD 45"), Some(45.0));
    }

    #[test]
    fn test_parse_price_rejects_garbage() {
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("free"), None);
        assert_eq!(parse_price("89.99 - 120.00"), None);
    }

    #[test]
    fn test_fallback_products_are_servable() {
        let products = fallback_products();
        assert!(products.len() >= 5);
        for product in &products {
            assert!(!product.image_url.is_empty());
            assert_eq!(product.merchant_url, "#");
            assert!(product.category.is_some());
        }
    }
}
