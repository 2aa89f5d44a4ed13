//! Product search and try-on orchestration
//!
//! `CatalogService` owns the full search path (text-cache lookup, provider
//! fan-out, merge/dedup, fallback floor, affiliate rewriting, background
//! indexing) and the render path (hash lookup, render, compliance tagging,
//! persistence). Collaborators are injected so tests can swap in mocks.

use crate::catalog::affiliate::AffiliateLinker;
use crate::catalog::hash::image_content_hash;
use crate::catalog::providers::{ProductProvider, ProviderProduct, fallback_products};
use crate::catalog::render::RenderProvider;
use crate::catalog::{AssetRecord, AssetStore, CatalogError, UnifiedProduct, compliance, derive_search_tags};
use crate::config;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input to `render_try_on`: the source image plus whatever descriptive
/// context the caller already has, which is folded into the persisted record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TryOnRequest {
    pub source_image_url: String,
    pub source_identifier: Option<String>,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub merchant_url: Option<String>,
    /// Overrides the service-wide model reference image for this render.
    pub model_image_url: Option<String>,
}

impl TryOnRequest {
    pub fn for_image(source_image_url: impl Into<String>) -> Self {
        Self {
            source_image_url: source_image_url.into(),
            ..Default::default()
        }
    }
}

/// Result of a try-on render request.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedAsset {
    pub rendered_urls: Vec<String>,
    pub primary_url: String,
    pub source: RenderSource,
    pub content_hash: String,
}

/// Whether a render came back from the cache or was freshly generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderSource {
    Cache,
    Generated,
}

/// A merge candidate: unified fields plus the raw merchant link, which is
/// only wrapped at the final serve step.
struct Candidate {
    id: String,
    title: String,
    price: Option<f64>,
    currency: Option<String>,
    image_url: String,
    merchant_url: String,
    brand: Option<String>,
    category: Option<String>,
    merchant_offer_id: Option<String>,
    source: String,
}

impl Candidate {
    fn from_record(record: &AssetRecord) -> Self {
        Self {
            id: record.content_hash.clone(),
            title: record.title.clone().unwrap_or_default(),
            price: record.price,
            currency: record.currency.clone(),
            image_url: record.source_image_url.clone(),
            merchant_url: record.merchant_url.clone(),
            brand: record.brand.clone(),
            category: record.category.clone(),
            merchant_offer_id: record.source_identifier.clone(),
            source: "cache".to_string(),
        }
    }

    fn from_provider(
        product: &ProviderProduct,
        source: &str,
        fallback_category: Option<&str>,
    ) -> Self {
        Self {
            id: image_content_hash(&product.image_url),
            title: product.title.clone(),
            price: product.price,
            currency: product.currency.clone(),
            image_url: product.image_url.clone(),
            merchant_url: product.merchant_url.clone(),
            brand: product.brand.clone(),
            category: product
                .category
                .clone()
                .or_else(|| fallback_category.map(str::to_string)),
            merchant_offer_id: product.offer_id.clone(),
            source: source.to_string(),
        }
    }

    /// Dedup key: provider-native offer id when we have one, else a
    /// truncated normalized title.
    fn merge_key(&self) -> String {
        match self.merchant_offer_id.as_deref() {
            Some(id) if !id.is_empty() => format!("offer:{id}"),
            _ => {
                let normalized = self.title.trim().to_lowercase();
                let truncated: String =
                    normalized.chars().take(config::MERGE_KEY_TITLE_LEN).collect();
                format!("title:{truncated}")
            }
        }
    }
}

/// The product-search-and-render orchestrator.
pub struct CatalogService {
    store: Arc<dyn AssetStore>,
    /// Ranked sources, highest priority first.
    providers: Vec<Arc<dyn ProductProvider>>,
    render_provider: Arc<dyn RenderProvider>,
    linker: AffiliateLinker,
    model_image_url: String,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn AssetStore>,
        providers: Vec<Arc<dyn ProductProvider>>,
        render_provider: Arc<dyn RenderProvider>,
        linker: AffiliateLinker,
        model_image_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            providers,
            render_provider,
            linker,
            model_image_url: model_image_url.into(),
        }
    }

    /// Search the catalog, hitting upstream providers only when the text
    /// cache cannot satisfy the query on its own.
    ///
    /// Never fails and never returns an empty list: every internal failure
    /// degrades to the next source, down to the curated fallback floor.
    pub async fn search(
        &self,
        query: &str,
        user_id: Option<&str>,
        category: Option<&str>,
        brand: Option<&str>,
    ) -> Vec<UnifiedProduct> {
        let query = query.trim();
        debug!("Product search {:?} (category {:?}, brand {:?})", query, category, brand);

        let cached = match self
            .store
            .find_by_text(query, category, config::TEXT_LOOKUP_LIMIT)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("⚠️ Text cache lookup failed, treating as empty: {e}");
                Vec::new()
            }
        };

        if cached.len() >= config::CACHE_SUFFICIENCY_THRESHOLD {
            info!(
                "📦 Cache satisfied search {:?} with {} records, skipping providers",
                query,
                cached.len()
            );
            let candidates = cached.iter().map(Candidate::from_record).collect();
            return self.finalize(candidates, brand, user_id);
        }

        info!(
            "🌐 Cache insufficient for {:?} ({} of {} records), querying {} provider(s)",
            query,
            cached.len(),
            config::CACHE_SUFFICIENCY_THRESHOLD,
            self.providers.len()
        );
        let fetched = self.fetch_from_providers(query).await;

        // Priority order: free cached rows first, then providers as ranked.
        let mut candidates: Vec<Candidate> = cached.iter().map(Candidate::from_record).collect();
        let mut to_index: Vec<ProviderProduct> = Vec::new();
        for (source, products) in &fetched {
            for product in products {
                candidates.push(Candidate::from_provider(product, source, category));
            }
            to_index.extend(products.iter().cloned());
        }

        let mut merged = dedup_candidates(candidates);
        if merged.is_empty() {
            warn!("⚠️ All sources empty for {:?}, serving fallback catalog", query);
            merged = fallback_products()
                .iter()
                .map(|product| Candidate::from_provider(product, "fallback", category))
                .collect();
        }

        // The response does not wait on indexing.
        self.index_products(to_index, category.map(str::to_string));

        self.finalize(merged, brand, user_id)
    }

    /// Return an existing try-on render for the source image, or generate,
    /// tag, and persist a new one.
    pub async fn render_try_on(
        &self,
        request: &TryOnRequest,
    ) -> Result<RenderedAsset, CatalogError> {
        let source_image_url = request.source_image_url.as_str();
        let content_hash = image_content_hash(source_image_url);

        let existing = match self.store.find_by_hash(&content_hash).await {
            Ok(found) => found,
            Err(e) => {
                warn!("⚠️ Render cache lookup failed, treating as miss: {e}");
                None
            }
        };

        if let Some(record) = &existing {
            if !record.rendered_image_urls.is_empty() {
                info!("♻️ Render cache hit for {}", short_hash(&content_hash));
                let primary = record
                    .primary_rendered_url
                    .clone()
                    .unwrap_or_else(|| record.rendered_image_urls[0].clone());
                return Ok(RenderedAsset {
                    rendered_urls: record.rendered_image_urls.clone(),
                    primary_url: primary,
                    source: RenderSource::Cache,
                    content_hash,
                });
            }
        }

        let model_image = request
            .model_image_url
            .as_deref()
            .unwrap_or(&self.model_image_url);
        // Outer ceiling over the whole render call. The provider enforces
        // its own deadlines, but a misbehaving one must not pin the request.
        let rendered_urls = match tokio::time::timeout(
            config::RENDER_CALL_CEILING,
            self.render_provider.render(source_image_url, model_image),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "❌ Render exceeded {:?} for {}",
                    config::RENDER_CALL_CEILING,
                    short_hash(&content_hash)
                );
                return Err(CatalogError::RenderFailed {
                    source_image_url: source_image_url.to_string(),
                });
            }
        };
        if rendered_urls.is_empty() {
            return Err(CatalogError::RenderFailed {
                source_image_url: source_image_url.to_string(),
            });
        }

        let (flags, disclosure) = compliance::tag_rendered_asset(&content_hash);
        let mut record = existing.unwrap_or_else(|| {
            AssetRecord::new(content_hash.clone(), source_image_url.to_string())
        });
        // Context fields win when provided, already-indexed values otherwise.
        record.source_identifier = request
            .source_identifier
            .clone()
            .or(record.source_identifier.take());
        record.title = request.title.clone().or(record.title.take());
        record.brand = request.brand.clone().or(record.brand.take());
        record.category = request.category.clone().or(record.category.take());
        record.price = request.price.or(record.price);
        record.currency = request.currency.clone().or(record.currency.take());
        if let Some(merchant_url) = &request.merchant_url {
            record.merchant_url = merchant_url.clone();
        }
        record.search_tags = derive_search_tags(
            record.title.as_deref(),
            record.brand.as_deref(),
            record.category.as_deref(),
            record.trend_keyword.as_deref(),
        );
        record.rendered_image_urls = rendered_urls.clone();
        record.primary_rendered_url = rendered_urls.first().cloned();
        record.compliance = flags;
        record.disclosure_text = Some(disclosure);

        // The caller already has the render in hand, so a failed write only
        // costs us a future cache hit.
        if let Err(e) = self.store.upsert(&record).await {
            warn!("⚠️ Failed to persist render for {}: {e}", short_hash(&content_hash));
        }

        info!(
            "✅ Generated {} render(s) for {}",
            rendered_urls.len(),
            short_hash(&content_hash)
        );
        Ok(RenderedAsset {
            primary_url: rendered_urls[0].clone(),
            rendered_urls,
            source: RenderSource::Generated,
            content_hash,
        })
    }

    /// Editorially surfaced items, most recently refreshed first.
    pub async fn trending(&self, user_id: Option<&str>, limit: usize) -> Vec<UnifiedProduct> {
        let records = match self.store.find_trending(limit).await {
            Ok(records) => records,
            Err(e) => {
                warn!("⚠️ Trending lookup failed: {e}");
                return Vec::new();
            }
        };
        let candidates = records.iter().map(Candidate::from_record).collect();
        self.finalize(candidates, None, user_id)
    }

    /// Query every provider concurrently, one bounded timeout each. A
    /// provider that errors or times out contributes an empty list.
    async fn fetch_from_providers(&self, query: &str) -> Vec<(String, Vec<ProviderProduct>)> {
        let calls = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let query = query.to_string();
            async move {
                let name = provider.name().to_string();
                let products = match tokio::time::timeout(
                    config::PROVIDER_TIMEOUT,
                    provider.search(&query, config::PROVIDER_RESULT_LIMIT),
                )
                .await
                {
                    Ok(Ok(products)) => products,
                    Ok(Err(e)) => {
                        warn!("⚠️ Provider {name} failed: {e}");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(
                            "⚠️ Provider {name} timed out after {:?}",
                            config::PROVIDER_TIMEOUT
                        );
                        Vec::new()
                    }
                };
                (name, products)
            }
        });
        futures::future::join_all(calls).await
    }

    /// Fire-and-forget: make freshly fetched products text-searchable for the
    /// next query. Errors are logged, never surfaced.
    fn index_products(&self, products: Vec<ProviderProduct>, category: Option<String>) {
        if products.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut indexed = 0usize;
            for product in products {
                if product.image_url.is_empty() {
                    continue;
                }
                let hash = image_content_hash(&product.image_url);
                let mut record = AssetRecord::new(hash, product.image_url.clone());
                record.source_identifier = product.offer_id.clone();
                record.title = Some(product.title.clone());
                record.brand = product.brand.clone();
                record.category = product.category.clone().or_else(|| category.clone());
                record.price = product.price;
                record.currency = product.currency.clone();
                record.merchant_url = product.merchant_url.clone();
                record.search_tags = derive_search_tags(
                    Some(&product.title),
                    record.brand.as_deref(),
                    record.category.as_deref(),
                    None,
                );
                match store.upsert(&record).await {
                    Ok(()) => indexed += 1,
                    Err(e) => warn!("⚠️ Failed to index {:?}: {e}", product.title),
                }
            }
            if indexed > 0 {
                info!("💾 Indexed {indexed} product(s) into the asset cache");
            }
        });
    }

    /// Final serve step: brand filter, then affiliate rewriting. Nothing
    /// before this point ever sees a wrapped link.
    fn finalize(
        &self,
        mut candidates: Vec<Candidate>,
        brand: Option<&str>,
        user_id: Option<&str>,
    ) -> Vec<UnifiedProduct> {
        if let Some(wanted) = active_brand_filter(brand) {
            candidates.retain(|candidate| {
                candidate
                    .brand
                    .as_deref()
                    .is_some_and(|b| b.eq_ignore_ascii_case(wanted))
            });
        }

        candidates
            .into_iter()
            .map(|candidate| UnifiedProduct {
                affiliate_url: self.linker.wrap(&candidate.merchant_url, user_id),
                id: candidate.id,
                title: candidate.title,
                price: candidate.price,
                currency: candidate.currency,
                image_url: candidate.image_url,
                brand: candidate.brand,
                category: candidate.category,
                merchant_offer_id: candidate.merchant_offer_id,
                source: candidate.source,
            })
            .collect()
    }
}

/// First-seen occurrence of each merge key wins, so order candidates by
/// source priority before calling.
fn dedup_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.merge_key()))
        .collect()
}

/// A brand filter is active unless absent, blank, or the "all" sentinel.
fn active_brand_filter(brand: Option<&str>) -> Option<&str> {
    let brand = brand?.trim();
    if brand.is_empty() || brand.eq_ignore_ascii_case("all") {
        None
    } else {
        Some(brand)
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
