#[cfg(test)]
mod tests {
    use crate::catalog::affiliate::AffiliateLinker;
    use crate::catalog::hash::image_content_hash;
    use crate::catalog::providers::{ProductProvider, ProviderProduct, fallback_products};
    use crate::catalog::render::RenderProvider;
    use crate::catalog::service::{CatalogService, RenderSource, TryOnRequest};
    use crate::catalog::sqlite::SqliteAssetStore;
    use crate::catalog::{AssetRecord, AssetStore, CatalogError, derive_search_tags};
    use crate::config;
    use crate::generation::sqlite::SqliteJobStore;
    use crate::generation::{
        CacheDecision, GenerationCache, GenerationJob, GenerationParams, JobStatus, JobStore,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct MockProvider {
        provider_name: &'static str,
        products: Vec<ProviderProduct>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(provider_name: &'static str, products: Vec<ProviderProduct>) -> Arc<Self> {
            Arc::new(Self {
                provider_name,
                products,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ProductProvider for MockProvider {
        fn name(&self) -> &str {
            self.provider_name
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<ProviderProduct>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.products.clone())
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl ProductProvider for FailingProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<ProviderProduct>, CatalogError> {
            Err(CatalogError::Upstream("connection refused".to_string()))
        }
    }

    struct SlowProvider {
        delay: Duration,
        products: Vec<ProviderProduct>,
    }

    #[async_trait::async_trait]
    impl ProductProvider for SlowProvider {
        fn name(&self) -> &str {
            "sluggish"
        }

        async fn search(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<ProviderProduct>, CatalogError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.products.clone())
        }
    }

    struct MockRenderProvider {
        outputs: Vec<String>,
        calls: AtomicUsize,
    }

    impl MockRenderProvider {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                outputs: vec!["https://cdn.render.example/out-1.png".to_string()],
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                outputs: Vec::new(),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RenderProvider for MockRenderProvider {
        async fn render(
            &self,
            source_image_url: &str,
            _model_image_url: &str,
        ) -> Result<Vec<String>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.outputs.is_empty() {
                return Err(CatalogError::RenderFailed {
                    source_image_url: source_image_url.to_string(),
                });
            }
            Ok(self.outputs.clone())
        }
    }

    struct HangingRenderProvider;

    #[async_trait::async_trait]
    impl RenderProvider for HangingRenderProvider {
        async fn render(
            &self,
            _source_image_url: &str,
            _model_image_url: &str,
        ) -> Result<Vec<String>, CatalogError> {
            std::future::pending().await
        }
    }

    fn test_service(
        providers: Vec<Arc<dyn ProductProvider>>,
        render: Arc<dyn RenderProvider>,
    ) -> (CatalogService, Arc<SqliteAssetStore>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteAssetStore::new(temp_dir.path().join("test.db")).unwrap());
        let service = CatalogService::new(
            store.clone(),
            providers,
            render,
            AffiliateLinker::new("123456X789"),
            "https://cdn.stylecast.app/models/studio-default.jpg",
        );
        (service, store, temp_dir)
    }

    fn cached_record(index: usize, brand: &str) -> AssetRecord {
        let image_url = format!("https://img.example.com/cached-{index}.jpg");
        let title = format!("Leather Jacket {index}");
        let mut record = AssetRecord::new(image_content_hash(&image_url), image_url);
        record.search_tags =
            derive_search_tags(Some(&title), Some(brand), Some("Outerwear"), None);
        record.title = Some(title);
        record.brand = Some(brand.to_string());
        record.category = Some("Outerwear".to_string());
        record.merchant_url = format!("https://shop.example.com/item/{index}");
        record
    }

    fn provider_product(title: &str, image_url: &str) -> ProviderProduct {
        ProviderProduct {
            title: title.to_string(),
            price: Some(99.0),
            currency: Some("USD".to_string()),
            image_url: image_url.to_string(),
            merchant_url: format!("https://shop.example.com/p/{}", title.len()),
            brand: None,
            category: None,
            merchant_name: None,
            offer_id: None,
        }
    }

    async fn wait_for_indexed(store: &SqliteAssetStore, content_hash: &str) -> AssetRecord {
        for _ in 0..50 {
            if let Some(record) = store.find_by_hash(content_hash).await.unwrap() {
                return record;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("asset {content_hash} was never indexed");
    }

    #[tokio::test]
    async fn test_sufficient_cache_skips_providers() {
        let provider = MockProvider::new("serpapi", vec![provider_product("x", "https://img.example.com/x.jpg")]);
        let (service, store, _dir) = test_service(vec![provider.clone()], MockRenderProvider::succeeding());

        for i in 0..5 {
            store.upsert(&cached_record(i, "Acme")).await.unwrap();
        }

        let results = service.search("leather", Some("u1"), None, None).await;

        assert_eq!(results.len(), 5);
        assert_eq!(provider.call_count(), 0, "providers must not be called on a full cache hit");
        for product in &results {
            assert_eq!(product.source, "cache");
            assert!(product.affiliate_url.starts_with("https://go.skimresources.com/"));
            assert!(product.affiliate_url.contains("xcust=u1"));
        }
    }

    #[tokio::test]
    async fn test_insufficient_cache_merges_with_cache_priority() {
        let provider = MockProvider::new(
            "serpapi",
            vec![
                // Same title as a cached row, so the cached copy must win.
                provider_product("Leather Jacket 0", "https://img.example.com/serp-dup.jpg"),
                provider_product("Suede Moto Jacket", "https://img.example.com/serp-new.jpg"),
            ],
        );
        let (service, store, _dir) = test_service(vec![provider.clone()], MockRenderProvider::succeeding());

        for i in 0..4 {
            store.upsert(&cached_record(i, "Acme")).await.unwrap();
        }

        let results = service.search("leather", None, None, None).await;

        assert_eq!(provider.call_count(), 1);
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|p| p.source == "cache").count(), 4);
        let fresh = results
            .iter()
            .find(|p| p.title == "Suede Moto Jacket")
            .expect("provider item should survive the merge");
        assert_eq!(fresh.source, "serpapi");
        // The duplicate title came back from the cache, not the provider.
        let dup = results.iter().find(|p| p.title == "Leather Jacket 0").unwrap();
        assert_eq!(dup.source, "cache");
    }

    #[tokio::test]
    async fn test_brand_filter_applies_after_sufficiency() {
        let provider = MockProvider::new("serpapi", Vec::new());
        let (service, store, _dir) = test_service(vec![provider.clone()], MockRenderProvider::succeeding());

        for i in 0..3 {
            store.upsert(&cached_record(i, "Acme")).await.unwrap();
        }
        for i in 3..5 {
            store.upsert(&cached_record(i, "Vella")).await.unwrap();
        }

        let results = service.search("leather", None, None, Some("Acme")).await;

        // Sufficiency is judged on the raw lookup, so no provider call even
        // though the filtered result is smaller than the threshold.
        assert_eq!(provider.call_count(), 0);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|p| p.brand.as_deref() == Some("Acme")));
    }

    #[tokio::test]
    async fn test_all_sources_empty_serves_fallback_floor() {
        let empty = MockProvider::new("serpapi", Vec::new());
        let (service, _store, _dir) =
            test_service(vec![empty, Arc::new(FailingProvider)], MockRenderProvider::succeeding());

        let results = service.search("obscure query", Some("u1"), None, None).await;

        assert!(!results.is_empty(), "search must never return an empty list");
        assert_eq!(results.len(), fallback_products().len());
        for product in &results {
            assert_eq!(product.source, "fallback");
            // Placeholder links pass through the affiliate layer untouched.
            assert_eq!(product.affiliate_url, "#");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_is_timed_out_not_awaited() {
        let fast = MockProvider::new(
            "serpapi",
            vec![provider_product("Fast Leather Jacket", "https://img.example.com/fast-1.jpg")],
        );
        let slow = Arc::new(SlowProvider {
            delay: config::PROVIDER_TIMEOUT + Duration::from_secs(30),
            products: vec![provider_product(
                "Late Leather Jacket",
                "https://img.example.com/late-1.jpg",
            )],
        });
        let (service, store, _dir) =
            test_service(vec![fast, slow], MockRenderProvider::succeeding());

        let started = tokio::time::Instant::now();
        let results = service.search("leather", None, None, None).await;
        let elapsed = started.elapsed();

        // The fan-out waits for the per-provider ceiling, not the slow call.
        assert!(elapsed >= config::PROVIDER_TIMEOUT);
        assert!(elapsed < config::PROVIDER_TIMEOUT + Duration::from_secs(1));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Fast Leather Jacket");
        assert_eq!(results[0].source, "serpapi");

        // Only the fast provider's item gets indexed.
        wait_for_indexed(&store, &image_content_hash("https://img.example.com/fast-1.jpg")).await;
        assert!(
            store
                .find_by_hash(&image_content_hash("https://img.example.com/late-1.jpg"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_render_cache_hit_avoids_rerender() {
        let render = MockRenderProvider::succeeding();
        let (service, store, _dir) = test_service(Vec::new(), render.clone());

        let image_url = "https://img.example.com/cached-render.jpg";
        let mut record = AssetRecord::new(
            image_content_hash(image_url),
            image_url.to_string(),
        );
        record.rendered_image_urls = vec!["https://cdn.render.example/prior.png".to_string()];
        record.primary_rendered_url = Some("https://cdn.render.example/prior.png".to_string());
        store.upsert(&record).await.unwrap();

        let asset = service
            .render_try_on(&TryOnRequest::for_image(image_url))
            .await
            .unwrap();

        assert_eq!(render.call_count(), 0, "cached render must not hit the provider");
        assert_eq!(asset.source, RenderSource::Cache);
        assert_eq!(asset.rendered_urls, vec!["https://cdn.render.example/prior.png".to_string()]);
        assert_eq!(asset.primary_url, "https://cdn.render.example/prior.png");
    }

    #[tokio::test]
    async fn test_render_miss_generates_and_persists_once() {
        let render = MockRenderProvider::succeeding();
        let (service, store, _dir) = test_service(Vec::new(), render.clone());

        let image_url = "https://img.example.com/product-9.jpg";
        let request = TryOnRequest {
            title: Some("Vintage Leather Jacket".to_string()),
            brand: Some("Schott".to_string()),
            category: Some("Outerwear".to_string()),
            merchant_url: Some("https://shop.example.com/item/9".to_string()),
            ..TryOnRequest::for_image(image_url)
        };
        let asset = service.render_try_on(&request).await.unwrap();

        assert_eq!(asset.source, RenderSource::Generated);
        assert_eq!(asset.content_hash, image_content_hash(image_url));
        assert_eq!(render.call_count(), 1);

        let stored = store
            .find_by_hash(&asset.content_hash)
            .await
            .unwrap()
            .expect("render must be persisted");
        assert!(!stored.rendered_image_urls.is_empty());
        assert!(stored.compliance.ai_disclosure_applied);
        assert!(stored.compliance.synthetic_watermark_applied);
        assert!(stored.disclosure_text.is_some());
        // Descriptive context from the request lands on the record.
        assert_eq!(stored.title.as_deref(), Some("Vintage Leather Jacket"));
        assert_eq!(stored.merchant_url, "https://shop.example.com/item/9");
        assert!(stored.search_tags.contains("schott"));

        // Second request for the same image is served from the cache.
        let again = service.render_try_on(&request).await.unwrap();
        assert_eq!(again.source, RenderSource::Cache);
        assert_eq!(render.call_count(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_is_surfaced_and_not_persisted() {
        let render = MockRenderProvider::failing();
        let (service, store, _dir) = test_service(Vec::new(), render.clone());

        let image_url = "https://img.example.com/unrenderable.jpg";
        let err = service
            .render_try_on(&TryOnRequest::for_image(image_url))
            .await
            .unwrap_err();

        match err {
            CatalogError::RenderFailed { source_image_url } => {
                assert_eq!(source_image_url, image_url);
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }

        // A failed render must not leave an empty record that would mask
        // future misses.
        let hash = image_content_hash(image_url);
        assert!(store.find_by_hash(&hash).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_render_provider_is_bounded() {
        let (service, store, _dir) = test_service(Vec::new(), Arc::new(HangingRenderProvider));

        let image_url = "https://img.example.com/stuck.jpg";
        let started = tokio::time::Instant::now();
        let err = service
            .render_try_on(&TryOnRequest::for_image(image_url))
            .await
            .unwrap_err();

        // A render call that never resolves fails at the ceiling instead of
        // pinning the request.
        match err {
            CatalogError::RenderFailed { source_image_url } => {
                assert_eq!(source_image_url, image_url);
            }
            other => panic!("expected RenderFailed, got {other:?}"),
        }
        assert!(started.elapsed() >= config::RENDER_CALL_CEILING);
        assert!(started.elapsed() < config::RENDER_CALL_CEILING + Duration::from_secs(1));

        let hash = image_content_hash(image_url);
        assert!(store.find_by_hash(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_indexes_provider_results_end_to_end() {
        let serpapi = MockProvider::new(
            "serpapi",
            vec![provider_product("Vintage Leather Jacket", "https://img.example.com/serp-1.jpg")],
        );
        let ebay = MockProvider::new(
            "ebay",
            vec![provider_product("Suede Leather Jacket", "https://img.example.com/ebay-1.jpg")],
        );
        let (service, store, _dir) =
            test_service(vec![serpapi, ebay], MockRenderProvider::succeeding());

        let results = service
            .search("leather jacket", Some("u1"), Some("Outerwear"), None)
            .await;

        assert_eq!(results.len(), 2, "distinct titles must both survive the merge");
        assert_eq!(results[0].source, "serpapi");
        assert_eq!(results[1].source, "ebay");
        for product in &results {
            assert!(product.affiliate_url.contains("xcust=u1"));
        }

        // Background indexing lands both items keyed by their image hash.
        for image_url in ["https://img.example.com/serp-1.jpg", "https://img.example.com/ebay-1.jpg"] {
            let record = wait_for_indexed(&store, &image_content_hash(image_url)).await;
            assert!(record.rendered_image_urls.is_empty());
            assert_eq!(record.category.as_deref(), Some("Outerwear"));
            assert!(!record.search_tags.is_empty());
        }
    }

    fn generation_cache() -> (GenerationCache, Arc<SqliteJobStore>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap());
        (GenerationCache::new(store.clone()), store, temp_dir)
    }

    fn beach_params() -> GenerationParams {
        GenerationParams {
            prompt: "Model walking on a beach at sunset".to_string(),
            model: "video-v2".to_string(),
            resolution: "1080p".to_string(),
            duration_seconds: Some(8),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generation_cache_hit_after_completion() {
        let (cache, _store, _dir) = generation_cache();
        let params = beach_params();

        let miss = cache.check("u1", &params).await;
        assert_eq!(
            miss,
            CacheDecision::Miss {
                content_hash: params.content_hash()
            }
        );

        let job = cache.begin_job("u1", &params).await.unwrap();
        cache
            .complete_job(&job.id, "https://cdn.example.com/video.mp4")
            .await
            .unwrap();

        match cache.check("u1", &params).await {
            CacheDecision::Hit {
                output_reference,
                job_id,
            } => {
                assert_eq!(output_reference, "https://cdn.example.com/video.mp4");
                assert_eq!(job_id, job.id);
            }
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generation_cache_is_user_scoped() {
        let (cache, _store, _dir) = generation_cache();
        let params = beach_params();

        let job = cache.begin_job("user-a", &params).await.unwrap();
        cache.complete_job(&job.id, "out").await.unwrap();

        assert!(matches!(
            cache.check("user-a", &params).await,
            CacheDecision::Hit { .. }
        ));
        // Identical parameters, different user: never shared.
        assert_eq!(
            cache.check("user-b", &params).await,
            CacheDecision::Miss {
                content_hash: params.content_hash()
            }
        );
    }

    #[tokio::test]
    async fn test_spliced_param_values_never_share_cache_entries() {
        let (cache, _store, _dir) = generation_cache();

        // Newlines are legal in request strings. A value crafted to mimic a
        // neighboring field's serialization must still key its own entry.
        let plain = GenerationParams {
            aspect_ratio: "a".to_string(),
            camera_move: "b\ncamera_move=".to_string(),
            ..Default::default()
        };
        let spliced = GenerationParams {
            aspect_ratio: "a\ncamera_move=b".to_string(),
            ..Default::default()
        };
        assert_ne!(plain.content_hash(), spliced.content_hash());

        let job = cache.begin_job("u1", &plain).await.unwrap();
        cache
            .complete_job(&job.id, "https://cdn.example.com/plain.mp4")
            .await
            .unwrap();

        assert!(matches!(
            cache.check("u1", &plain).await,
            CacheDecision::Hit { .. }
        ));
        assert!(matches!(
            cache.check("u1", &spliced).await,
            CacheDecision::Miss { .. }
        ));
    }

    #[tokio::test]
    async fn test_generation_cache_freshness_window() {
        let (cache, store, _dir) = generation_cache();
        let params = beach_params();

        let stale = GenerationJob {
            id: "job-stale".to_string(),
            user_id: "u1".to_string(),
            content_hash: params.content_hash(),
            status: JobStatus::Completed,
            output_reference: Some("out-stale".to_string()),
            created_at: Utc::now() - ChronoDuration::hours(25),
        };
        store.insert(&stale).await.unwrap();

        assert!(matches!(
            cache.check("u1", &params).await,
            CacheDecision::Miss { .. }
        ));

        let fresh = GenerationJob {
            id: "job-fresh".to_string(),
            created_at: Utc::now() - ChronoDuration::hours(23),
            output_reference: Some("out-fresh".to_string()),
            ..stale
        };
        store.insert(&fresh).await.unwrap();

        match cache.check("u1", &params).await {
            CacheDecision::Hit { job_id, .. } => assert_eq!(job_id, "job-fresh"),
            other => panic!("expected a hit inside the window, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_jobs_never_hit() {
        let (cache, _store, _dir) = generation_cache();
        let params = beach_params();

        let job = cache.begin_job("u1", &params).await.unwrap();
        cache.fail_job(&job.id).await.unwrap();

        assert!(matches!(
            cache.check("u1", &params).await,
            CacheDecision::Miss { .. }
        ));
    }
}
