use std::sync::Arc;
use stylecast_server::catalog::affiliate::AffiliateLinker;
use stylecast_server::catalog::providers::ProductProvider;
use stylecast_server::catalog::providers::ebay::EbayProvider;
use stylecast_server::catalog::providers::serpapi::SerpApiProvider;
use stylecast_server::catalog::render::TryOnRenderClient;
use stylecast_server::catalog::service::CatalogService;
use stylecast_server::catalog::sqlite::SqliteAssetStore;
use stylecast_server::config::Settings;
use stylecast_server::generation::GenerationCache;
use stylecast_server::generation::sqlite::SqliteJobStore;
use stylecast_server::{ServiceState, server};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stylecast_server=debug".into()),
        )
        .init();

    let settings = Settings::from_env();

    // DATA_DIR holds one SQLite database shared by both stores
    std::fs::create_dir_all(&settings.data_dir).expect("Failed to create data directory");
    let db_path = settings.db_path();

    let asset_store = Arc::new(
        SqliteAssetStore::new(&db_path).expect("Failed to initialize asset store"),
    );
    let job_store = Arc::new(
        SqliteJobStore::new(&db_path).expect("Failed to initialize generation job store"),
    );

    // Ranked sources; a provider with no credentials is left out entirely
    let mut providers: Vec<Arc<dyn ProductProvider>> = Vec::new();
    if settings.serpapi_key.is_empty() {
        warn!("SERPAPI_API_KEY not set, shopping search provider disabled");
    } else {
        providers.push(Arc::new(SerpApiProvider::new(settings.serpapi_key.clone())));
    }
    if settings.ebay_client_id.is_empty() || settings.ebay_client_secret.is_empty() {
        warn!("EBAY_CLIENT_ID / EBAY_CLIENT_SECRET not set, marketplace provider disabled");
    } else {
        providers.push(Arc::new(EbayProvider::new(
            settings.ebay_client_id.clone(),
            settings.ebay_client_secret.clone(),
        )));
    }

    let render_provider = Arc::new(
        TryOnRenderClient::new(settings.tryon_api_key.clone(), &settings.tryon_api_base)
            .expect("Failed to initialize try-on render client"),
    );
    let linker = AffiliateLinker::new(settings.affiliate_site_id.clone());

    let catalog = CatalogService::new(
        asset_store,
        providers,
        render_provider,
        linker,
        settings.model_image_url.clone(),
    );
    let generation = GenerationCache::new(job_store);

    let state = Arc::new(ServiceState {
        catalog,
        generation,
    });
    let app = server::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .expect("Failed to bind server address");
    info!("StyleCast server listening on http://{}", settings.bind_addr);
    info!("Data directory: {}", settings.data_dir.display());

    axum::serve(listener, app).await.expect("Server error");
}
