// =============================================================================
// Central Application State — market-data acquisition core
// =============================================================================
//
// The single source of truth tying the rate governor, shared cache, token
// manager, provider adapters, and the three screening pipelines together.
// Constructed once at startup and shared across all async tasks via
// `Arc<AppState>`.
// =============================================================================

use std::sync::Arc;

use crate::cache::SharedCache;
use crate::providers::broker::BrokerClient;
use crate::providers::crypto_exchange::CryptoExchangeClient;
use crate::providers::krx::{HttpKrxTransport, KrxFetcher};
use crate::providers::us_screener::UsScreenerClient;
use crate::providers::web_scrape::WebScrapeClient;
use crate::rate_limiter::registry::LimiterRegistry;
use crate::recommender::Recommender;
use crate::runtime_config::RuntimeConfig;
use crate::screening::crypto::{CoinGeckoMarketCapSource, CryptoScreener};
use crate::screening::kr::KrScreener;
use crate::screening::us::UsScreener;
use crate::token::TokenManager;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: RuntimeConfig,
    pub limiters: Arc<LimiterRegistry>,
    pub cache: SharedCache,

    pub broker: Arc<BrokerClient>,
    pub crypto_exchange: Arc<CryptoExchangeClient>,
    pub krx: Arc<KrxFetcher<HttpKrxTransport>>,
    pub us_screener_client: Arc<UsScreenerClient>,
    pub web_scrape: Arc<WebScrapeClient>,

    pub kr_screener: KrScreener,
    pub us_screener: UsScreener,
    pub crypto_screener: CryptoScreener,
    pub recommender: Recommender,
}

impl AppState {
    pub async fn new(config: RuntimeConfig) -> Self {
        let limiters = Arc::new(LimiterRegistry::new());
        let cache = SharedCache::connect(&config.redis_url).await;

        let tokens = TokenManager::new(cache.clone());
        let broker = Arc::new(BrokerClient::new(
            config.broker_app_key.clone(),
            config.broker_app_secret.clone(),
            limiters.clone(),
            tokens,
        ));

        let crypto_exchange = Arc::new(CryptoExchangeClient::new(limiters.clone()));
        let krx_transport = HttpKrxTransport::new(limiters.clone());
        let krx = Arc::new(KrxFetcher::new(krx_transport, cache.clone()));
        let us_screener_client = Arc::new(UsScreenerClient::new(limiters.clone()));
        let web_scrape = Arc::new(WebScrapeClient::new(limiters.clone()));

        let kr_screener = KrScreener::new(krx.clone(), broker.clone());
        let us_screener = UsScreener::new(us_screener_client.clone());
        let market_caps = Arc::new(CoinGeckoMarketCapSource::new(limiters.clone()));
        let crypto_screener = CryptoScreener::new(crypto_exchange.clone(), market_caps, cache.clone());
        let recommender = Recommender::new(crypto_exchange.clone());

        Self {
            config,
            limiters,
            cache,
            broker,
            crypto_exchange,
            krx,
            us_screener_client,
            web_scrape,
            kr_screener,
            us_screener,
            crypto_screener,
            recommender,
        }
    }
}
