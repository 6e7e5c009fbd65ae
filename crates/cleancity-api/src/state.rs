//! Application state shared across all route handlers and tool calls.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use cleancity_core::config::CleanCityConfig;
use cleancity_core::estimator::Estimator;
use cleancity_insight::{HotspotAnalyzer, ReportFormatter};
use cleancity_providers::{OfflineEnhancer, OfflineVision, ReportEnhancer, VisionProvider};
use cleancity_storage::{Database, EventStore};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. The store,
/// the analyzer and the reporting path share one [`Estimator`].
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CleanCityConfig>,
    pub estimator: Arc<Estimator>,
    pub store: Arc<EventStore>,
    pub hotspots: Arc<HotspotAnalyzer>,
    pub formatter: ReportFormatter,
    pub enhancer: Arc<dyn ReportEnhancer>,
    pub vision: Arc<dyn VisionProvider>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services around an opened database.
    pub fn new(
        config: CleanCityConfig,
        database: Database,
        enhancer: Arc<dyn ReportEnhancer>,
        vision: Arc<dyn VisionProvider>,
    ) -> Self {
        let estimator = Arc::new(Estimator::new(config.estimator.clone()));
        let store = Arc::new(EventStore::new(Arc::new(database), Arc::clone(&estimator)));
        let hotspots = Arc::new(HotspotAnalyzer::new(
            Arc::clone(&store),
            config.hotspots.clone(),
        ));

        Self {
            config: Arc::new(config),
            estimator,
            store,
            hotspots,
            formatter: ReportFormatter::new(),
            enhancer,
            vision,
            start_time: Instant::now(),
        }
    }

    /// State with offline providers, for tests and local tooling.
    pub fn offline(config: CleanCityConfig, database: Database) -> Self {
        Self::new(
            config,
            database,
            Arc::new(OfflineEnhancer),
            Arc::new(OfflineVision),
        )
    }
}
