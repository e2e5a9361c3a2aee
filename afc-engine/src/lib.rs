//! afc-engine library interface
//!
//! The decision engine of the lead CRM: the AFC policy and the dispatcher that
//! applies it, task reconciliation, lifecycle hooks, import, merge and the
//! daily sweep, plus the HTTP surface that exposes them.

pub mod api;
pub mod dispatcher;
pub mod error;
pub mod import;
pub mod lifecycle;
pub mod listener;
pub mod merge;
pub mod payment_sync;
pub mod policy;
pub mod reconciler;
pub mod search_index;
pub mod sweep;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use afc_common::config::TomlConfig;
use afc_common::events::EventBus;
use afc_common::time::offset_from_minutes;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatcher::InteractionDispatcher;
use crate::import::ImportEngine;
use crate::lifecycle::LeadLifecycle;
use crate::merge::MergeEngine;
use crate::policy::{AfcPolicy, AfcSchedule};
use crate::search_index::SearchIndex;
use crate::sweep::DailySweep;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub config: Arc<TomlConfig>,
    pub dispatcher: InteractionDispatcher,
    pub lifecycle: LeadLifecycle,
    pub import: ImportEngine,
    pub merge: MergeEngine,
    pub sweep: DailySweep,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire every component from one configuration
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: TomlConfig,
        search_index: Arc<dyn SearchIndex>,
    ) -> afc_common::Result<Self> {
        let schedule = AfcSchedule::from_config(&config.afc)?;
        let policy = Arc::new(AfcPolicy::new(
            schedule,
            offset_from_minutes(config.local_utc_offset_minutes),
        ));
        let max_wait = config.store.max_lock_wait_ms;

        let dispatcher = InteractionDispatcher::new(db.clone(), event_bus.clone(), policy.clone(), max_wait);
        let lifecycle = LeadLifecycle::new(
            db.clone(),
            event_bus.clone(),
            dispatcher.clone(),
            search_index,
            max_wait,
        );
        let import = ImportEngine::new(
            db.clone(),
            event_bus.clone(),
            policy,
            config.import.batch_limit,
            config.import.preview_size,
            max_wait,
        );
        let merge = MergeEngine::new(db.clone(), event_bus.clone(), max_wait);
        let sweep = DailySweep::new(db.clone(), event_bus.clone(), dispatcher.clone(), max_wait);

        Ok(Self {
            db,
            event_bus,
            config: Arc::new(config),
            dispatcher,
            lifecycle,
            import,
            merge,
            sweep,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::lead_routes())
        .merge(api::task_routes())
        .merge(api::import_routes())
        .merge(api::merge_routes())
        .merge(api::sweep_routes())
        .with_state(state)
}
