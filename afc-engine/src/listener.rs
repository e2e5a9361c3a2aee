//! Change-notification listener
//!
//! Subscribes to the [`EventBus`] and feeds every change event to the
//! lifecycle hooks. This is the in-process delivery path for the store's
//! change notifications; it never stops on a handler error.

use afc_common::events::{ChangeEvent, EventBus};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::lifecycle::LeadLifecycle;

/// Spawn the listener; the subscription is taken before this returns
pub fn spawn_listener(event_bus: &EventBus, lifecycle: LeadLifecycle) -> tokio::task::JoinHandle<()> {
    let rx = event_bus.subscribe();
    tokio::spawn(run_listener(rx, lifecycle))
}

/// Handle events until the bus is dropped
///
/// A lagging receiver loses the oldest events. Writers finish lead
/// initialization, payment reminder sync, task cascades and info-task restarts
/// before emitting, and the sweep starts any lead still without a status. A
/// dropped event costs only its search-index push, which the lead's next
/// change repeats.
pub async fn run_listener(mut rx: broadcast::Receiver<ChangeEvent>, lifecycle: LeadLifecycle) {
    debug!("Change listener started");

    loop {
        match rx.recv().await {
            Ok(event) => lifecycle.handle(&event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Change listener lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Event bus closed, change listener stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InteractionDispatcher;
    use crate::policy::{AfcPolicy, AfcSchedule};
    use crate::search_index::NullSearchIndex;
    use afc_common::db::{init_database, leads};
    use afc_common::model::{Lead, LeadStatus};
    use afc_common::time::offset_from_minutes;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_listener_initializes_created_lead() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("listener.db")).await.unwrap();
        let bus = EventBus::new(64);
        let policy = Arc::new(AfcPolicy::new(AfcSchedule::default(), offset_from_minutes(240)));
        let dispatcher = InteractionDispatcher::new(pool.clone(), bus.clone(), policy, 1000);
        let lifecycle = LeadLifecycle::new(pool.clone(), bus.clone(), dispatcher, Arc::new(NullSearchIndex), 1000);
        let handle = spawn_listener(&bus, lifecycle);

        let lead = Lead::new("Yara", Utc::now());
        let mut conn = pool.acquire().await.unwrap();
        leads::insert_lead(&mut conn, &lead).await.unwrap();
        bus.emit_lossy(ChangeEvent::lead_created(lead.clone()));

        let mut status = None;
        for _ in 0..100 {
            status = leads::load_lead(&mut conn, &lead.id).await.unwrap().unwrap().status;
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, Some(LeadStatus::Active));
        handle.abort();
    }
}
