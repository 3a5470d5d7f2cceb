use crate::relay::manager::{PageValidity, RelayManager};
use crate::statuspage::models::Incident;
use crate::statuspage::StatuspageClient;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Polls one status source and fans observed updates out to every
/// destination subscribed to it.
pub struct SourcePoller {
    page_url: String,
    client: StatuspageClient,
    manager: Weak<RelayManager>,
    /// One-slot tick guard: a tick arriving while the previous cycle is
    /// still executing is skipped outright, never queued.
    tick_lock: Mutex<()>,
}

impl SourcePoller {
    pub fn new(page_url: String, client: StatuspageClient, manager: Weak<RelayManager>) -> Self {
        Self {
            page_url,
            client,
            manager,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub async fn execute(self: Arc<Self>) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            return;
        };
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        let (incidents_fetch, maintenances_fetch) = tokio::join!(
            self.client.fetch_incidents(&self.page_url),
            self.client.fetch_maintenances(&self.page_url)
        );

        let (incidents_fetch, maintenances_fetch) = match (incidents_fetch, maintenances_fetch) {
            (Err(inc_err), Err(maint_err)) => {
                warn!(
                    "Failed to check status for page \"{}\": {}; {}",
                    self.page_url, inc_err, maint_err
                );
                return;
            }
            (inc, maint) => (inc.ok(), maint.ok()),
        };

        let statuses: Vec<u16> = [&incidents_fetch, &maintenances_fetch]
            .iter()
            .filter_map(|f| f.as_ref().map(|f| f.status))
            .collect();
        if !statuses.contains(&200) {
            warn!(
                "Failed to check status for page \"{}\" with status codes {:?}",
                self.page_url, statuses
            );
            // A redirect suggests the page moved or was deleted; re-validate
            // and stop polling it if the check confirms.
            let redirected = [&incidents_fetch, &maintenances_fetch]
                .iter()
                .any(|f| f.as_ref().is_some_and(|f| f.is_redirect()));
            if redirected
                && manager.revalidate_page(&self.page_url).await == PageValidity::Invalid
            {
                manager.remove_source(&self.page_url).await;
            }
            return;
        }

        let mut incidents: Vec<Incident> = Vec::new();
        for fetch in [incidents_fetch, maintenances_fetch].into_iter().flatten() {
            if fetch.status == 200 {
                incidents.extend(fetch.incidents);
            }
        }
        incidents.sort_by_key(|i| i.created_at);

        let subscribers = manager.subscribers(&self.page_url).await;
        if subscribers.is_empty() {
            return;
        }

        // One-time backfill per destination lifetime, before any evaluation
        for state in &subscribers {
            if state.is_backfilled().await {
                continue;
            }
            if let Err(e) = state.backfill(&incidents).await {
                error!("Backfill failed for {}: {}", state.name(), e);
                manager.clone().spawn_hook_check(state.hook().path());
            }
        }

        if incidents.is_empty() || incidents.iter().any(|i| i.incident_updates.is_empty()) {
            return;
        }

        // Concurrent across destinations; per-destination order follows the
        // sorted incident order and, within an incident, update creation order.
        let incidents = Arc::new(incidents);
        let mut tasks = JoinSet::new();
        for state in subscribers {
            let incidents = Arc::clone(&incidents);
            let manager = Arc::clone(&manager);
            tasks.spawn(async move {
                for incident in incidents.iter() {
                    let mut updates: Vec<_> = incident.incident_updates.iter().collect();
                    updates.sort_by_key(|u| u.created_at);
                    for update in updates {
                        if let Err(e) = state.observe_update(incident, update).await {
                            warn!(
                                "Delivery to {} failed, scheduling liveness check: {}",
                                state.name(),
                                e
                            );
                            manager.clone().spawn_hook_check(state.hook().path());
                            return;
                        }
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}
