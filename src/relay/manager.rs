use crate::config::AppConfig;
use crate::db::models::{ChannelKind, DestinationRecord, MentionPolicy};
use crate::db::queries::destinations;
use crate::delivery::{DeliveryClient, DestinationLiveness, HookRef};
use crate::error::{RelayError, RelayResult};
use crate::relay::destination::{DestinationState, DestinationTarget, RelayTunables};
use crate::relay::poller::SourcePoller;
use crate::statuspage::models::PushNotification;
use crate::statuspage::StatuspageClient;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Marker every statuspage.io-backed page embeds in its root document.
const POLL_MARKER: &str = "SP.pollForChanges('/api/v2/status.json');";
/// Pages carrying this marker offer their own webhook subscriptions; the
/// relay skips active polling for them.
const NATIVE_SUBSCRIPTION_MARKER: &str = "updates-dropdown-webhook-btn";

/// Escalating slow-fetch warning thresholds for the validity probe. The
/// fetch is never aborted; its own timeout is the only bound.
const SLOW_FETCH_WARNINGS_SECS: [u64; 6] = [15, 60, 100, 150, 300, 600];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageValidity {
    Valid,
    ValidWithNativeSubscription,
    Invalid,
    /// A poller for this page already exists; no network probe performed.
    CachedValid,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationSummary {
    pub hook: String,
    pub page_url: String,
    pub target: String,
    pub mention_policy: MentionPolicy,
    pub enabled: bool,
}

/// Owns the registry of sources and destinations, source validity checks,
/// destination liveness verification and the poll scheduler.
pub struct RelayManager {
    pool: PgPool,
    config: Arc<AppConfig>,
    delivery: DeliveryClient,
    statuspage: StatuspageClient,
    tunables: RelayTunables,
    /// hook path ("id/token") -> destination state
    registry: Mutex<HashMap<String, Arc<DestinationState>>>,
    /// page URL -> destinations subscribed to it
    subscribers: Mutex<HashMap<String, Vec<Arc<DestinationState>>>>,
    /// page URL -> active poller
    pollers: Mutex<HashMap<String, Arc<SourcePoller>>>,
    /// pages known to offer native webhook subscriptions, process-wide
    native_subscription: Mutex<HashSet<String>>,
    /// per-URL validity-check guards (single-flight)
    page_check_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RelayManager {
    pub fn new(pool: PgPool, config: Arc<AppConfig>) -> Arc<Self> {
        let delivery = DeliveryClient::new(
            config.delivery_base_url.clone(),
            config.bot_token.clone(),
        );
        let tunables = RelayTunables::from_config(&config);
        Arc::new(Self {
            pool,
            config,
            delivery,
            statuspage: StatuspageClient::new(),
            tunables,
            registry: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            pollers: Mutex::new(HashMap::new()),
            native_subscription: Mutex::new(HashSet::new()),
            page_check_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Load persisted destination records, validate each distinct source
    /// once, start pollers for sources without native subscriptions, then
    /// verify every destination's liveness.
    pub async fn hydrate(self: &Arc<Self>) -> RelayResult<()> {
        warn!("Loading destinations...");
        let records = destinations::list_destinations(&self.pool).await?;
        let mut admitted = 0usize;
        for record in records {
            if self.admit_record(record).await.is_some() {
                admitted += 1;
            }
        }
        info!("Loaded {} destinations, validating sources now...", admitted);

        let pages: Vec<String> = {
            let subscribers = self.subscribers.lock().await;
            subscribers.keys().cloned().collect()
        };
        for page in &pages {
            match self.check_page_exists(page).await {
                PageValidity::Invalid => {
                    error!("{} failed statuspage validity check, ignoring.", page);
                }
                PageValidity::ValidWithNativeSubscription => {
                    debug!("{} offers native subscriptions, not polling it", page);
                }
                PageValidity::Valid | PageValidity::CachedValid => {
                    self.ensure_poller(page).await;
                }
            }
        }

        let hooks: Vec<String> = {
            let registry = self.registry.lock().await;
            registry.keys().cloned().collect()
        };
        for hook in &hooks {
            if let Err(e) = self.check_hook_exists(hook).await {
                error!("Liveness check for {} failed: {}", hook, e);
            }
        }
        info!(
            "Finished loading: {} destinations across {} sources",
            hooks.len(),
            pages.len()
        );
        Ok(())
    }

    async fn admit_record(&self, record: DestinationRecord) -> Option<Arc<DestinationState>> {
        let hook = HookRef {
            id: record.hook_id.clone(),
            token: record.hook_token.clone(),
        };
        let target = if !record.guild_id.is_empty() && !record.channel_id.is_empty() {
            DestinationTarget::Hydrated {
                guild_id: record.guild_id,
                channel_id: record.channel_id,
                channel_kind: record.channel_kind,
                role_id: record.role_id,
            }
        } else {
            DestinationTarget::Unhydrated
        };
        let state = Arc::new(DestinationState::new(
            hook.clone(),
            record.page_url.clone(),
            target,
            record.mention_policy,
            self.delivery.clone(),
            self.tunables,
        ));

        let mut registry = self.registry.lock().await;
        if registry.contains_key(&hook.path()) {
            warn!("Duplicate destination record for {}, skipping", hook);
            return None;
        }
        registry.insert(hook.path(), Arc::clone(&state));
        drop(registry);

        let mut subscribers = self.subscribers.lock().await;
        subscribers
            .entry(record.page_url)
            .or_default()
            .push(Arc::clone(&state));
        Some(state)
    }

    /// Register a new destination: persist the record, admit it into the
    /// registry, and make sure its source is validated and polled. Entry
    /// point for the operator-facing registration surface (chat commands or
    /// an admin endpoint), which lives outside this crate; nothing in-tree
    /// calls it besides that boundary.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_destination(
        self: &Arc<Self>,
        hook: HookRef,
        page_url: String,
        guild_id: String,
        channel_id: String,
        channel_kind: ChannelKind,
        registered_by: String,
        role_id: Option<String>,
        mention_policy: MentionPolicy,
    ) -> RelayResult<DestinationRecord> {
        let record = destinations::insert_destination(
            &self.pool,
            &hook.id,
            &hook.token,
            &page_url,
            &guild_id,
            &channel_id,
            channel_kind,
            &registered_by,
            role_id.as_deref(),
            mention_policy,
        )
        .await?;

        info!(
            "Added destination for {} in {}/#{}, registered by {}",
            page_url, guild_id, channel_id, registered_by
        );
        self.admit_record(record.clone()).await;

        match self.check_page_exists(&page_url).await {
            PageValidity::Invalid => {
                warn!("{} failed validity check after registration", page_url)
            }
            PageValidity::ValidWithNativeSubscription => {}
            PageValidity::Valid | PageValidity::CachedValid => self.ensure_poller(&page_url).await,
        }
        Ok(record)
    }

    /// Remove a destination on operator request. Counterpart to
    /// [`RelayManager::register_destination`], for the same out-of-tree
    /// registration surface.
    pub async fn unregister_destination(&self, hook_path: &str) -> RelayResult<bool> {
        let state = { self.registry.lock().await.get(hook_path).cloned() };
        let Some(state) = state else {
            return Ok(false);
        };
        let deleted = destinations::delete_destination(&self.pool, &state.hook().id).await?;
        self.evict(&state).await;
        Ok(deleted)
    }

    /// Single-flighted source validity check for registration and hydration.
    /// Returns without a network call for pages already known to support
    /// native subscriptions or already being polled.
    pub async fn check_page_exists(&self, page_url: &str) -> PageValidity {
        self.probe_page(page_url, true).await
    }

    /// Re-validation for a source that is already polled but looks gone
    /// (its list endpoints started redirecting). Always probes: the
    /// active-poller cache must not mask a source that moved or was deleted.
    pub async fn revalidate_page(&self, page_url: &str) -> PageValidity {
        self.probe_page(page_url, false).await
    }

    async fn probe_page(&self, page_url: &str, use_poller_cache: bool) -> PageValidity {
        if self.native_subscription.lock().await.contains(page_url) {
            return PageValidity::ValidWithNativeSubscription;
        }
        if reqwest::Url::parse(page_url).is_err() {
            error!("{} failed to be parsed, ignoring.", page_url);
            return PageValidity::Invalid;
        }

        let url_lock = {
            let mut locks = self.page_check_locks.lock().await;
            locks
                .entry(page_url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = url_lock.lock().await;

        if use_poller_cache && self.pollers.lock().await.contains_key(page_url) {
            return PageValidity::CachedValid;
        }

        debug!("Checking if {} exists...", page_url);
        let watcher = spawn_slow_fetch_watcher(page_url.to_string());
        let started = std::time::Instant::now();
        let result = self.statuspage.fetch_root(page_url).await;
        watcher.abort();

        let elapsed = started.elapsed();
        let (status, body) = match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Page {} did not respond in {:?}: {}", page_url, elapsed, e);
                return PageValidity::Invalid;
            }
        };
        if elapsed > Duration::from_secs(15) {
            warn!(
                "Page {} responded with {} in {}ms",
                page_url,
                status,
                elapsed.as_millis()
            );
        }

        if status != 200 || !body.contains(POLL_MARKER) {
            return PageValidity::Invalid;
        }
        if body.contains(NATIVE_SUBSCRIPTION_MARKER) {
            self.native_subscription
                .lock()
                .await
                .insert(page_url.to_string());
            return PageValidity::ValidWithNativeSubscription;
        }
        PageValidity::Valid
    }

    /// Verify a destination still exists. A definitive "gone" is terminal:
    /// the persisted record is deleted and the destination leaves the
    /// registry; there is no retry.
    pub async fn check_hook_exists(&self, hook_path: &str) -> RelayResult<()> {
        let state = { self.registry.lock().await.get(hook_path).cloned() };
        let Some(state) = state else {
            return Ok(());
        };

        match self.delivery.verify_destination(state.hook()).await {
            Ok(DestinationLiveness::Alive) => Ok(()),
            Ok(DestinationLiveness::Gone) => {
                warn!(
                    "Deleting destination {} for {}: webhook no longer exists",
                    state.hook(),
                    state.name()
                );
                match destinations::delete_destination(&self.pool, &state.hook().id).await {
                    Ok(_) => {
                        self.evict(&state).await;
                        Ok(())
                    }
                    Err(e) => {
                        error!("Failed to delete destination {}: {}", state.hook(), e);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                warn!("Failed to verify destination {}: {}", state.hook(), e);
                Ok(())
            }
        }
    }

    async fn evict(&self, state: &Arc<DestinationState>) {
        state.disable();
        let hook_path = state.hook().path();
        self.registry.lock().await.remove(&hook_path);
        let mut subscribers = self.subscribers.lock().await;
        if let Some(states) = subscribers.get_mut(state.page_url()) {
            states.retain(|s| s.hook().path() != hook_path);
            if states.is_empty() {
                subscribers.remove(state.page_url());
            }
        }
    }

    /// Fire-and-forget liveness verification, used from delivery paths that
    /// must not block on it.
    pub fn spawn_hook_check(self: Arc<Self>, hook_path: String) {
        tokio::spawn(async move {
            if let Err(e) = self.check_hook_exists(&hook_path).await {
                error!("Background liveness check for {} failed: {}", hook_path, e);
            }
        });
    }

    /// Stop polling a source; registered destinations stay in place and
    /// resume receiving updates if the source is later re-validated.
    pub async fn remove_source(&self, page_url: &str) {
        if self.pollers.lock().await.remove(page_url).is_some() {
            error!(
                "{} failed statuspage validity check, removed from polling.",
                page_url
            );
        }
    }

    pub async fn subscribers(&self, page_url: &str) -> Vec<Arc<DestinationState>> {
        self.subscribers
            .lock()
            .await
            .get(page_url)
            .map(|states| {
                states
                    .iter()
                    .filter(|s| s.is_enabled())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn has_hook(&self, hook_path: &str) -> bool {
        self.registry.lock().await.contains_key(hook_path)
    }

    /// Read-only snapshot for the listing surface.
    pub async fn list_destinations(&self) -> Vec<DestinationSummary> {
        let registry = self.registry.lock().await;
        let mut summaries: Vec<DestinationSummary> = registry
            .values()
            .map(|state| DestinationSummary {
                hook: state.hook().to_string(),
                page_url: state.page_url().to_string(),
                target: state.name(),
                mention_policy: state.mention_policy(),
                enabled: state.is_enabled(),
            })
            .collect();
        summaries.sort_by(|a, b| a.page_url.cmp(&b.page_url));
        summaries
    }

    /// Deliver an inbound push notification through the same machinery as
    /// the polling path (shared cache, shared idempotency tokens).
    pub async fn handle_push(
        self: &Arc<Self>,
        hook_path: &str,
        payload: PushNotification,
    ) -> RelayResult<()> {
        let state = {
            self.registry
                .lock()
                .await
                .get(hook_path)
                .cloned()
                .ok_or(RelayError::UnknownHook)?
        };

        if let Some(incident) = payload.incident {
            if let Err(RelayError::DestinationGone) =
                state.apply_pushed_incident(&incident).await
            {
                self.clone().spawn_hook_check(hook_path.to_string());
            }
        } else if let Some(delta) = payload.component_update {
            // Component deltas usually trail the incident push that created
            // the message they amend; give it time to land.
            tokio::time::sleep(Duration::from_millis(2500)).await;
            let component_name = payload.component.as_ref().and_then(|c| c.name.as_deref());
            if let Err(RelayError::DestinationGone) =
                state.apply_component_delta(&delta, component_name).await
            {
                self.clone().spawn_hook_check(hook_path.to_string());
            }
        }
        Ok(())
    }

    async fn ensure_poller(self: &Arc<Self>, page_url: &str) {
        let mut pollers = self.pollers.lock().await;
        if pollers.contains_key(page_url) {
            return;
        }
        let poller = Arc::new(SourcePoller::new(
            page_url.to_string(),
            self.statuspage.clone(),
            Arc::downgrade(self),
        ));
        pollers.insert(page_url.to_string(), Arc::clone(&poller));
        drop(pollers);
        // first cycle immediately so backfill does not wait for the scheduler
        tokio::spawn(poller.execute());
    }

    /// Drive all pollers on the configured fixed interval. Slow sources do
    /// not stall the scheduler: each poller runs in its own task and skips
    /// ticks that arrive while a cycle is still executing.
    pub fn spawn_scheduler(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let pollers: Vec<Arc<SourcePoller>> = {
                    let pollers = manager.pollers.lock().await;
                    pollers.values().cloned().collect()
                };
                for poller in pollers {
                    tokio::spawn(poller.execute());
                }
            }
        });
    }
}

fn spawn_slow_fetch_watcher(page_url: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut elapsed = 0u64;
        for threshold in SLOW_FETCH_WARNINGS_SECS {
            tokio::time::sleep(Duration::from_secs(threshold - elapsed)).await;
            elapsed = threshold;
            warn!(
                "Fetching {} has taken longer than {} seconds!",
                page_url, threshold
            );
        }
    })
}
