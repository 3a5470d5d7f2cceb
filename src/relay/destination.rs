use crate::config::AppConfig;
use crate::db::models::{ChannelKind, MentionPolicy};
use crate::delivery::{DeliveryClient, HookRef};
use crate::error::{RelayError, RelayResult};
use crate::relay::render::{render_update, CanonicalEmbed, Embed};
use crate::statuspage::models::{
    AffectedComponent, ComponentUpdate, Incident, IncidentUpdate,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Tunables the delivery decision depends on, lifted out of `AppConfig` so
/// destination states do not carry the whole config around.
#[derive(Debug, Clone, Copy)]
pub struct RelayTunables {
    /// Updates older than this that were never delivered are permanently
    /// skipped (keeps old backlog out of newly registered destinations).
    pub stale_after: Duration,
    /// An update older than this with no revision timestamp is not sent.
    pub freshness_window: Duration,
    /// History page size for backfill reconciliation.
    pub history_limit: u8,
}

impl RelayTunables {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stale_after: Duration::hours(config.stale_update_hours),
            freshness_window: Duration::hours(config.freshness_window_hours),
            history_limit: config.backfill_history_limit,
        }
    }
}

/// Where a destination posts. Hydrated targets carry the channel metadata
/// needed for backfill, role mentions and republishing; unhydrated targets
/// are addressed by the webhook credentials alone.
#[derive(Debug, Clone)]
pub enum DestinationTarget {
    Hydrated {
        guild_id: String,
        channel_id: String,
        channel_kind: ChannelKind,
        role_id: Option<String>,
    },
    Unhydrated,
}

impl DestinationTarget {
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            DestinationTarget::Hydrated { channel_id, .. } => Some(channel_id),
            DestinationTarget::Unhydrated => None,
        }
    }

    pub fn role_mention(&self) -> Option<String> {
        match self {
            DestinationTarget::Hydrated {
                role_id: Some(role_id),
                ..
            } => Some(format!("<@&{}>", role_id)),
            _ => None,
        }
    }

    pub fn supports_republish(&self) -> bool {
        matches!(
            self,
            DestinationTarget::Hydrated {
                channel_kind: ChannelKind::Announcement,
                ..
            }
        )
    }

    fn display(&self, hook: &HookRef) -> String {
        match self {
            DestinationTarget::Hydrated {
                guild_id,
                channel_id,
                ..
            } => format!("{}/#{}", guild_id, channel_id),
            DestinationTarget::Unhydrated => hook.to_string(),
        }
    }
}

/// One delivered (incident, update) pair. Plain value type; deleted entries
/// are kept for audit but excluded from comparisons.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub incident_id: String,
    pub update_id: String,
    pub message_id: String,
    pub canonical: CanonicalEmbed,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backfill {
    NotStarted,
    Running,
    Complete,
}

/// The latest update delivered through the inbound push path, kept so
/// component-status deltas can be merged into it and re-edited.
struct PushedUpdate {
    incident: Incident,
    update: IncidentUpdate,
    message_id: String,
}

struct DestinationInner {
    /// update id -> delivered message; at most one entry per (incident, update)
    messages: HashMap<String, DeliveredMessage>,
    /// update ids permanently excluded from delivery
    skip_list: HashSet<String>,
    /// last update id delivered through the send path
    last_update_id: Option<String>,
    backfill: Backfill,
    latest_push: Option<PushedUpdate>,
}

/// Why an update was not delivered this evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// On the permanent skip list.
    Ignored,
    /// Backfill has not completed; nothing is sent until it has.
    BackfillPending,
    /// Identical to what the destination already shows.
    Unchanged,
    /// Same id as the last delivered update, nothing cached to compare.
    AlreadyHandled,
    /// Older than the staleness threshold; permanently skipped.
    Stale,
    /// A newer update exists within the incident; permanently skipped.
    Superseded,
    /// Past the freshness window with no revision timestamp.
    MissedWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    Send { mention: bool },
    Edit { message_id: String },
}

/// Pure delivery decision for one (incident, update) pair against a
/// destination's cached state. All network side effects happen elsewhere.
fn evaluate_update(
    inner: &DestinationInner,
    incident: &Incident,
    update: &IncidentUpdate,
    embed: &Embed,
    policy: MentionPolicy,
    now: DateTime<Utc>,
    tunables: &RelayTunables,
) -> Decision {
    if inner.skip_list.contains(&update.id) {
        return Decision::Skip(SkipReason::Ignored);
    }
    if inner.backfill != Backfill::Complete {
        return Decision::Skip(SkipReason::BackfillPending);
    }

    let canonical = CanonicalEmbed::of(embed);
    if let Some(existing) = inner.messages.get(&update.id) {
        if !existing.deleted {
            return if existing.canonical == canonical {
                Decision::Skip(SkipReason::Unchanged)
            } else {
                Decision::Edit {
                    message_id: existing.message_id.clone(),
                }
            };
        }
        // deleted entries fall through so the send path can recreate
    } else if inner.last_update_id.as_deref() == Some(update.id.as_str()) {
        return Decision::Skip(SkipReason::AlreadyHandled);
    }

    if now.signed_duration_since(update.created_at) > tunables.stale_after {
        return Decision::Skip(SkipReason::Stale);
    }

    // Only the most current state of an incident goes out; superseded
    // intermediate states are never replayed out of order.
    if let Some(latest) = incident.latest_update_timestamp() {
        if latest > update.effective_timestamp() {
            return Decision::Skip(SkipReason::Superseded);
        }
    }

    if update.updated_at.is_none()
        && now.signed_duration_since(update.created_at) > tunables.freshness_window
    {
        return Decision::Skip(SkipReason::MissedWindow);
    }

    let is_first = incident.update_ids_by_creation().first().copied() == Some(update.id.as_str());
    Decision::Send {
        mention: policy == MentionPolicy::EveryUpdate || is_first,
    }
}

/// Per (source, destination) delivery state. All mutable state lives behind
/// one mutex: decide/send/edit/backfill are serialized per destination, and
/// concurrent backfill requesters block on the lock until the single run has
/// marked itself complete.
pub struct DestinationState {
    hook: HookRef,
    page_url: String,
    target: DestinationTarget,
    mention_policy: MentionPolicy,
    client: DeliveryClient,
    tunables: RelayTunables,
    enabled: AtomicBool,
    inner: Mutex<DestinationInner>,
}

impl DestinationState {
    pub fn new(
        hook: HookRef,
        page_url: String,
        target: DestinationTarget,
        mention_policy: MentionPolicy,
        client: DeliveryClient,
        tunables: RelayTunables,
    ) -> Self {
        Self {
            hook,
            page_url,
            target,
            mention_policy,
            client,
            tunables,
            enabled: AtomicBool::new(true),
            inner: Mutex::new(DestinationInner {
                messages: HashMap::new(),
                skip_list: HashSet::new(),
                last_update_id: None,
                backfill: Backfill::NotStarted,
                latest_push: None,
            }),
        }
    }

    pub fn hook(&self) -> &HookRef {
        &self.hook
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn target(&self) -> &DestinationTarget {
        &self.target
    }

    pub fn mention_policy(&self) -> MentionPolicy {
        self.mention_policy
    }

    pub fn name(&self) -> String {
        self.target.display(&self.hook)
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn is_backfilled(&self) -> bool {
        self.inner.lock().await.backfill == Backfill::Complete
    }

    /// Decide and, if warranted, deliver one update. Returns
    /// `Err(DestinationGone)` when the destination should be re-verified;
    /// recoverable delivery failures are logged and swallowed since the next
    /// poll re-evaluates from content.
    pub async fn observe_update(
        &self,
        incident: &Incident,
        update: &IncidentUpdate,
    ) -> RelayResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        let embed = render_update(incident, update);
        let decision = evaluate_update(
            &inner,
            incident,
            update,
            &embed,
            self.mention_policy,
            Utc::now(),
            &self.tunables,
        );

        match decision {
            Decision::Skip(SkipReason::Stale) => {
                debug!(
                    "Permanently skipping stale update {}/{} for {}",
                    incident.id, update.id, self.name()
                );
                inner.skip_list.insert(update.id.clone());
                Ok(())
            }
            Decision::Skip(SkipReason::Superseded) => {
                debug!(
                    "Permanently skipping superseded update {}/{} for {}",
                    incident.id, update.id, self.name()
                );
                inner.skip_list.insert(update.id.clone());
                Ok(())
            }
            Decision::Skip(_) => Ok(()),
            Decision::Edit { message_id } => {
                self.edit_delivered(&mut inner, incident, update, &embed, &message_id)
                    .await
            }
            Decision::Send { mention } => {
                self.send_update(&mut inner, incident, update, &embed, mention)
                    .await
            }
        }
    }

    async fn send_update(
        &self,
        inner: &mut DestinationInner,
        incident: &Incident,
        update: &IncidentUpdate,
        embed: &Embed,
        mention: bool,
    ) -> RelayResult<()> {
        let content = if mention {
            self.target.role_mention()
        } else {
            None
        };

        match self
            .client
            .create_message(&self.hook, embed, content.as_deref(), &update.id)
            .await
        {
            Ok(message) => {
                info!(
                    "Sent update for {} {} from page {} to {}",
                    incident.kind(),
                    incident.name,
                    self.page_url,
                    self.name()
                );
                inner.messages.insert(
                    update.id.clone(),
                    DeliveredMessage {
                        incident_id: incident.id.clone(),
                        update_id: update.id.clone(),
                        message_id: message.id.clone(),
                        canonical: CanonicalEmbed::of(embed),
                        deleted: false,
                    },
                );
                inner.last_update_id = Some(update.id.clone());
                self.maybe_republish(message.id);
                Ok(())
            }
            Err(RelayError::DestinationGone) => Err(RelayError::DestinationGone),
            Err(e) => {
                warn!(
                    "Failed to send update for {}/{} to {}: {}",
                    incident.id, update.id, self.name(), e
                );
                Ok(())
            }
        }
    }

    async fn edit_delivered(
        &self,
        inner: &mut DestinationInner,
        incident: &Incident,
        update: &IncidentUpdate,
        embed: &Embed,
        message_id: &str,
    ) -> RelayResult<()> {
        match self
            .client
            .edit_message(&self.hook, message_id, embed, &update.id)
            .await
        {
            Ok(message) => {
                info!(
                    "Edited update for incident {} from page {} in {}",
                    incident.name, self.page_url, self.name()
                );
                inner.messages.insert(
                    update.id.clone(),
                    DeliveredMessage {
                        incident_id: incident.id.clone(),
                        update_id: update.id.clone(),
                        message_id: message.id,
                        canonical: CanonicalEmbed::of(embed),
                        deleted: false,
                    },
                );
                Ok(())
            }
            Err(RelayError::MessageGone) => {
                warn!(
                    "Message {} not found in {}, marking cache entry deleted",
                    message_id, self.name()
                );
                if let Some(entry) = inner.messages.get_mut(&update.id) {
                    entry.deleted = true;
                }
                Ok(())
            }
            Err(RelayError::DestinationGone) => Err(RelayError::DestinationGone),
            Err(RelayError::DeliveryAPIError { status, message }) if status >= 500 => {
                error!(
                    "Delivery API returned {} editing message {} in {}: {}",
                    status, message_id, self.name(), message
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to edit message {} for {}/{} in {}: {}",
                    message_id, incident.id, update.id, self.name(), e
                );
                Ok(())
            }
        }
    }

    /// One-time reconciliation of the destination's recent history against
    /// the current incident set. Runs once per lifetime; later callers block
    /// on the state lock and observe completion. Messages referencing
    /// incidents absent from the current set are deliberately left untouched.
    pub async fn backfill(&self, incidents: &[Incident]) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.backfill == Backfill::Complete {
            return Ok(());
        }
        inner.backfill = Backfill::Running;

        let Some(channel_id) = self.target.channel_id() else {
            warn!(
                "No channel metadata for webhook {}, skipping history reconciliation",
                self.hook
            );
            inner.backfill = Backfill::Complete;
            return Ok(());
        };

        let messages = match self
            .client
            .fetch_recent_messages(channel_id, self.tunables.history_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    "Failed to fetch history for {} during backfill: {}",
                    self.name(), e
                );
                inner.backfill = Backfill::Complete;
                return Ok(());
            }
        };

        let known_ids: HashSet<&str> = incidents.iter().map(|i| i.id.as_str()).collect();
        for message in &messages {
            if message.webhook_id.as_deref() != Some(self.hook.id.as_str()) {
                continue;
            }
            let Some(embed) = message.embeds.first() else {
                continue;
            };
            let Some((incident_id, update_id)) = embed
                .footer
                .as_ref()
                .and_then(|f| crate::relay::render::parse_footer(&f.text))
            else {
                continue;
            };
            if !known_ids.contains(incident_id.as_str()) {
                continue;
            }
            inner.messages.insert(
                update_id.clone(),
                DeliveredMessage {
                    incident_id,
                    update_id,
                    message_id: message.id.clone(),
                    canonical: CanonicalEmbed::of(embed),
                    deleted: false,
                },
            );
        }

        // Repair pass: bring seeded history in line with live incident data,
        // covering updates the destination missed while the relay was down.
        let seeded: Vec<DeliveredMessage> = inner.messages.values().cloned().collect();
        for entry in seeded {
            let Some(incident) = incidents.iter().find(|i| i.id == entry.incident_id) else {
                continue;
            };
            let Some(update) = incident.find_update(&entry.update_id) else {
                continue;
            };
            let embed = render_update(incident, update);
            if entry.deleted || CanonicalEmbed::of(&embed) == entry.canonical {
                continue;
            }
            if let Err(e) = self
                .edit_delivered(&mut inner, incident, update, &embed, &entry.message_id)
                .await
            {
                inner.backfill = Backfill::Complete;
                return Err(e);
            }
        }

        inner.backfill = Backfill::Complete;
        info!(
            "Backfilled {} incidents for {} - {}",
            incidents.len(),
            self.page_url,
            self.name()
        );
        Ok(())
    }

    /// Deliver an incident handed to us by an inbound push notification.
    /// Shares the message cache and idempotency token with the polling path
    /// so a source that both pushes and is polled cannot double-deliver.
    pub async fn apply_pushed_incident(&self, incident: &Incident) -> RelayResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(update) = incident.incident_updates.first() else {
            return Ok(());
        };

        let mut inner = self.inner.lock().await;
        let embed = render_update(incident, update);
        if let Some(existing) = inner.messages.get(&update.id) {
            if !existing.deleted {
                let message_id = existing.message_id.clone();
                if existing.canonical != CanonicalEmbed::of(&embed) {
                    return self
                        .edit_delivered(&mut inner, incident, update, &embed, &message_id)
                        .await;
                }
                return Ok(());
            }
        }

        let is_first = incident.incident_updates.len() == 1;
        let mention = self.mention_policy == MentionPolicy::EveryUpdate || is_first;
        self.send_update(&mut inner, incident, update, &embed, mention)
            .await?;

        if let Some(delivered) = inner.messages.get(&update.id) {
            inner.latest_push = Some(PushedUpdate {
                incident: incident.clone(),
                update: update.clone(),
                message_id: delivered.message_id.clone(),
            });
        }
        Ok(())
    }

    /// Merge a pushed component-status delta into the latest pushed update
    /// and edit the delivered message in place.
    pub async fn apply_component_delta(
        &self,
        delta: &ComponentUpdate,
        component_name: Option<&str>,
    ) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(push) = inner.latest_push.take() else {
            return Ok(());
        };

        let PushedUpdate {
            incident,
            mut update,
            message_id,
        } = push;

        let changed = match update
            .affected_components
            .iter_mut()
            .find(|c| c.code == delta.component_id)
        {
            Some(affected) => {
                if affected.new_status == delta.new_status {
                    false
                } else {
                    affected.old_status = delta.old_status;
                    affected.new_status = delta.new_status;
                    true
                }
            }
            None => {
                update.affected_components.push(AffectedComponent {
                    code: delta.component_id.clone(),
                    name: component_name.unwrap_or("Unknown").to_string(),
                    old_status: delta.old_status,
                    new_status: delta.new_status,
                });
                true
            }
        };

        if !changed {
            inner.latest_push = Some(PushedUpdate {
                incident,
                update,
                message_id,
            });
            return Ok(());
        }

        let embed = render_update(&incident, &update);
        let result = self
            .edit_delivered(&mut inner, &incident, &update, &embed, &message_id)
            .await;
        inner.latest_push = Some(PushedUpdate {
            incident,
            update,
            message_id,
        });
        result
    }

    fn maybe_republish(&self, message_id: String) {
        if !self.target.supports_republish() {
            return;
        }
        let Some(channel_id) = self.target.channel_id().map(str::to_string) else {
            return;
        };
        let client = self.client.clone();
        let name = self.name();
        debug!("Crossposting incident update for {}...", name);
        tokio::spawn(async move {
            if let Err(e) = client.republish(&channel_id, &message_id).await {
                error!("Failed to crosspost update for {}: {}", name, e);
            }
        });
    }
}
