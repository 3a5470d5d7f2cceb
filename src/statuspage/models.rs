use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Impact classification ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    None,
    Minor,
    Major,
    Critical,
    Maintenance,
}

impl Impact {
    /// Embed accent color for this impact level.
    pub fn color(&self) -> u32 {
        match self {
            Impact::None => 0x33CC66,
            Impact::Minor => 0xF1C40F,
            Impact::Major => 0xCC6600,
            Impact::Critical => 0xCC3333,
            Impact::Maintenance => 0x3498DB,
        }
    }
}

impl Default for Impact {
    fn default() -> Self {
        Impact::None
    }
}

// ── Update status ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
    Scheduled,
    InProgress,
    Completed,
}

impl UpdateStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UpdateStatus::Investigating => "Investigating",
            UpdateStatus::Identified => "Identified",
            UpdateStatus::Monitoring => "Monitoring",
            UpdateStatus::Resolved => "Resolved",
            UpdateStatus::Scheduled => "Scheduled",
            UpdateStatus::InProgress => "In Progress",
            UpdateStatus::Completed => "Completed",
        }
    }
}

// ── Component status ──
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Operational,
    DegradedPerformance,
    PartialOutage,
    MajorOutage,
    UnderMaintenance,
}

impl ComponentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ComponentStatus::Operational => "Operational",
            ComponentStatus::DegradedPerformance => "Degraded Performance",
            ComponentStatus::PartialOutage => "Partial Outage",
            ComponentStatus::MajorOutage => "Major Outage",
            ComponentStatus::UnderMaintenance => "Under Maintenance",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ComponentStatus::Operational => "<:operational:685538400639385649>",
            ComponentStatus::DegradedPerformance => "<:degraded_performance:685538400228343808>",
            ComponentStatus::PartialOutage => "<:partial_outage:685538400555499675>",
            ComponentStatus::MajorOutage => "<:major_outage:685538400639385706>",
            ComponentStatus::UnderMaintenance => "<:maintenance:685538400337395743>",
        }
    }
}

// ── Incident & updates (statuspage.io v2 shape, superfluous fields ignored) ──
#[derive(Debug, Clone, Deserialize)]
pub struct Incident {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub impact: Impact,
    pub status: UpdateStatus,
    #[serde(default)]
    pub shortlink: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incident_updates: Vec<IncidentUpdate>,
}

impl Incident {
    pub fn is_maintenance(&self) -> bool {
        self.scheduled_for.is_some()
    }

    pub fn kind(&self) -> &'static str {
        if self.is_maintenance() {
            "maintenance"
        } else {
            "incident"
        }
    }

    /// Maximum revision timestamp across this incident's updates; the update
    /// carrying it is the current state of the incident.
    pub fn latest_update_timestamp(&self) -> Option<DateTime<Utc>> {
        self.incident_updates
            .iter()
            .map(|u| u.effective_timestamp())
            .max()
    }

    /// Update ids ordered by creation time; index 0 is the incident's first
    /// update, which drives the per-incident-first-update mention policy.
    pub fn update_ids_by_creation(&self) -> Vec<&str> {
        let mut updates: Vec<&IncidentUpdate> = self.incident_updates.iter().collect();
        updates.sort_by_key(|u| u.created_at);
        updates.iter().map(|u| u.id.as_str()).collect()
    }

    pub fn find_update(&self, update_id: &str) -> Option<&IncidentUpdate> {
        self.incident_updates.iter().find(|u| u.id == update_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncidentUpdate {
    pub id: String,
    #[serde(default)]
    pub incident_id: String,
    pub status: UpdateStatus,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub affected_components: Vec<AffectedComponent>,
}

impl IncidentUpdate {
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AffectedComponent {
    pub code: String,
    pub name: String,
    pub old_status: ComponentStatus,
    pub new_status: ComponentStatus,
}

// ── Page envelopes ──
#[derive(Debug, Deserialize)]
pub struct IncidentsPage {
    pub incidents: Vec<Incident>,
}

#[derive(Debug, Deserialize)]
pub struct MaintenancesPage {
    pub scheduled_maintenances: Vec<Incident>,
}

// ── Inbound push payloads ──
#[derive(Debug, Deserialize)]
pub struct PushNotification {
    #[serde(default)]
    pub incident: Option<Incident>,
    #[serde(default)]
    pub component_update: Option<ComponentUpdate>,
    #[serde(default)]
    pub component: Option<PushedComponent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentUpdate {
    pub component_id: String,
    pub old_status: ComponentStatus,
    pub new_status: ComponentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushedComponent {
    #[serde(default)]
    pub name: Option<String>,
}
