use crate::statuspage::models::{Incident, IncidentUpdate, UpdateStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_FIELD_VALUE_LEN: usize = 1024;

/// Outbound message body. A plain value type carrying only what the relay
/// needs; nothing here extends a chat-SDK message class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Comparison-normalized form of an embed, used to detect content changes.
/// Deliberately excludes the timestamp: a revision that changes nothing the
/// reader can see must not trigger an edit.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEmbed {
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub body: String,
    pub color: u32,
}

impl CanonicalEmbed {
    pub fn of(embed: &Embed) -> Self {
        Self {
            title: embed.title.clone(),
            description: embed.description.clone(),
            status: embed
                .fields
                .first()
                .map(|f| f.name.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            body: embed
                .fields
                .first()
                .map(|f| f.value.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            color: embed.color,
        }
    }
}

/// Render one (incident, update) pair into the outbound embed.
pub fn render_update(incident: &Incident, update: &IncidentUpdate) -> Embed {
    let component_lines: Vec<String> = update
        .affected_components
        .iter()
        .filter(|c| !c.code.is_empty())
        .map(|c| {
            format!(
                "{} **{}**: {}",
                c.new_status.emoji(),
                c.name,
                c.new_status.label()
            )
        })
        .collect();

    let description = match component_lines.join("\n") {
        joined if joined.is_empty() || joined.chars().count() > MAX_DESCRIPTION_LEN => None,
        joined => Some(joined),
    };

    // Maintenance notifications point at the window start rather than the
    // time the announcement was written.
    let timestamp = if update.status == UpdateStatus::Scheduled {
        incident.scheduled_for.unwrap_or_else(|| update.effective_timestamp())
    } else {
        update.effective_timestamp()
    };

    Embed {
        title: incident.name.clone(),
        url: incident
            .shortlink
            .as_ref()
            .map(|link| format!("{}?u={}", link, update.id)),
        description,
        color: incident.impact.color(),
        fields: vec![EmbedField {
            name: update.status.label().to_string(),
            value: truncate_body(&update.body),
        }],
        footer: Some(EmbedFooter {
            text: footer_text(&incident.id, &update.id),
        }),
        timestamp: Some(timestamp),
    }
}

pub fn footer_text(incident_id: &str, update_id: &str) -> String {
    format!("Incident ID: {} | Update ID: {}", incident_id, update_id)
}

/// Recover (incident id, update id) from a footer written by `footer_text`.
/// Backfill uses this to re-associate destination history with live data.
pub fn parse_footer(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix("Incident ID: ")?;
    let (incident_id, update_id) = rest.split_once(" | Update ID: ")?;
    if incident_id.is_empty() || update_id.is_empty() {
        return None;
    }
    let is_ident = |s: &str| s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !is_ident(incident_id) || !is_ident(update_id) {
        return None;
    }
    Some((incident_id.to_string(), update_id.to_string()))
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_FIELD_VALUE_LEN {
        body.to_string()
    } else {
        let mut truncated: String = body.chars().take(MAX_FIELD_VALUE_LEN - 3).collect();
        truncated.push_str("...");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statuspage::models::{AffectedComponent, ComponentStatus, Impact};
    use chrono::TimeZone;

    fn sample_incident() -> Incident {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        Incident {
            id: "inc1".to_string(),
            name: "API latency".to_string(),
            impact: Impact::Major,
            status: UpdateStatus::Investigating,
            shortlink: Some("https://stspg.io/abc".to_string()),
            created_at: created,
            updated_at: Some(created),
            scheduled_for: None,
            scheduled_until: None,
            incident_updates: vec![IncidentUpdate {
                id: "upd1".to_string(),
                incident_id: "inc1".to_string(),
                status: UpdateStatus::Investigating,
                body: "Looking into it".to_string(),
                created_at: created,
                updated_at: Some(created),
                affected_components: vec![AffectedComponent {
                    code: "abc".to_string(),
                    name: "API".to_string(),
                    old_status: ComponentStatus::Operational,
                    new_status: ComponentStatus::PartialOutage,
                }],
            }],
        }
    }

    #[test]
    fn test_render_basic_fields() {
        let incident = sample_incident();
        let embed = render_update(&incident, &incident.incident_updates[0]);
        assert_eq!(embed.title, "API latency");
        assert_eq!(embed.url.as_deref(), Some("https://stspg.io/abc?u=upd1"));
        assert_eq!(embed.color, Impact::Major.color());
        assert_eq!(embed.fields[0].name, "Investigating");
        assert_eq!(embed.fields[0].value, "Looking into it");
        assert!(embed
            .description
            .as_deref()
            .unwrap()
            .contains("**API**: Partial Outage"));
        assert_eq!(
            embed.footer.as_ref().unwrap().text,
            "Incident ID: inc1 | Update ID: upd1"
        );
    }

    #[test]
    fn test_footer_round_trip() {
        let text = footer_text("inc1", "upd1");
        assert_eq!(
            parse_footer(&text),
            Some(("inc1".to_string(), "upd1".to_string()))
        );
        assert_eq!(parse_footer("Incident ID: inc 1 | Update ID: upd1"), None);
        assert_eq!(parse_footer("unrelated footer"), None);
        assert_eq!(parse_footer("Incident ID:  | Update ID: upd1"), None);
    }

    #[test]
    fn test_canonical_form_ignores_timestamp() {
        let incident = sample_incident();
        let mut a = render_update(&incident, &incident.incident_updates[0]);
        let b = render_update(&incident, &incident.incident_updates[0]);
        a.timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
        assert_ne!(a, b);
        assert_eq!(CanonicalEmbed::of(&a), CanonicalEmbed::of(&b));
    }

    #[test]
    fn test_canonical_form_detects_body_change() {
        let incident = sample_incident();
        let a = render_update(&incident, &incident.incident_updates[0]);
        let mut changed = incident.clone();
        changed.incident_updates[0].body = "Mitigated".to_string();
        changed.incident_updates[0].status = UpdateStatus::Monitoring;
        let b = render_update(&changed, &changed.incident_updates[0]);
        assert_ne!(CanonicalEmbed::of(&a), CanonicalEmbed::of(&b));
    }

    #[test]
    fn test_body_truncation() {
        let long = "x".repeat(2000);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 1024);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_scheduled_update_uses_window_start() {
        let mut incident = sample_incident();
        let window = Utc.with_ymd_and_hms(2024, 3, 5, 2, 0, 0).unwrap();
        incident.scheduled_for = Some(window);
        incident.incident_updates[0].status = UpdateStatus::Scheduled;
        let embed = render_update(&incident, &incident.incident_updates[0]);
        assert_eq!(embed.timestamp, Some(window));
    }

    #[test]
    fn test_empty_components_render_no_description() {
        let mut incident = sample_incident();
        incident.incident_updates[0].affected_components.clear();
        let embed = render_update(&incident, &incident.incident_updates[0]);
        assert_eq!(embed.description, None);
    }
}
