use chrono::{Duration, Utc};
use mockito::Matcher;
use serde_json::json;
use status_relay::db::models::{ChannelKind, MentionPolicy};
use status_relay::delivery::{DeliveryClient, DestinationLiveness, HookRef};
use status_relay::relay::{DestinationState, DestinationTarget, RelayTunables};
use status_relay::statuspage::models::{Impact, Incident, IncidentUpdate, UpdateStatus};
use status_relay::RelayError;

fn tunables() -> RelayTunables {
    RelayTunables {
        stale_after: Duration::hours(50),
        freshness_window: Duration::hours(6),
        history_limit: 100,
    }
}

fn hook() -> HookRef {
    HookRef::parse("123/tok").unwrap()
}

fn make_update(id: &str, body: &str, minutes_ago: i64) -> IncidentUpdate {
    let created = Utc::now() - Duration::minutes(minutes_ago);
    IncidentUpdate {
        id: id.to_string(),
        incident_id: "inc1".to_string(),
        status: UpdateStatus::Investigating,
        body: body.to_string(),
        created_at: created,
        updated_at: Some(created),
        affected_components: vec![],
    }
}

fn make_incident(updates: Vec<IncidentUpdate>) -> Incident {
    Incident {
        id: "inc1".to_string(),
        name: "API latency".to_string(),
        impact: Impact::Major,
        status: UpdateStatus::Investigating,
        shortlink: Some("https://stspg.io/abc".to_string()),
        created_at: Utc::now() - Duration::hours(1),
        updated_at: Some(Utc::now()),
        scheduled_for: None,
        scheduled_until: None,
        incident_updates: updates,
    }
}

fn hydrated_state(base_url: String, policy: MentionPolicy, role: Option<&str>) -> DestinationState {
    DestinationState::new(
        hook(),
        "https://status.example.com".to_string(),
        DestinationTarget::Hydrated {
            guild_id: "g1".to_string(),
            channel_id: "c1".to_string(),
            channel_kind: ChannelKind::Text,
            role_id: role.map(str::to_string),
        },
        policy,
        DeliveryClient::new(base_url, "test-token".to_string()),
        tunables(),
    )
}

fn bare_state(base_url: String) -> DestinationState {
    DestinationState::new(
        hook(),
        "https://status.example.com".to_string(),
        DestinationTarget::Unhydrated,
        MentionPolicy::FirstUpdateOnly,
        DeliveryClient::new(base_url, "test-token".to_string()),
        tunables(),
    )
}

#[tokio::test]
async fn test_create_once_then_edit_on_revision() {
    let mut server = mockito::Server::new_async().await;

    // no destination channel metadata: backfill completes without history
    let state = bare_state(server.url());
    state.backfill(&[]).await.unwrap();

    let incident = make_incident(vec![make_update("u1", "Looking into it", 5)]);

    let create = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .match_body(Matcher::PartialJson(json!({
            "nonce": "u1",
            "enforce_nonce": true,
        })))
        .with_status(200)
        .with_body(r#"{"id": "m1"}"#)
        .expect(1)
        .create_async()
        .await;

    // first evaluation sends exactly once
    state
        .observe_update(&incident, &incident.incident_updates[0])
        .await
        .unwrap();
    // identical content on the next poll is a no-op, never a second create
    state
        .observe_update(&incident, &incident.incident_updates[0])
        .await
        .unwrap();
    create.assert_async().await;

    // a revised body edits the same message reference
    let mut revised = incident.clone();
    revised.incident_updates[0].body = "Resolved".to_string();
    revised.incident_updates[0].status = UpdateStatus::Resolved;

    let edit = server
        .mock("PATCH", "/webhooks/123/tok/messages/m1")
        .match_body(Matcher::PartialJson(json!({ "nonce": "u1" })))
        .with_status(200)
        .with_body(r#"{"id": "m1"}"#)
        .expect(1)
        .create_async()
        .await;

    state
        .observe_update(&revised, &revised.incident_updates[0])
        .await
        .unwrap();
    edit.assert_async().await;
}

#[tokio::test]
async fn test_mention_only_on_first_update_under_first_update_policy() {
    let mut server = mockito::Server::new_async().await;
    let state = hydrated_state(server.url(), MentionPolicy::FirstUpdateOnly, Some("r1"));

    let history = server
        .mock("GET", "/channels/c1/messages")
        .match_query(Matcher::UrlEncoded("limit".into(), "100".into()))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    state.backfill(&[]).await.unwrap();
    history.assert_async().await;

    let first = make_update("u1", "Looking into it", 5);
    let incident = make_incident(vec![first.clone()]);

    let create_with_mention = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .match_body(Matcher::PartialJson(json!({ "content": "<@&r1>" })))
        .with_status(200)
        .with_body(r#"{"id": "m1"}"#)
        .expect(1)
        .create_async()
        .await;
    state.observe_update(&incident, &first).await.unwrap();
    create_with_mention.assert_async().await;

    // a later update in the same incident does not mention
    let mut second = make_update("u2", "Root cause found", 2);
    second.updated_at = Some(Utc::now());
    let incident = make_incident(vec![first, second.clone()]);

    let create_plain = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .match_body(Matcher::PartialJson(json!({ "nonce": "u2" })))
        .with_status(200)
        .with_body(r#"{"id": "m2"}"#)
        .expect(1)
        .create_async()
        .await;
    state.observe_update(&incident, &second).await.unwrap();
    create_plain.assert_async().await;
}

#[tokio::test]
async fn test_backfill_seeds_history_and_repairs_drift() {
    let mut server = mockito::Server::new_async().await;
    let state = hydrated_state(server.url(), MentionPolicy::FirstUpdateOnly, None);

    let update = make_update("u1", "Mitigation rolling out", 30);
    let incident = make_incident(vec![update.clone()]);

    // destination history holds an older rendering of u1 plus a foreign message
    let history_body = json!([
        {
            "id": "m42",
            "webhook_id": "123",
            "embeds": [{
                "title": "API latency",
                "color": 13395507,
                "fields": [{ "name": "Investigating", "value": "stale body" }],
                "footer": { "text": "Incident ID: inc1 | Update ID: u1" }
            }]
        },
        {
            "id": "m99",
            "webhook_id": "someone-else",
            "embeds": []
        }
    ]);
    let history = server
        .mock("GET", "/channels/c1/messages")
        .match_query(Matcher::UrlEncoded("limit".into(), "100".into()))
        .with_status(200)
        .with_body(history_body.to_string())
        .expect(1)
        .create_async()
        .await;

    // the drifted message is repaired in place
    let repair = server
        .mock("PATCH", "/webhooks/123/tok/messages/m42")
        .match_body(Matcher::PartialJson(json!({ "nonce": "u1" })))
        .with_status(200)
        .with_body(r#"{"id": "m42"}"#)
        .expect(1)
        .create_async()
        .await;

    state.backfill(std::slice::from_ref(&incident)).await.unwrap();
    // a second backfill call observes the completed run and does no work
    state.backfill(std::slice::from_ref(&incident)).await.unwrap();
    history.assert_async().await;
    repair.assert_async().await;

    // the seeded entry now matches live data: evaluation is a no-op
    state.observe_update(&incident, &update).await.unwrap();
}

#[tokio::test]
async fn test_message_gone_marks_deleted_then_recreates() {
    let mut server = mockito::Server::new_async().await;
    let state = bare_state(server.url());
    state.backfill(&[]).await.unwrap();

    let incident = make_incident(vec![make_update("u1", "Looking into it", 5)]);

    let create = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .with_status(200)
        .with_body(r#"{"id": "m1"}"#)
        .expect(1)
        .create_async()
        .await;
    state
        .observe_update(&incident, &incident.incident_updates[0])
        .await
        .unwrap();
    create.assert_async().await;

    // someone deleted the message at the destination
    let mut revised = incident.clone();
    revised.incident_updates[0].body = "Resolved".to_string();
    let gone = server
        .mock("PATCH", "/webhooks/123/tok/messages/m1")
        .with_status(404)
        .with_body(r#"{"message": "Unknown Message", "code": 10008}"#)
        .expect(1)
        .create_async()
        .await;
    state
        .observe_update(&revised, &revised.incident_updates[0])
        .await
        .unwrap();
    gone.assert_async().await;

    // the cache entry is marked deleted, so the next evaluation recreates
    let recreate = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .with_status(200)
        .with_body(r#"{"id": "m2"}"#)
        .expect(1)
        .create_async()
        .await;
    state
        .observe_update(&revised, &revised.incident_updates[0])
        .await
        .unwrap();
    recreate.assert_async().await;
}

#[tokio::test]
async fn test_destination_gone_surfaces_for_liveness_check() {
    let mut server = mockito::Server::new_async().await;
    let state = bare_state(server.url());
    state.backfill(&[]).await.unwrap();

    let incident = make_incident(vec![make_update("u1", "Looking into it", 5)]);

    let _create = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .with_status(404)
        .with_body(r#"{"message": "Unknown Webhook", "code": 10015}"#)
        .create_async()
        .await;

    let err = state
        .observe_update(&incident, &incident.incident_updates[0])
        .await
        .expect_err("Expected destination-gone error");
    assert!(matches!(err, RelayError::DestinationGone));
}

#[tokio::test]
async fn test_verify_destination_classification() {
    let mut server = mockito::Server::new_async().await;
    let client = DeliveryClient::new(server.url(), "test-token".to_string());

    let alive = server
        .mock("GET", "/webhooks/123/tok")
        .with_status(200)
        .with_body(r#"{"id": "123", "name": "status"}"#)
        .create_async()
        .await;
    assert_eq!(
        client.verify_destination(&hook()).await.unwrap(),
        DestinationLiveness::Alive
    );
    alive.assert_async().await;

    let mut gone_server = mockito::Server::new_async().await;
    let gone_client = DeliveryClient::new(gone_server.url(), "test-token".to_string());
    let _gone = gone_server
        .mock("GET", "/webhooks/123/tok")
        .with_status(404)
        .with_body(r#"{"message": "Unknown Webhook", "code": 10015}"#)
        .create_async()
        .await;
    assert_eq!(
        gone_client.verify_destination(&hook()).await.unwrap(),
        DestinationLiveness::Gone
    );
}

#[tokio::test]
async fn test_pushed_incident_then_component_delta_edits_in_place() {
    use status_relay::statuspage::models::{AffectedComponent, ComponentStatus, ComponentUpdate};

    let mut server = mockito::Server::new_async().await;
    let state = bare_state(server.url());

    let mut update = make_update("u1", "Investigating elevated errors", 1);
    update.affected_components = vec![AffectedComponent {
        code: "comp1".to_string(),
        name: "API".to_string(),
        old_status: ComponentStatus::Operational,
        new_status: ComponentStatus::DegradedPerformance,
    }];
    let incident = make_incident(vec![update]);

    let create = server
        .mock("POST", "/webhooks/123/tok")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .match_body(Matcher::PartialJson(json!({ "nonce": "u1" })))
        .with_status(200)
        .with_body(r#"{"id": "m1"}"#)
        .expect(1)
        .create_async()
        .await;
    state.apply_pushed_incident(&incident).await.unwrap();
    create.assert_async().await;

    // the same push arriving again is deduplicated by the shared cache
    state.apply_pushed_incident(&incident).await.unwrap();

    // a component delta merges into the delivered update and edits it
    let edit = server
        .mock("PATCH", "/webhooks/123/tok/messages/m1")
        .match_body(Matcher::PartialJson(json!({ "nonce": "u1" })))
        .with_status(200)
        .with_body(r#"{"id": "m1"}"#)
        .expect(1)
        .create_async()
        .await;
    let delta = ComponentUpdate {
        component_id: "comp1".to_string(),
        old_status: ComponentStatus::DegradedPerformance,
        new_status: ComponentStatus::MajorOutage,
    };
    state.apply_component_delta(&delta, Some("API")).await.unwrap();
    edit.assert_async().await;

    // an identical delta changes nothing and issues no edit
    state.apply_component_delta(&delta, Some("API")).await.unwrap();
}
