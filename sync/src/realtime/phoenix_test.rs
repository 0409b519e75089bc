use super::*;
use serde_json::json;

fn frame(event: &str, payload: Value) -> Frame {
    Frame::new("drawing-session", event, payload)
}

fn meta(phx_ref: &str, user: &str) -> Value {
    json!({ "phx_ref": phx_ref, "user": user, "isDrawing": false, "onlineAt": "2025-01-01T00:00:00Z" })
}

fn users(list: &[Value]) -> Vec<&str> {
    list.iter().filter_map(|m| m["user"].as_str()).collect()
}

// =============================================================================
// URLS
// =============================================================================

#[test]
fn endpoint_from_https_and_http() {
    assert_eq!(
        realtime_endpoint("https://demo.supabase.co/").unwrap(),
        "wss://demo.supabase.co/realtime/v1/websocket"
    );
    assert_eq!(
        realtime_endpoint("http://127.0.0.1:54321").unwrap(),
        "ws://127.0.0.1:54321/realtime/v1/websocket"
    );
    assert!(matches!(realtime_endpoint("demo.supabase.co"), Err(ChannelError::InvalidUrl(_))));
}

#[test]
fn socket_url_carries_key_and_version() {
    let config = RealtimeConfig {
        endpoint: "wss://demo.supabase.co/realtime/v1/websocket".into(),
        api_key: "anon".into(),
        heartbeat: Duration::from_secs(25),
    };
    assert_eq!(config.socket_url(), "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0");
}

// =============================================================================
// TRANSLATE
// =============================================================================

#[test]
fn join_reply_ok_subscribes() {
    let mut state = RouteState::new("3");
    let reply = frame("phx_reply", json!({ "status": "ok", "response": {} })).with_ref("3");
    assert_eq!(state.translate(&reply), Some(ChannelEvent::Subscribed));
}

#[test]
fn join_reply_error_rejects_with_reason() {
    let mut state = RouteState::new("3");
    let reply = frame("phx_reply", json!({ "status": "error", "response": { "reason": "unauthorized" } })).with_ref("3");
    assert_eq!(state.translate(&reply), Some(ChannelEvent::Rejected("unauthorized".into())));
}

#[test]
fn replies_to_other_refs_are_ignored() {
    let mut state = RouteState::new("3");
    let reply = frame("phx_reply", json!({ "status": "ok" })).with_ref("9");
    assert_eq!(state.translate(&reply), None);
}

#[test]
fn broadcast_unwraps_inner_payload() {
    let mut state = RouteState::new("1");
    let inbound = Frame::broadcast("drawing-session", "draw", json!({ "x1": 0.25 }));
    assert_eq!(
        state.translate(&inbound),
        Some(ChannelEvent::Broadcast { event: "draw".into(), payload: json!({ "x1": 0.25 }) })
    );
}

#[test]
fn dispatch_queues_every_frame_for_a_slow_subscriber() {
    let routes: Routes = Arc::default();
    let (tx, mut events) = mpsc::unbounded_channel();
    let inbound = Frame::broadcast("drawing-session", "draw", json!({ "x1": 0.25 }));
    lock(&routes).insert(inbound.topic.clone(), Route { state: RouteState::new("1"), tx });

    for _ in 0..1000 {
        dispatch(&routes, &inbound);
    }
    let mut received = 0;
    while events.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 1000);
}

#[test]
fn postgres_change_yields_record() {
    let mut state = RouteState::new("1");
    let inbound = Frame::new(
        "note-changes",
        "postgres_changes",
        json!({
            "ids": [42],
            "data": {
                "schema": "public",
                "table": "shared_content",
                "type": "UPDATE",
                "record": { "id": 1, "text_note": "Hello" },
                "old_record": { "id": 1 }
            }
        }),
    );
    assert_eq!(
        state.translate(&inbound),
        Some(ChannelEvent::RowChanged {
            table: "shared_content".into(),
            record: json!({ "id": 1, "text_note": "Hello" })
        })
    );
}

#[test]
fn postgres_change_without_record_is_ignored() {
    let mut state = RouteState::new("1");
    let inbound = frame("postgres_changes", json!({ "data": { "table": "shared_content", "type": "DELETE" } }));
    assert_eq!(state.translate(&inbound), None);
}

#[test]
fn close_and_error_end_the_channel() {
    let mut state = RouteState::new("1");
    assert_eq!(state.translate(&frame("phx_close", json!({}))), Some(ChannelEvent::Closed));
    assert_eq!(state.translate(&frame("phx_error", json!({}))), Some(ChannelEvent::Closed));
}

#[test]
fn system_and_unknown_events_are_ignored() {
    let mut state = RouteState::new("1");
    assert_eq!(state.translate(&frame("system", json!({ "status": "ok" }))), None);
    assert_eq!(state.translate(&frame("something_else", json!({}))), None);
}

// =============================================================================
// PRESENCE
// =============================================================================

#[test]
fn presence_state_then_diff_emit_full_list() {
    let mut state = RouteState::new("1");

    let initial = frame("presence_state", json!({ "Atif": { "metas": [meta("a1", "Atif")] } }));
    match state.translate(&initial) {
        Some(ChannelEvent::PresenceSync(list)) => assert_eq!(users(&list), vec!["Atif"]),
        other => panic!("expected presence sync, got {other:?}"),
    }

    let join = frame(
        "presence_diff",
        json!({ "joins": { "Adiba": { "metas": [meta("b1", "Adiba")] } }, "leaves": {} }),
    );
    match state.translate(&join) {
        Some(ChannelEvent::PresenceSync(list)) => assert_eq!(users(&list), vec!["Adiba", "Atif"]),
        other => panic!("expected presence sync, got {other:?}"),
    }

    let leave = frame(
        "presence_diff",
        json!({ "joins": {}, "leaves": { "Adiba": { "metas": [meta("b1", "Adiba")] } } }),
    );
    match state.translate(&leave) {
        Some(ChannelEvent::PresenceSync(list)) => assert_eq!(users(&list), vec!["Atif"]),
        other => panic!("expected presence sync, got {other:?}"),
    }
}

#[test]
fn retrack_replaces_meta_under_same_key() {
    let mut presence = PresenceState::default();
    presence.replace(&json!({ "Atif": { "metas": [meta("a1", "Atif")] } }));

    let mut drawing = meta("a2", "Atif");
    drawing["isDrawing"] = json!(true);
    presence.apply_diff(&json!({
        "joins": { "Atif": { "metas": [drawing] } },
        "leaves": { "Atif": { "metas": [meta("a1", "Atif")] } }
    }));

    let list = presence.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["isDrawing"], true);
}

#[test]
fn rejoin_with_same_ref_is_not_duplicated() {
    let mut presence = PresenceState::default();
    presence.apply_diff(&json!({ "joins": { "Atif": { "metas": [meta("a1", "Atif")] } } }));
    presence.apply_diff(&json!({ "joins": { "Atif": { "metas": [meta("a1", "Atif")] } } }));
    assert_eq!(presence.list().len(), 1);
}

#[test]
fn leave_without_refs_drops_key() {
    let mut presence = PresenceState::default();
    presence.replace(&json!({ "Atif": { "metas": [meta("a1", "Atif")] } }));
    presence.apply_diff(&json!({ "leaves": { "Atif": { "metas": [{}] } } }));
    assert!(presence.list().is_empty());
}

#[test]
fn replace_ignores_malformed_entries() {
    let mut presence = PresenceState::default();
    presence.replace(&json!({ "Atif": { "nope": [] }, "Adiba": { "metas": [meta("b1", "Adiba")] } }));
    assert_eq!(users(&presence.list()), vec!["Adiba"]);
    presence.replace(&json!("not an object"));
    assert!(presence.list().is_empty());
}
