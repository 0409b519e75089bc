use super::*;

const DEBOUNCE: Duration = Duration::from_secs(1);

fn doc(text: &str) -> SharedTextDocument {
    SharedTextDocument { id: 1, text: text.into(), updated_at: None }
}

fn loaded(text: &str) -> TextSyncEngine {
    let mut engine = TextSyncEngine::new(DEBOUNCE);
    engine.on_loaded(Ok(doc(text)));
    engine
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// =============================================================================
// Load
// =============================================================================

#[test]
fn load_sets_buffer_and_marker() {
    let engine = loaded("Hello");
    assert_eq!(engine.buffer(), "Hello");
    assert_eq!(engine.last_synced(), "Hello");
    assert_eq!(engine.status(), SyncStatus::Synced);
    assert!(engine.is_loaded());
}

#[test]
fn load_failure_surfaces_error() {
    let mut engine = TextSyncEngine::new(DEBOUNCE);
    engine.on_loaded(Err(StoreError::Unavailable("down".into())));
    assert_eq!(engine.status(), SyncStatus::Error);
    assert!(!engine.is_loaded());
    assert!(engine.last_error().unwrap().contains("down"));

    engine.on_loaded(Ok(doc("back")));
    assert_eq!(engine.status(), SyncStatus::Synced);
    assert!(engine.last_error().is_none());
}

// =============================================================================
// Debounce
// =============================================================================

#[test]
fn burst_of_edits_yields_one_save_with_final_text() {
    let mut engine = loaded("");
    let t0 = Instant::now();

    for (i, text) in ["H", "He", "Hel", "Hell", "Hello"].into_iter().enumerate() {
        let at = t0 + ms(200 * i as u64);
        assert_eq!(engine.apply(BufferUpdate::local(text), at), Applied::SaveScheduled);
        assert_eq!(engine.status(), SyncStatus::LocalEdit);
        assert!(engine.poll(at).is_none());
    }

    let last_edit = t0 + ms(800);
    assert_eq!(engine.next_deadline(), Some(last_edit + DEBOUNCE));
    assert!(engine.poll(last_edit + ms(999)).is_none());

    let save = engine.poll(last_edit + DEBOUNCE).unwrap();
    assert_eq!(save.text, "Hello");
    assert_eq!(engine.status(), SyncStatus::Syncing);
    assert!(engine.poll(last_edit + DEBOUNCE + ms(5000)).is_none());
}

#[test]
fn successful_save_marks_synced() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hello"), t0);
    let save = engine.poll(t0 + DEBOUNCE).unwrap();

    engine.on_save_result(&save.text, Ok(()));
    assert_eq!(engine.status(), SyncStatus::Synced);
    assert_eq!(engine.last_synced(), "Hello");
    assert!(!engine.is_saving());
}

#[test]
fn failed_save_is_not_retried_and_next_edit_clears_error() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hello"), t0);
    let save = engine.poll(t0 + DEBOUNCE).unwrap();

    engine.on_save_result(&save.text, Err(StoreError::Response { status: 500, body: String::new() }));
    assert_eq!(engine.status(), SyncStatus::Error);
    assert!(engine.last_error().is_some());
    assert!(engine.next_deadline().is_none());
    assert!(engine.poll(t0 + DEBOUNCE * 10).is_none());

    let t1 = t0 + DEBOUNCE * 11;
    engine.apply(BufferUpdate::local("Hello!"), t1);
    assert_eq!(engine.status(), SyncStatus::LocalEdit);
    assert!(engine.last_error().is_none());
    assert_eq!(engine.poll(t1 + DEBOUNCE).unwrap().text, "Hello!");
}

#[test]
fn edit_back_to_synced_text_cancels_pending_save() {
    let mut engine = loaded("Hello");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hello!"), t0);
    assert_eq!(engine.apply(BufferUpdate::local("Hello"), t0 + ms(100)), Applied::Reverted);
    assert_eq!(engine.status(), SyncStatus::Synced);
    assert!(!engine.has_pending_write());
    assert!(engine.poll(t0 + DEBOUNCE * 2).is_none());
}

#[test]
fn edit_during_save_waits_for_completion() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hel"), t0);
    let first = engine.poll(t0 + DEBOUNCE).unwrap();

    let t1 = t0 + DEBOUNCE + ms(10);
    engine.apply(BufferUpdate::local("Hello"), t1);
    assert_eq!(engine.status(), SyncStatus::LocalEdit);
    assert!(engine.next_deadline().is_none());
    assert!(engine.poll(t1 + DEBOUNCE * 3).is_none());

    engine.on_save_result(&first.text, Ok(()));
    assert_eq!(engine.status(), SyncStatus::LocalEdit);
    assert_eq!(engine.next_deadline(), Some(t1 + DEBOUNCE));
    assert_eq!(engine.poll(t1 + DEBOUNCE).unwrap().text, "Hello");
}

#[test]
fn flush_ignores_deadline() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("bye"), t0);
    assert_eq!(engine.flush().unwrap().text, "bye");
    assert!(engine.flush().is_none());
}

// =============================================================================
// Remote updates
// =============================================================================

#[test]
fn identical_remote_is_a_no_op() {
    let mut engine = loaded("Hello");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hello world"), t0);

    assert_eq!(engine.apply(BufferUpdate::remote("Hello world"), t0), Applied::Identical);
    assert_eq!(engine.status(), SyncStatus::LocalEdit);
    assert!(engine.has_pending_write());
}

#[test]
fn own_echo_is_ignored_while_typing_continues() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hel"), t0);
    let save = engine.poll(t0 + DEBOUNCE).unwrap();
    engine.on_save_result(&save.text, Ok(()));

    let t1 = t0 + DEBOUNCE + ms(50);
    engine.apply(BufferUpdate::local("Hello"), t1);
    assert_eq!(engine.apply(BufferUpdate::remote("Hel"), t1), Applied::Echo);
    assert_eq!(engine.buffer(), "Hello");
    assert!(engine.has_pending_write());
}

#[test]
fn late_echo_of_older_write_keeps_newer_edits() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("a"), t0);
    let first = engine.flush().unwrap();
    engine.on_save_result(&first.text, Ok(()));

    engine.apply(BufferUpdate::local("ab"), t0 + ms(10));
    let second = engine.flush().unwrap();
    let t2 = t0 + ms(20);
    engine.apply(BufferUpdate::local("abc"), t2);

    assert_eq!(engine.apply(BufferUpdate::remote("a"), t2), Applied::Echo);
    assert_eq!(engine.buffer(), "abc");
    assert!(engine.has_pending_write());
    assert!(engine.is_saving());

    assert_eq!(engine.apply(BufferUpdate::remote("ab"), t2), Applied::Echo);
    assert_eq!(engine.buffer(), "abc");

    engine.on_save_result(&second.text, Ok(()));
    assert_eq!(engine.next_deadline(), Some(t2 + DEBOUNCE));
    assert_eq!(engine.poll(t2 + DEBOUNCE).unwrap().text, "abc");
}

#[test]
fn remote_equal_to_synced_text_keeps_pending_edit() {
    let mut engine = loaded("orig");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("orig plus my words"), t0);

    assert_eq!(engine.apply(BufferUpdate::remote("orig"), t0 + ms(500)), Applied::Unchanged);
    assert_eq!(engine.buffer(), "orig plus my words");
    assert_eq!(engine.status(), SyncStatus::LocalEdit);
    assert_eq!(engine.poll(t0 + DEBOUNCE).unwrap().text, "orig plus my words");
}

#[test]
fn remote_equal_to_synced_text_is_not_held_for_blur() {
    let mut engine = loaded("orig");
    engine.set_focused(true);
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("orig plus"), t0);

    assert_eq!(engine.apply(BufferUpdate::remote("orig"), t0 + ms(100)), Applied::Unchanged);
    assert!(engine.set_focused(false).is_none());
    assert_eq!(engine.buffer(), "orig plus");
    assert!(engine.has_pending_write());
}

#[test]
fn each_echo_is_consumed_once() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    for text in ["a", "b"] {
        engine.apply(BufferUpdate::local(text), t0);
        let save = engine.flush().unwrap();
        engine.on_save_result(&save.text, Ok(()));
        assert_eq!(engine.apply(BufferUpdate::remote(text), t0), Applied::Echo);
    }

    // The peer now writes "a" for real.
    assert_eq!(engine.apply(BufferUpdate::remote("a"), t0), Applied::Replaced);
    assert_eq!(engine.buffer(), "a");
}

#[test]
fn peer_writing_our_failed_text_is_not_an_echo() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("x"), t0);
    let save = engine.flush().unwrap();
    engine.on_save_result(&save.text, Err(StoreError::Unavailable("down".into())));

    engine.apply(BufferUpdate::local("xy"), t0 + ms(10));
    assert_eq!(engine.apply(BufferUpdate::remote("x"), t0 + ms(20)), Applied::Replaced);
    assert_eq!(engine.buffer(), "x");
    assert_eq!(engine.last_synced(), "x");
}

#[test]
fn remote_replaces_buffer_and_cancels_pending_save() {
    let mut engine = loaded("Hello");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("Hello A"), t0);

    assert_eq!(engine.apply(BufferUpdate::remote("Hello B"), t0 + ms(300)), Applied::Replaced);
    assert_eq!(engine.buffer(), "Hello B");
    assert_eq!(engine.last_synced(), "Hello B");
    assert_eq!(engine.status(), SyncStatus::Synced);
    assert!(engine.next_deadline().is_none());
    assert!(engine.poll(t0 + DEBOUNCE * 5).is_none());
}

#[test]
fn remote_never_schedules_a_save() {
    let mut engine = loaded("");
    engine.apply(BufferUpdate::remote("from peer"), Instant::now());
    assert!(!engine.has_pending_write());
    assert!(engine.flush().is_none());
}

#[test]
fn remote_during_save_lets_store_order_win() {
    let mut engine = loaded("");
    let t0 = Instant::now();
    engine.apply(BufferUpdate::local("mine"), t0);
    let save = engine.poll(t0 + DEBOUNCE).unwrap();

    // Peer's write lands first, then ours; the change feed reports both.
    assert_eq!(engine.apply(BufferUpdate::remote("theirs"), t0), Applied::Replaced);
    engine.on_save_result(&save.text, Ok(()));
    assert_eq!(engine.last_synced(), "theirs");

    assert_eq!(engine.apply(BufferUpdate::remote("mine"), t0), Applied::Replaced);
    assert_eq!(engine.buffer(), "mine");
    assert_eq!(engine.status(), SyncStatus::Synced);
}

// =============================================================================
// Focus
// =============================================================================

#[test]
fn focused_input_defers_remote_until_blur() {
    let mut engine = loaded("Hello");
    assert!(engine.set_focused(true).is_none());

    assert_eq!(engine.apply(BufferUpdate::remote("Hello B"), Instant::now()), Applied::Deferred);
    assert_eq!(engine.buffer(), "Hello");

    assert_eq!(engine.set_focused(false), Some(Applied::Replaced));
    assert_eq!(engine.buffer(), "Hello B");
}

#[test]
fn typing_after_deferral_discards_held_text() {
    let mut engine = loaded("Hello");
    let t0 = Instant::now();
    engine.set_focused(true);
    engine.apply(BufferUpdate::remote("Hello B"), t0);
    engine.apply(BufferUpdate::local("Hello A"), t0 + ms(10));

    assert!(engine.set_focused(false).is_none());
    assert_eq!(engine.buffer(), "Hello A");
    assert!(engine.has_pending_write());
}

// =============================================================================
// Enhancement
// =============================================================================

#[test]
fn enhance_rejects_blank_buffer() {
    let mut engine = loaded("   \n");
    assert_eq!(engine.begin_enhance(AiAction::Summarize), Err(EnhanceRejected::EmptyBuffer));
    assert!(!engine.is_enhancing());
}

#[test]
fn enhance_rejects_concurrent_requests() {
    let mut engine = loaded("teh cat");
    let request = engine.begin_enhance(AiAction::FixGrammar).unwrap();
    assert_eq!(request.text, "teh cat");
    assert_eq!(request.instruction, AiAction::FixGrammar.instruction());
    assert_eq!(engine.begin_enhance(AiAction::Expand), Err(EnhanceRejected::InFlight));
}

#[test]
fn enhance_result_becomes_a_local_edit() {
    let mut engine = loaded("teh cat");
    let t0 = Instant::now();
    engine.begin_enhance(AiAction::FixGrammar).unwrap();

    let applied = engine.on_enhanced(Ok("The cat.".into()), t0).unwrap();
    assert_eq!(applied, Applied::SaveScheduled);
    assert_eq!(engine.buffer(), "The cat.");
    assert_eq!(engine.status(), SyncStatus::LocalEdit);
    assert!(!engine.is_enhancing());
    assert_eq!(engine.poll(t0 + DEBOUNCE).unwrap().text, "The cat.");
}

#[test]
fn enhance_failure_leaves_buffer_untouched() {
    let mut engine = loaded("teh cat");
    engine.begin_enhance(AiAction::FixGrammar).unwrap();

    let err = engine
        .on_enhanced(Err(EnhanceError::ApiRequest("timeout".into())), Instant::now())
        .unwrap_err();
    assert!(matches!(err, EnhanceError::ApiRequest(_)));
    assert_eq!(engine.buffer(), "teh cat");
    assert_eq!(engine.status(), SyncStatus::Synced);
    assert!(!engine.is_enhancing());
}

#[test]
fn status_labels() {
    assert_eq!(SyncStatus::LocalEdit.label(), "local-edit");
    assert_eq!(SyncStatus::default(), SyncStatus::Synced);
}
