use super::*;

#[test]
fn row_filter_matches_table_and_id() {
    let filter = RowFilter::singleton("shared_content");
    assert!(filter.matches("shared_content", &json!({ "id": 1, "text_note": "x" })));
    assert!(!filter.matches("shared_content", &json!({ "id": 2 })));
    assert!(!filter.matches("other", &json!({ "id": 1 })));
    assert!(!filter.matches("shared_content", &json!({ "text_note": "x" })));
}

#[test]
fn join_config_for_row_changes() {
    let config = ChannelConfig::rows(RowFilter::singleton("shared_content"));
    let value = config.to_join_config();
    assert_eq!(value["broadcast"]["self"], false);
    assert_eq!(value["postgres_changes"][0]["table"], "shared_content");
    assert_eq!(value["postgres_changes"][0]["filter"], "id=eq.1");
    assert_eq!(value["postgres_changes"][0]["schema"], "public");
}

#[test]
fn join_config_for_presence() {
    let value = ChannelConfig::broadcast_with_presence("Atif").to_join_config();
    assert_eq!(value["presence"]["key"], "Atif");
    assert_eq!(value["broadcast"]["self"], false);
    assert_eq!(value["postgres_changes"].as_array().map(Vec::len), Some(0));
}
