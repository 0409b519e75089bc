use super::*;
use frames::ErrorCode;

#[test]
fn every_action_round_trips_through_its_id() {
    for action in AiAction::ALL {
        assert_eq!(AiAction::parse(action.id()), Some(action));
    }
}

#[test]
fn parse_accepts_long_forms() {
    assert_eq!(AiAction::parse("Fix-Grammar"), Some(AiAction::FixGrammar));
    assert_eq!(AiAction::parse(" action-items "), Some(AiAction::ActionItems));
    assert_eq!(AiAction::parse("translate"), None);
}

#[test]
fn instructions_match_presets() {
    assert_eq!(AiAction::Summarize.instruction(), "Summarize the following text into clear bullet points.");
    assert_eq!(AiAction::ActionItems.label(), "Action Items");
}

#[test]
fn prompt_places_text_after_instruction() {
    assert_eq!(
        build_prompt("Fix it.", "teh cat"),
        "Fix it.\n\nText to process:\nteh cat"
    );
}

#[test]
fn rate_limits_and_server_errors_are_retryable() {
    assert!(EnhanceError::ApiResponse { status: 429, body: String::new() }.retryable());
    assert!(EnhanceError::ApiRequest("timeout".into()).retryable());
    assert!(!EnhanceError::ApiResponse { status: 400, body: String::new() }.retryable());
    assert_eq!(EnhanceError::ApiParse("x".into()).error_code(), "E_API_PARSE");
}
