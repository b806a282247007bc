use super::*;

#[test]
fn test_whole_text_object() {
    let payload = parse_payload(r#"{"type":"result","result":"done"}"#).unwrap();
    assert_eq!(payload["result"], "done");
}

#[test]
fn test_fenced_json() {
    let out = "```json\n{\"type\":\"result\",\"result\":\"fenced\"}\n```";
    let payload = parse_payload(out).unwrap();
    assert_eq!(payload["result"], "fenced");
}

#[test]
fn test_typed_object_in_noise() {
    let out = "some log line\n{\"type\":\"result\",\"result\":\"buried\"} trailing";
    let payload = parse_payload(out).unwrap();
    assert_eq!(payload["result"], "buried");
}

#[test]
fn test_typed_object_ignores_braces_in_strings() {
    let out = "noise {\"type\":\"result\",\"result\":\"has } brace\"} end";
    let payload = parse_payload(out).unwrap();
    assert_eq!(payload["result"], "has } brace");
}

#[test]
fn test_terminal_object_fallback() {
    // No "type" key anywhere, so only the terminal-object scan finds it.
    let out = "progress: 42%\ndone {\"result\":\"tail\"}";
    let payload = parse_payload(out).unwrap();
    assert_eq!(payload["result"], "tail");
}

#[test]
fn test_unparseable_returns_none() {
    assert!(parse_payload("just words, no json").is_none());
    assert!(parse_payload("").is_none());
}

#[test]
fn test_response_basic_fields() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"{
            "type":"result","result":"ok","session_id":"s-1",
            "total_cost_usd":0.12,"duration_ms":900,"duration_api_ms":700,
            "num_turns":3,"stop_reason":"end_turn","is_error":false
        }"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.text, "ok");
    assert!(!response.is_error);
    assert_eq!(response.session_id.as_deref(), Some("s-1"));
    assert_eq!(response.cost_usd, Some(0.12));
    assert_eq!(response.duration_ms, Some(900));
    assert_eq!(response.duration_api_ms, Some(700));
    assert_eq!(response.num_turns, Some(3));
    assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
}

#[test]
fn test_response_fused_lowercase_keys() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"{"result":"ok","sessionid":"s-2","totalcostusd":0.5,"durationms":10,"numturns":1}"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.session_id.as_deref(), Some("s-2"));
    assert_eq!(response.cost_usd, Some(0.5));
    assert_eq!(response.duration_ms, Some(10));
    assert_eq!(response.num_turns, Some(1));
}

#[test]
fn test_array_payload_finds_result_element() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"[
            {"type":"system","subtype":"init"},
            {"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}},
            {"type":"result","result":"final","session_id":"s-3"}
        ]"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.text, "final");
    assert_eq!(response.session_id.as_deref(), Some("s-3"));
}

#[test]
fn test_array_payload_without_result_joins_text() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"[{"text":"one"},{"nested":{"text":"two"}}]"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.text, "one\ntwo");
}

#[test]
fn test_max_turns_subtype() {
    let payload: serde_json::Value =
        serde_json::from_str(r#"{"type":"result","subtype":"error_max_turns","result":"x"}"#)
            .unwrap();
    let response = response_from_payload(&payload);
    assert!(response.is_error);
    assert_eq!(response.text, MAX_TURNS_MESSAGE);
}

#[test]
fn test_other_error_subtype() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"{"type":"result","subtype":"error_during_execution","result":"disk full"}"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert!(response.is_error);
    assert!(response.text.contains("disk full"));
}

#[test]
fn test_non_error_subtype_passes_through() {
    let payload: serde_json::Value =
        serde_json::from_str(r#"{"type":"result","subtype":"success","result":"fine"}"#).unwrap();
    let response = response_from_payload(&payload);
    assert!(!response.is_error);
    assert_eq!(response.text, "fine");
}

#[test]
fn test_missing_result_and_content() {
    let payload: serde_json::Value =
        serde_json::from_str(r#"{"type":"result","is_error":true}"#).unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.text, UNPARSEABLE_MESSAGE);
    assert!(response.is_error);
}

#[test]
fn test_content_array_of_blocks() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.text, "a\nb");
}

#[test]
fn test_model_usage_both_casings() {
    let payload: serde_json::Value = serde_json::from_str(
        r#"{"result":"ok","modelUsage":{"claude-sonnet":{"inputTokens":10,"outputTokens":5,"cacheReadInputTokens":2,"cacheCreationInputTokens":1}}}"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    let usage = &response.model_usage["claude-sonnet"];
    assert_eq!(usage.input_tokens, 10);
    assert_eq!(usage.output_tokens, 5);
    assert_eq!(usage.cache_read_input_tokens, 2);
    assert_eq!(usage.cache_creation_input_tokens, 1);

    let payload: serde_json::Value = serde_json::from_str(
        r#"{"result":"ok","model_usage":{"m":{"input_tokens":7,"output_tokens":3}}}"#,
    )
    .unwrap();
    let response = response_from_payload(&payload);
    assert_eq!(response.model_usage["m"].input_tokens, 7);
}

#[test]
fn test_session_error_predicate() {
    assert!(is_session_error("No conversation found with session ID abc"));
    assert!(is_session_error("cannot RESUME"));
    assert!(is_session_error("invalid request"));
    assert!(!is_session_error("rate limit exceeded"));
}

#[test]
fn test_rate_limit_predicate() {
    assert!(is_rate_limited("Error: rate limit exceeded"));
    assert!(is_rate_limited("HTTP 429 Too Many Requests"));
    assert!(!is_rate_limited("connection refused"));
}
