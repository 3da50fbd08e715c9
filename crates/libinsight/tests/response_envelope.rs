use libinsight::models::{ENVELOPE_SCHEMA_VERSION, EnvelopeCommandFailure, ResponseEnvelope};
use serde_json::json;

#[test]
fn ok_envelope_tracks_contract_fields() {
    let envelope = ResponseEnvelope::ok(
        "ask",
        json!({
            "columns": ["시도", "도서관수"],
            "rows": [{"시도": "서울특별시", "도서관수": 2}]
        }),
    )
    .with_meta("row_count", json!(1))
    .with_warning("render_failed", "visualization script failed")
    .with_warning_details(json!({"kind": "budget_exceeded"}));

    assert!(envelope.ok);
    assert_eq!(envelope.command, "ask");
    assert!(envelope.generated_at_utc.ends_with('Z'));
    assert!(envelope.data.is_some());
    assert_eq!(
        envelope.meta.get("schema_version"),
        Some(&json!(ENVELOPE_SCHEMA_VERSION))
    );
    assert_eq!(envelope.meta.get("row_count"), Some(&json!(1)));
    assert_eq!(envelope.warnings.len(), 1);
    assert_eq!(envelope.warnings[0].code, "render_failed");
    assert_eq!(
        envelope.warnings[0].details.as_ref(),
        Some(&json!({"kind": "budget_exceeded"}))
    );
    assert!(envelope.error.is_none());
}

#[test]
fn ok_envelope_omits_error_field() {
    let envelope = ResponseEnvelope::ok("schema", json!({"tables": []}));
    let encoded = serde_json::to_value(&envelope).expect("envelope should serialize");

    let object = encoded.as_object().expect("envelope JSON should be object");
    assert_eq!(object.get("ok"), Some(&json!(true)));
    assert_eq!(object.get("command"), Some(&json!("schema")));
    for key in ["generated_at_utc", "data", "meta", "warnings"] {
        assert!(object.contains_key(key), "missing `{key}`");
    }
    assert!(!object.contains_key("error"));
}

#[test]
fn error_envelope_carries_structured_details() {
    let envelope = ResponseEnvelope::error("sql", "sql_guardrail_violation", "query rejected")
        .with_error_details(json!({"violation": {"reason": "multi_statement"}}));

    assert!(!envelope.ok);
    assert!(envelope.data.is_none());
    let encoded = serde_json::to_value(&envelope).expect("envelope should serialize");
    assert_eq!(
        encoded
            .pointer("/error/details/violation/reason")
            .and_then(|value| value.as_str()),
        Some("multi_statement")
    );
}

#[test]
fn command_failure_display_is_json_envelope() {
    let envelope = ResponseEnvelope::error("ask", "oracle_unavailable", "service down");
    let failure = EnvelopeCommandFailure::new(envelope);
    let parsed: serde_json::Value =
        serde_json::from_str(&failure.to_string()).expect("display output should be JSON");
    assert_eq!(parsed.get("ok").and_then(|value| value.as_bool()), Some(false));
    assert_eq!(
        parsed.pointer("/error/code").and_then(|value| value.as_str()),
        Some("oracle_unavailable")
    );

    let error = ResponseEnvelope::error("ask", "oracle_unavailable", "service down").into_failure();
    assert!(error.downcast_ref::<EnvelopeCommandFailure>().is_some());
}
