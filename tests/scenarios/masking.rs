//! Secrets: file-backed values and masking in every reported surface

use crate::helpers::*;
use serde_json::json;
use std::io::Write;
use stepflow::TestStatus;

#[tokio::test]
async fn test_inline_secret_is_masked_but_sent_raw() {
    let yaml = r#"
name: "Auth"
secrets:
  - name: token
    value: "s3cr3t-token"
variables:
  auth: "Bearer ${token}"
steps:
  - name: "call"
    action: http
    args: ["${auth}"]
    result: response
  - name: "echo back"
    action: echo
    args: ["${response.echo}"]
"#;

    let actions = MockActions::new().respond(
        "http",
        vec![Ok(json!({"status_code": 200, "echo": "Bearer s3cr3t-token"}))],
    );
    let (result, actions) = run_yaml(yaml, actions).await;

    assert_test_passed(&result);
    // The action sees the real value
    assert_eq!(actions.requests_for("http")[0].args, vec![json!("Bearer s3cr3t-token")]);
    // Results never do
    assert_eq!(step(&result, "call").output["echo"], json!("Bearer ***"));
    assert_eq!(step(&result, "echo back").output, json!("Bearer ***"));
    let serialized = serde_json::to_string(&result).unwrap();
    assert!(!serialized.contains("s3cr3t-token"));
}

#[tokio::test]
async fn test_secret_from_file_masks_errors() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "file-secret-42").unwrap();

    let yaml = format!(
        r#"
name: "File secret"
secrets:
  - name: api_key
    file: "{}"
steps:
  - name: "login"
    action: fail
    args: ["key ${{api_key}} rejected"]
"#,
        file.path().display()
    );

    let (result, actions) = run_yaml(&yaml, MockActions::new()).await;

    assert_test_failed(&result);
    // Trailing newline is stripped before use
    assert_eq!(actions.requests_for("fail")[0].args, vec![json!("key file-secret-42 rejected")]);
    assert_eq!(step(&result, "login").error.as_deref(), Some("key *** rejected"));
    assert!(!result.error.as_deref().unwrap().contains("file-secret-42"));
}

#[tokio::test]
async fn test_missing_secret_file_fails_before_any_step() {
    let yaml = r#"
name: "Missing secret"
secrets:
  - name: api_key
    file: "/nonexistent/stepflow/secret"
steps:
  - action: echo
"#;

    let (result, actions) = run_yaml(yaml, MockActions::new()).await;

    assert_eq!(result.status, TestStatus::Failed);
    assert!(result.step_results.is_empty());
    assert_eq!(actions.calls("echo"), 0);
    assert!(result.error.as_deref().unwrap().contains("api_key"));
}

#[tokio::test]
async fn test_secrets_reference_earlier_secrets() {
    let yaml = r#"
name: "Derived secret"
secrets:
  - name: user
    value: "svc-account"
  - name: credentials
    value: "${user}:pa55word"
steps:
  - name: "connect"
    action: db
    args: ["${credentials}"]
"#;

    let actions = MockActions::new().respond("db", vec![Ok(json!("connected as svc-account"))]);
    let (result, actions) = run_yaml(yaml, actions).await;

    assert_test_passed(&result);
    assert_eq!(actions.requests_for("db")[0].args, vec![json!("svc-account:pa55word")]);
    assert_eq!(step(&result, "connect").output, json!("connected as ***"));
}
