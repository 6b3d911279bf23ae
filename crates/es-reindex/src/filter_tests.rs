//! Tests for the filter process adapter. They drive real `sh -c` children.

use super::*;
use serde_json::json;

const UPPERCASE_NAME: &str =
    r#"while read -r line; do echo "$line" | sed 's/"name":"x"/"name":"X"/'; done"#;

fn quick_policy(max_attempts: u32) -> FilterRetryPolicy {
    FilterRetryPolicy {
        max_attempts: Some(max_attempts),
        pause: Duration::from_millis(10),
        deadline: None,
    }
}

fn record(id: &str) -> Record {
    let source = json!({"name": "x"}).as_object().cloned().unwrap();
    Record::new("a", "t", id, source)
}

fn uppercased(id: &str) -> Record {
    let source = json!({"name": "X"}).as_object().cloned().unwrap();
    Record::new("a", "t", id, source)
}

#[test]
fn test_default_policy_is_unbounded() {
    let policy = FilterRetryPolicy::default();
    assert!(policy.max_attempts.is_none());
    assert!(policy.deadline.is_none());
    assert_eq!(policy.pause, Duration::from_secs(1));
}

#[test]
fn test_parse_output_requires_type_when_input_had_one() {
    let line = r#"{"_index":"a","_id":"1","_source":{}}"#;
    assert!(parse_output(&record("1"), line).is_err());

    let mut typeless = record("1");
    typeless.doc_type.clear();
    assert!(parse_output(&typeless, line).is_ok());
}

#[tokio::test]
async fn test_empty_command_rejected() {
    assert!(FilterAdapter::spawn("   ", "0", None, quick_policy(1)).is_err());
}

#[tokio::test]
async fn test_transform_uppercases_field() {
    let mut adapter = FilterAdapter::spawn(UPPERCASE_NAME, "0", None, quick_policy(3)).unwrap();
    assert_eq!(adapter.state(), ProcessState::Ready);

    let outcome = adapter.transform(&record("1")).await.unwrap();
    assert_eq!(
        outcome,
        FilterOutcome::Keep {
            record: uppercased("1"),
            changed: true
        }
    );

    // The same child keeps serving.
    let outcome = adapter.transform(&record("2")).await.unwrap();
    assert!(matches!(outcome, FilterOutcome::Keep { record, .. } if record == uppercased("2")));
    assert_eq!(adapter.restarts(), 0);

    adapter.close().await;
}

#[tokio::test]
async fn test_raw_line_protocol() {
    let mut adapter = FilterAdapter::spawn(UPPERCASE_NAME, "0", None, quick_policy(3)).unwrap();
    let answer = adapter
        .deal("{\"_index\":\"a\",\"_type\":\"t\",\"_id\":\"1\",\"_source\":{\"name\":\"x\"}}\n")
        .await
        .unwrap();
    assert_eq!(
        answer,
        r#"{"_index":"a","_type":"t","_id":"1","_source":{"name":"X"}}"#
    );
    adapter.close().await;
}

#[tokio::test]
async fn test_passthrough_is_unchanged() {
    let mut adapter = FilterAdapter::spawn("cat", "0", None, quick_policy(3)).unwrap();
    let outcome = adapter.transform(&record("1")).await.unwrap();
    assert_eq!(
        outcome,
        FilterOutcome::Keep {
            record: record("1"),
            changed: false
        }
    );
    adapter.close().await;
}

#[tokio::test]
async fn test_empty_answer_drops_record() {
    let mut adapter =
        FilterAdapter::spawn("while read -r line; do echo; done", "0", None, quick_policy(3))
            .unwrap();
    assert_eq!(
        adapter.transform(&record("1")).await.unwrap(),
        FilterOutcome::Drop
    );
    adapter.close().await;
}

#[tokio::test]
async fn test_exited_child_is_restarted() {
    // Answers a single line, then exits.
    let one_shot = r#"read -r line; echo "$line" | sed 's/"name":"x"/"name":"X"/'"#;
    let mut adapter = FilterAdapter::spawn(one_shot, "0", None, quick_policy(5)).unwrap();

    let first = adapter.transform(&record("1")).await.unwrap();
    assert!(matches!(first, FilterOutcome::Keep { record, .. } if record == uppercased("1")));

    let second = adapter.transform(&record("2")).await.unwrap();
    assert!(matches!(second, FilterOutcome::Keep { record, .. } if record == uppercased("2")));
    assert!(adapter.restarts() >= 1);

    adapter.close().await;
}

#[tokio::test]
async fn test_malformed_output_exhausts_bounded_policy() {
    let mut adapter = FilterAdapter::spawn(
        "while read -r line; do echo 'not json'; done",
        "0",
        None,
        quick_policy(3),
    )
    .unwrap();

    match adapter.transform(&record("1")).await {
        Err(Error::FilterExhausted {
            identity,
            attempts,
            ..
        }) => {
            assert_eq!(identity, "a|t|1");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    adapter.close().await;
}

#[tokio::test]
async fn test_missing_identity_is_retried_as_malformed() {
    let strip_type = r#"while read -r line; do echo "$line" | sed 's/"_type":"t",//'; done"#;
    let mut adapter = FilterAdapter::spawn(strip_type, "0", None, quick_policy(2)).unwrap();
    assert!(matches!(
        adapter.transform(&record("1")).await,
        Err(Error::FilterExhausted { attempts: 2, .. })
    ));
    adapter.close().await;
}

#[tokio::test]
async fn test_deadline_discards_silent_child() {
    let policy = FilterRetryPolicy {
        max_attempts: None,
        pause: Duration::from_millis(10),
        deadline: Some(Duration::from_millis(200)),
    };
    let mut adapter =
        FilterAdapter::spawn("while read -r line; do sleep 30; done", "0", None, policy).unwrap();

    assert!(matches!(
        adapter.transform(&record("1")).await,
        Err(Error::FilterExhausted { .. })
    ));
    assert_eq!(adapter.state(), ProcessState::Failed);
    adapter.close().await;
}

#[tokio::test]
async fn test_runs_in_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("fix.sh"),
        "while read -r line; do echo \"$line\"; done\n",
    )
    .unwrap();

    let mut adapter = FilterAdapter::spawn(
        "sh ./fix.sh",
        "0",
        Some(dir.path().to_path_buf()),
        quick_policy(2),
    )
    .unwrap();
    let outcome = adapter.transform(&record("1")).await.unwrap();
    assert!(matches!(outcome, FilterOutcome::Keep { changed: false, .. }));
    adapter.close().await;
}

#[tokio::test]
async fn test_close_lets_slow_child_finish() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("finished");
    let command = format!(
        "while read -r line; do echo \"$line\"; done; sleep 0.5; touch {}",
        marker.display()
    );

    let mut adapter = FilterAdapter::spawn(&command, "0", None, quick_policy(2))
        .unwrap()
        .with_close_grace(Duration::from_millis(50));
    adapter.transform(&record("1")).await.unwrap();
    adapter.close().await;
    assert!(!marker.exists());

    let mut waited = Duration::ZERO;
    while !marker.exists() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(marker.exists(), "filter was killed on close");
}
