//! Retry and fallback across providers within one call

mod common;

use common::{MockProvider, config_with_strategy, dispatcher_with, user};
use llm_relay::{ChatMessage, ChatOptions, HistoryFilter, RelayError};

const PRIORITY_AB: &str = r#"
kind = "priority"
priorities = { a = 1, b = 2 }
"#;

#[tokio::test]
async fn test_failed_provider_falls_back_to_next() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").arc();
    let mut config = config_with_strategy(PRIORITY_AB);
    config.dispatcher.max_retries = Some(2);
    let dispatcher = dispatcher_with(&config, &[a.clone(), b.clone()]).await;

    let response = dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("b should answer");

    assert_eq!(response.content, "response from b");
    assert_eq!(a.chat_calls(), 1);
    assert_eq!(b.chat_calls(), 1);
}

#[tokio::test]
async fn test_fallback_is_recorded_in_metrics_and_history() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").arc();
    let dispatcher = dispatcher_with(&config_with_strategy(PRIORITY_AB), &[a, b]).await;

    dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("b should answer");

    let snapshot = dispatcher.get_metrics();
    let a_metrics = &snapshot.providers["a"];
    let b_metrics = &snapshot.providers["b"];
    assert_eq!(a_metrics.failed_requests, 1);
    assert_eq!(a_metrics.successful_requests, 0);
    assert!(a_metrics.last_error.as_deref().unwrap_or_default().contains("a is down"));
    assert_eq!(b_metrics.successful_requests, 1);
    assert_eq!(snapshot.aggregate.total_requests, 2);

    let history = dispatcher.request_history(&HistoryFilter::default());
    let outcomes: Vec<(&str, bool)> = history
        .iter()
        .map(|e| (e.provider_id.as_str(), e.success))
        .collect();
    assert_eq!(outcomes, vec![("a", false), ("b", true)]);
}

#[tokio::test]
async fn test_each_provider_attempted_at_most_once_per_call() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").failing().arc();
    let mut config = config_with_strategy(PRIORITY_AB);
    config.dispatcher.max_retries = Some(2);
    let dispatcher = dispatcher_with(&config, &[a.clone(), b.clone()]).await;

    let err = dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect_err("both providers fail");

    assert_eq!(a.chat_calls(), 1);
    assert_eq!(b.chat_calls(), 1);
    match err {
        RelayError::ExhaustedRetries {
            attempts,
            attempted,
            ..
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(attempted, vec!["a", "b"]);
        }
        other => panic!("expected ExhaustedRetries, got {other:?}"),
    }
}

#[tokio::test]
async fn test_attempted_set_resets_between_calls() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").arc();
    let dispatcher = dispatcher_with(&config_with_strategy(PRIORITY_AB), &[a.clone(), b]).await;

    for _ in 0..2 {
        dispatcher
            .chat(&user("hello"), &ChatOptions::default())
            .await
            .expect("b should answer");
    }
    // A is tried first again on the second call
    assert_eq!(a.chat_calls(), 2);
}

#[tokio::test]
async fn test_language_directive_identical_across_retries() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").arc();
    let mut config = config_with_strategy(PRIORITY_AB);
    config.dispatcher.force_language = Some("French".to_string());
    let dispatcher = dispatcher_with(&config, &[a.clone(), b.clone()]).await;

    let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("hello")];
    dispatcher
        .chat(&messages, &ChatOptions::default())
        .await
        .expect("b should answer");

    let expected = vec![
        ChatMessage::system("Always respond in French.\n\nBe brief."),
        ChatMessage::user("hello"),
    ];
    assert_eq!(a.last_messages(), expected);
    assert_eq!(b.last_messages(), expected);
}

#[tokio::test]
async fn test_unhealthy_primary_is_skipped_without_a_call() {
    let a = MockProvider::new("a").unhealthy().arc();
    let b = MockProvider::new("b").arc();
    let dispatcher = dispatcher_with(&config_with_strategy(PRIORITY_AB), &[a.clone(), b]).await;

    let response = dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("b should answer");

    assert_eq!(response.content, "response from b");
    assert_eq!(a.chat_calls(), 0);
    assert_eq!(a.health_checks(), 1);
}
