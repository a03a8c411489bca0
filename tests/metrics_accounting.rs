//! Request, token, cost and selection accounting

mod common;

use common::{MockProvider, dispatcher_with, test_config, user};
use llm_relay::{ChatOptions, HistoryFilter};
use std::time::{Duration, SystemTime};

const EPS: f64 = 1e-9;

#[tokio::test]
async fn test_successes_and_failures_are_counted() {
    let p = MockProvider::new("p")
        .with_usage(10, 20)
        .with_cost(0.001, 0.002)
        .arc();
    let dispatcher = dispatcher_with(&test_config(), &[p.clone()]).await;

    for _ in 0..3 {
        dispatcher
            .chat(&user("hello"), &ChatOptions::default())
            .await
            .expect("p answers");
    }
    p.set_failing(true);
    for _ in 0..2 {
        dispatcher
            .chat(&user("hello"), &ChatOptions::default())
            .await
            .expect_err("p fails");
    }

    let snapshot = dispatcher.get_metrics();
    let metrics = &snapshot.providers["p"];
    assert_eq!(metrics.total_requests, 5);
    assert_eq!(metrics.successful_requests, 3);
    assert_eq!(metrics.failed_requests, 2);
    assert!((metrics.error_rate() - 0.4).abs() < EPS);
    assert!(metrics.average_latency_ms.is_some());
    assert!(metrics.last_success.is_some());
    assert!(metrics.last_failure.is_some());

    assert_eq!(metrics.prompt_tokens, 30);
    assert_eq!(metrics.completion_tokens, 60);
    assert_eq!(metrics.total_tokens, 90);
    // 10 * 0.001 + 20 * 0.002 per successful call
    assert!((metrics.total_cost - 0.15).abs() < EPS);

    let aggregate = &snapshot.aggregate;
    assert_eq!(aggregate.total_requests, 5);
    assert!((aggregate.error_rate - 0.4).abs() < EPS);
    assert_eq!(aggregate.total_tokens, 90);
    assert!((aggregate.total_cost - 0.15).abs() < EPS);
}

#[tokio::test]
async fn test_no_cost_without_pricing() {
    let p = MockProvider::new("p").with_usage(10, 20).arc();
    let dispatcher = dispatcher_with(&test_config(), &[p]).await;

    dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("p answers");

    let metrics = dispatcher
        .metrics_collector()
        .provider("p")
        .expect("p was recorded");
    assert_eq!(metrics.total_tokens, 30);
    assert_eq!(metrics.total_cost, 0.0);

    let history = dispatcher.request_history(&HistoryFilter::default());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cost, None);
    assert_eq!(history[0].usage.map(|u| u.total_tokens), Some(30));
}

#[tokio::test]
async fn test_history_filters() {
    let a = MockProvider::new("a").arc();
    let b = MockProvider::new("b").failing().arc();
    let dispatcher = dispatcher_with(&test_config(), &[a, b]).await;

    // Round robin alternates the first attempt between a and b
    for _ in 0..4 {
        dispatcher
            .chat(&user("hello"), &ChatOptions::default())
            .await
            .expect("a answers");
    }

    let all = dispatcher.request_history(&HistoryFilter::default());
    let a_entries = all.iter().filter(|e| e.provider_id == "a").count();
    assert_eq!(a_entries, 4);
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let b_only = dispatcher.request_history(&HistoryFilter::default().for_provider("b"));
    assert!(!b_only.is_empty());
    assert!(b_only.iter().all(|e| e.provider_id == "b" && !e.success));
    assert!(b_only.iter().all(|e| e.error.is_some()));

    let last_two = dispatcher.request_history(&HistoryFilter::default().limit(2));
    assert_eq!(last_two.len(), 2);
    assert_eq!(last_two[1].timestamp, all[all.len() - 1].timestamp);

    let future = SystemTime::now() + Duration::from_secs(3600);
    assert!(
        dispatcher
            .request_history(&HistoryFilter::default().since(future))
            .is_empty()
    );
}

#[tokio::test]
async fn test_metrics_survive_unregister_and_dispose() {
    let p = MockProvider::new("p").arc();
    let dispatcher = dispatcher_with(&test_config(), &[p]).await;

    dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("p answers");
    assert!(dispatcher.unregister_provider("p").await);
    assert_eq!(dispatcher.get_metrics().providers["p"].successful_requests, 1);

    dispatcher.dispose().await;
    assert_eq!(dispatcher.get_metrics().aggregate.successful_requests, 1);
}

#[tokio::test]
async fn test_selection_counts() {
    let a = MockProvider::new("a").arc();
    let b = MockProvider::new("b").arc();
    let dispatcher = dispatcher_with(&test_config(), &[a, b]).await;

    for _ in 0..4 {
        dispatcher
            .chat(&user("hello"), &ChatOptions::default())
            .await
            .expect("pool answers");
    }

    let strategy = dispatcher.get_metrics().strategy;
    assert_eq!(strategy.total_selections, 4);
    assert_eq!(strategy.selections_by_provider.get("a"), Some(&2));
    assert_eq!(strategy.selections_by_provider.get("b"), Some(&2));
    assert_eq!(strategy.selections_by_strategy.get("round_robin"), Some(&4));
    assert!(strategy.average_selection_latency_ms >= 0.0);
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let p = MockProvider::new("p").arc();
    let dispatcher = dispatcher_with(&test_config(), &[p]).await;

    dispatcher
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("p answers");

    let text = dispatcher.render_prometheus().expect("should render");
    assert!(text.contains("llm_relay_requests_total"));
    assert!(text.contains("llm_relay_selections_total"));
    assert!(text.contains("llm_relay_health_checks_total"));
    assert!(text.contains(r#"provider="p""#));
}

#[tokio::test]
async fn test_dispatchers_keep_separate_metrics() {
    let p = MockProvider::new("p").arc();
    let first = dispatcher_with(&test_config(), &[p.clone()]).await;
    let second = dispatcher_with(&test_config(), &[p]).await;

    first
        .chat(&user("hello"), &ChatOptions::default())
        .await
        .expect("p answers");

    assert_eq!(first.get_metrics().aggregate.total_requests, 1);
    assert_eq!(second.get_metrics().aggregate.total_requests, 0);
}
