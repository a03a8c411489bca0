//! Streaming chat: retries cover opening the stream only

mod common;

use common::{MockProvider, config_with_strategy, dispatcher_with, test_config, user};
use futures::StreamExt;
use llm_relay::{ChatOptions, RelayError, StreamChunk};

#[tokio::test]
async fn test_stream_yields_provider_chunks() {
    let p = MockProvider::new("p").with_usage(4, 6).arc();
    let dispatcher = dispatcher_with(&test_config(), &[p.clone()]).await;

    let stream = dispatcher
        .chat_stream(&user("hello"), &ChatOptions::default())
        .await
        .expect("stream opens");
    let chunks: Vec<StreamChunk> = stream
        .map(|chunk| chunk.expect("chunk is ok"))
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content, "chunk from p");
    assert!(chunks[1].done);
    assert_eq!(chunks[1].usage.map(|u| u.total_tokens), Some(10));
    assert_eq!(p.stream_calls(), 1);
    assert_eq!(p.chat_calls(), 0);
}

#[tokio::test]
async fn test_failed_open_falls_back() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").arc();
    let config = config_with_strategy(
        r#"
kind = "fallback"
order = ["a", "b"]
"#,
    );
    let dispatcher = dispatcher_with(&config, &[a.clone(), b.clone()]).await;

    let mut stream = dispatcher
        .chat_stream(&user("hello"), &ChatOptions::default())
        .await
        .expect("b opens a stream");
    let first = stream
        .next()
        .await
        .expect("stream has a chunk")
        .expect("chunk is ok");

    assert_eq!(first.content, "chunk from b");
    assert_eq!(a.stream_calls(), 1);
    assert_eq!(b.stream_calls(), 1);
}

#[tokio::test]
async fn test_opened_stream_counts_as_success_without_usage() {
    let p = MockProvider::new("p").with_usage(4, 6).arc();
    let dispatcher = dispatcher_with(&test_config(), &[p]).await;

    let _stream = dispatcher
        .chat_stream(&user("hello"), &ChatOptions::default())
        .await
        .expect("stream opens");

    let metrics = dispatcher
        .metrics_collector()
        .provider("p")
        .expect("p was recorded");
    assert_eq!(metrics.successful_requests, 1);
    // Usage arrives inside the stream, after dispatch has returned
    assert_eq!(metrics.total_tokens, 0);
}

#[tokio::test]
async fn test_stream_exhaustion() {
    let a = MockProvider::new("a").failing().arc();
    let b = MockProvider::new("b").failing().arc();
    let dispatcher = dispatcher_with(&test_config(), &[a, b]).await;

    let err = match dispatcher
        .chat_stream(&user("hello"), &ChatOptions::default())
        .await
    {
        Ok(_) => panic!("no provider can open a stream"),
        Err(err) => err,
    };
    assert!(matches!(err, RelayError::ExhaustedRetries { attempts: 2, .. }));
}
