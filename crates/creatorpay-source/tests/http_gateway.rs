use creatorpay_source::{ContentSource, HttpContentSource, HttpSourceConfig, SourceError};
use tokio_stream::StreamExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn video(id: &str, views: u64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "author_id": "7001",
        "create_time": 1_710_000_000,
        "desc": format!("post {id}"),
        "stats": {"playCount": views, "diggCount": 10}
    })
}

async fn started_source(server: &MockServer, max_posts: usize) -> HttpContentSource {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"session_id": "s-1"})),
        )
        .expect(1)
        .mount(server)
        .await;

    let mut config = HttpSourceConfig::new(server.uri());
    config.token = Some("ms-token".into());
    config.page_size = 2;
    config.max_posts = max_posts;
    let source = HttpContentSource::new(config);
    source.start().await.unwrap();
    source
}

#[tokio::test]
async fn fetch_channel_sends_session_header() {
    let server = MockServer::start().await;
    let source = started_source(&server, 10).await;

    Mock::given(method("GET"))
        .and(path("/users/tenminai.korean"))
        .and(header("x-session-id", "s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "7001",
            "unique_id": "tenminai.korean",
            "nickname": "Ten Min Korean",
            "signature": "daily lessons",
            "stats": {"followerCount": 5400, "videoCount": 120}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = source.fetch_channel("tenminai.korean").await.unwrap();
    assert_eq!(channel.id, "7001");
    assert_eq!(channel.stats.follower_count, 5400);
}

#[tokio::test]
async fn missing_profile_maps_to_unknown_identity() {
    let server = MockServer::start().await;
    let source = started_source(&server, 10).await;

    Mock::given(method("GET"))
        .and(path("/users/nobody"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = source.fetch_channel("nobody").await.unwrap_err();
    assert!(matches!(err, SourceError::UnknownIdentity(_)));
}

#[tokio::test]
async fn posts_are_paged_with_cursor() {
    let server = MockServer::start().await;
    let source = started_source(&server, 10).await;

    Mock::given(method("GET"))
        .and(path("/users/creator/videos"))
        .and(query_param("cursor", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "videos": [video("v1", 100), video("v2", 200)],
            "cursor": "c2",
            "has_more": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/creator/videos"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "videos": [video("v3", 300)],
            "cursor": null,
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let posts: Vec<_> = source.fetch_posts("creator").collect().await;
    let ids: Vec<String> = posts.into_iter().map(|p| p.unwrap().id).collect();
    assert_eq!(ids, vec!["v1", "v2", "v3"]);
}

#[tokio::test]
async fn post_stream_stops_at_max_posts() {
    let server = MockServer::start().await;
    let source = started_source(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/users/creator/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "videos": [video("v1", 100), video("v2", 200)],
            "cursor": "c2",
            "has_more": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let posts: Vec<_> = source.fetch_posts("creator").collect().await;
    assert_eq!(posts.len(), 1);
}

#[tokio::test]
async fn empty_page_ends_stream_even_when_more_is_claimed() {
    let server = MockServer::start().await;
    let source = started_source(&server, 5).await;

    Mock::given(method("GET"))
        .and(path("/users/a/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "videos": [],
            "cursor": "0",
            "has_more": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let posts: Vec<_> = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        source.fetch_posts("a").collect::<Vec<_>>(),
    )
    .await
    .expect("post stream must end");
    assert!(posts.is_empty());
}

#[tokio::test]
async fn repeated_cursor_ends_stream() {
    let server = MockServer::start().await;
    let source = started_source(&server, 10).await;

    Mock::given(method("GET"))
        .and(path("/users/creator/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "videos": [video("v1", 100)],
            "cursor": "stuck",
            "has_more": true
        })))
        .expect(2)
        .mount(&server)
        .await;

    let posts: Vec<_> = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        source.fetch_posts("creator").collect::<Vec<_>>(),
    )
    .await
    .expect("post stream must end");
    assert_eq!(posts.len(), 2);
}

#[tokio::test]
async fn upstream_error_ends_stream_with_error() {
    let server = MockServer::start().await;
    let source = started_source(&server, 10).await;

    Mock::given(method("GET"))
        .and(path("/users/creator/videos"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let posts: Vec<_> = source.fetch_posts("creator").collect().await;
    assert_eq!(posts.len(), 1);
    assert!(matches!(posts[0], Err(SourceError::Transport(_))));
}

#[tokio::test]
async fn stop_closes_gateway_session() {
    let server = MockServer::start().await;
    let source = started_source(&server, 10).await;

    Mock::given(method("DELETE"))
        .and(path("/sessions/s-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    source.stop().await.unwrap();
    assert!(matches!(
        source.fetch_channel("creator").await,
        Err(SourceError::NotStarted)
    ));
}
