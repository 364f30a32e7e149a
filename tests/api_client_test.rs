use std::time::Duration;

use lessonsync::api::{BatchOperation, LessonApi, LessonHttpClient};
use lessonsync::config::ApiConfig;
use lessonsync::error::ApiError;
use lessonsync::models::{BlockKind, StatusKind};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, max_retries: u32) -> LessonHttpClient {
    let mut config = ApiConfig::new(server.uri());
    config.max_retries = max_retries;
    config.retry_delay = Duration::from_millis(10);
    config.timeout = Duration::from_secs(2);
    LessonHttpClient::new(config).expect("client")
}

#[tokio::test]
async fn test_list_lessons_canonicalizes_status_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "l1",
                    "slug": "intro",
                    "title": "Intro",
                    "order": 1,
                    "direction_id": 3,
                    "is_favorite": true,
                    "favorited_at": "2024-03-01T09:00:00Z",
                    "tags": "rust, basics ,",
                    "duration": 29.6,
                    "direction_name": "Rust",
                    "direction_slug": "rust"
                },
                {
                    "id": "l2",
                    "title": "Ownership",
                    "order": 2,
                    "directionId": 3,
                    "isCompleted": false,
                    "userStatus": { "isCompleted": true, "isFavorite": false },
                    "tags": ["memory"],
                    "content": "{\"blocks\":[{\"type\":\"video\",\"url\":\"https://v.example/1\"}]}"
                }
            ],
            "meta": { "total": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let lessons = client_for(&server, 0).list_lessons().await.unwrap();

    assert_eq!(lessons.len(), 2);
    let intro = &lessons[0];
    assert_eq!(intro.slug, "intro");
    assert!(intro.user_status.is_favorite);
    assert!(intro.user_status.favorited_at.is_some());
    assert!(!intro.user_status.is_completed);
    assert_eq!(intro.tags, vec!["rust", "basics"]);
    assert_eq!(intro.duration, Some(30));
    assert_eq!(intro.direction.as_ref().unwrap().slug, "rust");
    assert!(intro.reported.favorite);
    assert!(!intro.reported.completed);

    let ownership = &lessons[1];
    assert_eq!(ownership.slug, "l2");
    assert!(ownership.user_status.is_completed);
    assert!(!ownership.user_status.is_favorite);
    assert!(ownership.reported.favorite && ownership.reported.completed);
    let blocks = &ownership.content.as_ref().unwrap().blocks;
    assert_eq!(blocks[0].kind, BlockKind::Video);
}

#[tokio::test]
async fn test_bare_array_and_plain_text_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/directions/rust/lessons"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "l1", "title": "Intro", "order": 1, "directionId": 3, "content": "Just read this." }
        ])))
        .mount(&server)
        .await;

    let lessons = client_for(&server, 0).direction_lessons("rust").await.unwrap();
    let block = &lessons[0].content.as_ref().unwrap().blocks[0];
    assert_eq!(block.kind, BlockKind::Text);
    assert_eq!(block.content.as_deref(), Some("Just read this."));
}

#[tokio::test]
async fn test_invalid_records_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "l1", "title": "Intro", "order": 0, "directionId": 1 }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/directions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "name": 5 }] })))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    assert!(matches!(
        client.list_lessons().await,
        Err(ApiError::UnexpectedResponse(_))
    ));
    assert!(matches!(
        client.list_directions().await,
        Err(ApiError::UnexpectedResponse(_))
    ));
}

#[tokio::test]
async fn test_non_json_response_is_unexpected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons/intro"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server, 3).get_lesson("intro").await.unwrap_err();
    assert!(matches!(err, ApiError::UnexpectedResponse(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/directions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/directions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": 1, "name": "Rust", "slug": "rust" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let directions = client_for(&server, 3).list_directions().await.unwrap();
    assert_eq!(directions[0].slug, "rust");
}

#[tokio::test]
async fn test_rate_limit_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "message": "slow down" })))
        .expect(4)
        .mount(&server)
        .await;

    let err = client_for(&server, 3).list_lessons().await.unwrap_err();
    assert_eq!(err.status(), 429);
    assert!(err.user_message().contains("Too many requests"));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "Not Found",
            "message": "Lesson not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server, 3).get_lesson("missing").await.unwrap_err();
    match &err {
        ApiError::Status { status, message, .. } => {
            assert_eq!(*status, 404);
            assert_eq!(message, "Lesson not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_client_error());
    assert_eq!(err.user_message(), "Resource not found.");
}

#[tokio::test]
async fn test_timeout_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = ApiConfig::new(server.uri());
    config.timeout = Duration::from_millis(100);
    config.max_retries = 0;
    let client = LessonHttpClient::new(config).unwrap();

    let err = client.list_lessons().await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout(_)));
    assert_eq!(err.status(), 0);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_toggle_posts_user_and_reads_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/lessons/4/favorite"))
        .and(body_json(json!({ "userId": "42" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Added to favorites",
            "isFavorite": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/lessons/4/completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "ok" })))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    assert!(client.toggle(4, StatusKind::Favorite, "42").await.unwrap());
    // a response without the expected flag is an error
    assert!(matches!(
        client.toggle(4, StatusKind::Completed, "42").await,
        Err(ApiError::UnexpectedResponse(_))
    ));
}

#[tokio::test]
async fn test_mutations_validate_before_sending() {
    let server = MockServer::start().await;
    let client = client_for(&server, 0);

    assert!(matches!(
        client.toggle(0, StatusKind::Favorite, "42").await,
        Err(ApiError::InvalidInput(_))
    ));
    assert!(matches!(
        client.toggle(3, StatusKind::Favorite, " ").await,
        Err(ApiError::NotAuthenticated)
    ));

    let too_many: Vec<BatchOperation> = (0..51)
        .map(|i| BatchOperation {
            kind: StatusKind::Completed,
            lesson_id: format!("l{}", i),
            value: true,
        })
        .collect();
    assert!(matches!(client.batch(&too_many).await, Err(ApiError::InvalidInput(_))));
    assert!(matches!(client.batch(&[]).await, Err(ApiError::InvalidInput(_))));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lesson_status_and_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/lessons/9/status"))
        .and(query_param("userId", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isFavorite": false,
            "isCompleted": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/lessons/batch"))
        .and(body_json(json!({
            "operations": [
                { "type": "favorite", "lessonId": "l1", "value": true },
                { "type": "completed", "lessonId": "l2", "value": false }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "processed": 2,
            "results": [
                { "type": "favorites_added", "count": 1 },
                { "type": "completed_removed", "count": 1 }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let status = client.lesson_status(9, "42").await.unwrap();
    assert!(status.is_completed);
    assert!(!status.is_favorite);

    let summary = client
        .batch(&[
            BatchOperation {
                kind: StatusKind::Favorite,
                lesson_id: "l1".to_string(),
                value: true,
            },
            BatchOperation {
                kind: StatusKind::Completed,
                lesson_id: "l2".to_string(),
                value: false,
            },
        ])
        .await
        .unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.favorites_added, 1);
    assert_eq!(summary.completed_removed, 1);
}

#[tokio::test]
async fn test_user_lists_hit_user_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/42/favorites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "l1", "title": "Intro", "order": 1, "directionId": 1 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let favorites = client.favorites("42").await.unwrap();
    assert_eq!(favorites.len(), 1);
    assert!(matches!(client.completed("").await, Err(ApiError::NotAuthenticated)));
}

#[tokio::test]
async fn test_toggle_deadline_covers_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/lessons/4/favorite"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let mut config = ApiConfig::new(server.uri());
    config.timeout = Duration::from_millis(200);
    config.max_retries = 3;
    config.retry_delay = Duration::from_millis(50);
    let client = LessonHttpClient::new(config).unwrap();

    let started = std::time::Instant::now();
    let err = client.toggle(4, StatusKind::Favorite, "42").await.unwrap_err();

    // each attempt alone fits the timeout, all four together don't
    assert!(matches!(err, ApiError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(500));
}
