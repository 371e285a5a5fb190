//! Integration tests for the Secret Santa backend.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::lifecycle::MatchLifecycle;
use crate::testing::{FakeDelivery, KeepOrder};
use crate::{create_router, AppState};

/// App state over a throwaway database, a fake delivery and a fixed shuffle.
async fn test_state(psk: Option<String>) -> (AppState, Arc<FakeDelivery>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");

    let pool = init_database(&db_path).await.expect("Failed to init DB");
    let repo = Arc::new(Repository::new(pool));
    let delivery = Arc::new(FakeDelivery::new());

    let config = Config {
        api_psk: psk,
        db_path,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "warn".to_string(),
        brevo: None,
        delivery_timeout: Duration::from_secs(2),
    };

    let lifecycle = Arc::new(MatchLifecycle::new(
        repo.clone(),
        delivery.clone(),
        Arc::new(KeepOrder),
        config.delivery_timeout,
    ));

    let state = AppState {
        repo,
        lifecycle,
        config: Arc::new(config),
    };
    (state, delivery, temp_dir)
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    delivery: Arc<FakeDelivery>,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let (state, delivery, temp_dir) = test_state(psk.clone()).await;
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            delivery,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    /// Create members and return their ids in order.
    async fn create_members(&self, first_names: &[&str]) -> Vec<String> {
        let body: Vec<Value> = first_names
            .iter()
            .enumerate()
            .map(|(i, first)| {
                json!({
                    "firstName": first,
                    "lastName": "Tester",
                    "phoneNumber": format!("555000{}", i),
                    "email": format!("{}@example.com", first.to_lowercase()),
                })
            })
            .collect();
        let (status, resp) = self.post("/api/members", Value::Array(body)).await;
        assert_eq!(status, 201);
        resp["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["member"]["id"].as_str().unwrap().to_string())
            .collect()
    }

    async fn create_group(&self, name: &str, member_ids: &[String]) -> String {
        let (status, resp) = self
            .post(
                "/api/groups",
                json!({ "name": name, "year": "2025", "memberIds": member_ids }),
            )
            .await;
        assert_eq!(status, 201);
        resp["data"]["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_and_invalid_psk() {
    let fixture = TestFixture::with_psk(Some("secret-key".to_string())).await;
    let bare = Client::new();

    let resp = bare
        .get(fixture.url("/api/members"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let resp = bare
        .get(fixture.url("/api/members"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = bare
        .get(fixture.url("/api/members"))
        .header("authorization", "Bearer secret-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_auth_disabled_without_psk() {
    let fixture = TestFixture::with_psk(None).await;
    let (status, body) = fixture.get("/api/groups").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_member_crud() {
    let fixture = TestFixture::new().await;

    let ids = fixture.create_members(&["Ada"]).await;
    let member_id = &ids[0];

    let (status, body) = fixture.get(&format!("/api/members/{}", member_id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["firstName"], "Ada");
    assert_eq!(body["data"]["version"], 1);
    assert!(body["data"].get("lastRecipient").is_none());

    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/members/{}", member_id)))
        .json(&json!({ "firstName": "Augusta", "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["firstName"], "Augusta");
    assert_eq!(body["data"]["version"], 2);

    // Batch update through the upsert endpoint, plus an unknown id.
    let (status, body) = fixture
        .post(
            "/api/members",
            json!([
                { "id": member_id, "firstName": "Ada", "lastName": "Lovelace", "phoneNumber": "5551234567" },
                { "id": "nope", "firstName": "X", "lastName": "Y", "phoneNumber": "1" }
            ]),
        )
        .await;
    assert_eq!(status, 201);
    assert_eq!(body["data"][0]["success"], true);
    assert_eq!(body["data"][0]["member"]["lastName"], "Lovelace");
    assert_eq!(body["data"][1]["success"], false);
    assert_eq!(body["data"][1]["message"], "Member with ID nope not found");

    let (status, body) = fixture.get("/api/members").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/members/{}", member_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (status, body) = fixture.get(&format!("/api/members/{}", member_id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_member_validation_and_conflict() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post("/api/members", json!([{ "firstName": "Ada", "lastName": "Lovelace" }]))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["retryable"], false);

    let (status, _) = fixture.post("/api/members", json!([])).await;
    assert_eq!(status, 400);

    let ids = fixture.create_members(&["Bob"]).await;
    let resp = fixture
        .client
        .put(fixture.url(&format!("/api/members/{}", ids[0])))
        .json(&json!({ "firstName": "Robert", "expectedVersion": 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn test_group_validation() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post("/api/groups", json!({ "name": "Family", "year": "2025", "memberIds": [] }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = fixture
        .post(
            "/api/groups",
            json!({ "name": "Family", "year": "2025", "memberIds": ["ghost"] }),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("ghost"));

    let ids = fixture.create_members(&["Ada"]).await;
    let (status, _) = fixture
        .post(
            "/api/groups",
            json!({ "id": "missing", "name": "Family", "year": "2025", "memberIds": ids }),
        )
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_full_secret_santa_flow() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada", "Bob", "Cy"]).await;
    let group_id = fixture.create_group("Family", &ids).await;

    let (status, body) = fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;
    assert_eq!(status, 201);
    assert_eq!(body["data"]["matches"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"]["runNumber"], 1);

    let (status, body) = fixture
        .get(&format!("/api/groups/{}/matches", group_id))
        .await;
    assert_eq!(status, 200);
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|m| m["archived"] == false));
    assert!(listed.iter().all(|m| m["giver"]["id"] != m["recipient"]["id"]));

    let (status, body) = fixture
        .post(
            &format!("/api/groups/{}/notifications?channel=sms", group_id),
            json!({}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["successfulNotifications"], 3);
    assert_eq!(body["data"]["groupArchived"], true);
    assert!(body["data"].get("failures").is_none());
    assert_eq!(fixture.delivery.sent().len(), 3);

    // Pending-only listing is now empty; the archived run is kept.
    let (_, body) = fixture
        .get(&format!("/api/groups/{}/matches", group_id))
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = fixture
        .get(&format!("/api/groups/{}/matches?includeArchived=true", group_id))
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    // History rotates around the roster.
    for (i, id) in ids.iter().enumerate() {
        let (_, body) = fixture.get(&format!("/api/members/{}", id)).await;
        assert_eq!(body["data"]["lastRecipient"], ids[(i + 1) % ids.len()].as_str());
    }

    let (status, body) = fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "GROUP_ARCHIVED");
}

#[tokio::test]
async fn test_notify_without_matches_and_insufficient_members() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada"]).await;
    let group_id = fixture.create_group("Solo", &ids).await;

    let (status, body) = fixture
        .post(&format!("/api/groups/{}/notifications", group_id), json!({}))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_MEMBERS");
}

#[tokio::test]
async fn test_single_match_notification() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada", "Bob"]).await;
    let group_id = fixture.create_group("Pair", &ids).await;

    let (_, body) = fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;
    let match_ids: Vec<String> = body["data"]["matches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();

    let (status, body) = fixture
        .post(
            &format!("/api/matches/{}/notify?channel=email", match_ids[0]),
            json!({}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["groupArchived"], false);
    assert_eq!(body["data"]["notification"]["channel"], "email");

    let (status, body) = fixture
        .post(&format!("/api/matches/{}/notify", match_ids[0]), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "ALREADY_ARCHIVED");

    let (status, body) = fixture
        .post(&format!("/api/matches/{}/notify", match_ids[1]), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["groupArchived"], true);
}

#[tokio::test]
async fn test_delivery_failure_reported_per_match() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada", "Bob", "Cy"]).await;
    let group_id = fixture.create_group("Family", &ids).await;
    fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;

    fixture.delivery.fail_for("bob@example.com");
    let (status, body) = fixture
        .post(
            &format!("/api/groups/{}/notifications?channel=email", group_id),
            json!({}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["success"], true);
    assert_eq!(body["data"]["successfulNotifications"], 2);
    assert_eq!(body["data"]["failedNotifications"], 1);
    assert_eq!(body["data"]["groupArchived"], false);
    assert_eq!(body["data"]["failures"][0]["giverId"], ids[1].as_str());
    assert_eq!(body["data"]["failures"][0]["code"], "DELIVERY_FAILURE");
}

#[tokio::test]
async fn test_delete_group_cascades_matches() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada", "Bob"]).await;
    let group_id = fixture.create_group("Pair", &ids).await;
    fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/groups/{}", group_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["deletedMatchesCount"], 2);
    assert_eq!(body["data"]["group"]["name"], "Pair");

    let (status, _) = fixture.get(&format!("/api/groups/{}", group_id)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_unknown_channel_is_rejected() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada", "Bob"]).await;
    let group_id = fixture.create_group("Pair", &ids).await;

    let resp = fixture
        .client
        .post(fixture.url(&format!(
            "/api/groups/{}/notifications?channel=pigeon",
            group_id
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_router_oneshot_auth_and_health() {
    let (state, _delivery, _temp_dir) = test_state(Some("oneshot-key".to_string())).await;
    let app = create_router(state);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/api/groups").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/groups")
                .header("x-api-key", "oneshot-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_roster_edit_drops_pending_matches() {
    let fixture = TestFixture::new().await;
    let ids = fixture.create_members(&["Ada", "Bob", "Cy", "Di"]).await;
    let group_id = fixture.create_group("Family", &ids[..3]).await;
    fixture
        .post(&format!("/api/groups/{}/matches", group_id), json!({}))
        .await;

    let (status, body) = fixture
        .post(
            "/api/groups",
            json!({
                "id": group_id,
                "name": "Family",
                "year": "2025",
                "memberIds": [ids[0], ids[1], ids[3]],
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["runVersion"], 2);

    let (status, body) = fixture
        .post(&format!("/api/groups/{}/notifications", group_id), json!({}))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "ALREADY_ARCHIVED");
    assert!(fixture.delivery.sent().is_empty());
}
