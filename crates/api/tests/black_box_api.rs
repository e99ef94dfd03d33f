use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

use shopledger_auth::{JwtClaims, Role};
use shopledger_core::{BranchId, UserId};
use shopledger_infra::store::InMemoryStore;

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over a fresh in-memory store, on an ephemeral port.
        let store = Arc::new(InMemoryStore::retail().expect("retail schema"));
        let app = shopledger_api::app::build_app_with_store(store, SECRET, 5);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(role: Role, branch_id: Option<BranchId>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        email: Some("staff@example.com".to_string()),
        role,
        branch_id,
        issued_at: now - ChronoDuration::minutes(1),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn owner() -> String {
    mint_jwt(Role::OWNER, None)
}

/// Seed a branch with one utilities expense; returns (branch id, expense id).
async fn seed_expense(server: &TestServer, token: &str) -> (String, String) {
    let (status, branch) = server
        .post(token, "/admin/rows/branches", json!({"name": "Main", "is_active": true}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let branch_id = branch["row"]["id"].as_str().unwrap().to_string();

    let (status, expense) = server
        .post(
            token,
            "/admin/rows/expenses",
            json!({"branch_id": branch_id, "amount": 500, "category": "utilities"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let expense_id = expense["row"]["id"].as_str().unwrap().to_string();

    (branch_id, expense_id)
}

#[tokio::test]
async fn health_is_public_and_everything_else_needs_a_token() {
    let server = TestServer::spawn().await;

    let res = server.client.get(format!("{}/health", server.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.client.get(format!("{}/whoami", server.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = server.get("not-a-jwt", "/whoami").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_echoes_identity_and_forwarded_ip() {
    let server = TestServer::spawn().await;
    let branch = BranchId::new();
    let token = mint_jwt(Role::new("cashier"), Some(branch));

    let res = server
        .client
        .get(format!("{}/whoami", server.base_url))
        .bearer_auth(&token)
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["role"], "cashier");
    assert_eq!(body["branch_id"], branch.to_string());
    assert_eq!(body["ip"], "203.0.113.9");
}

#[tokio::test]
async fn expense_restore_round_trip() {
    let server = TestServer::spawn().await;
    let token = owner();
    let (branch_id, expense_id) = seed_expense(&server, &token).await;

    let (status, recorded) = server
        .post(
            &token,
            "/activities",
            json!({
                "type": "expense_add",
                "delta": {"expense_id": expense_id, "amount": 500, "category": "utilities"},
                "branch_id": branch_id,
                "related_entity": {"entity_type": "expenses", "entity_id": expense_id},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(recorded["recorded"], true);
    let a1 = recorded["id"].as_str().unwrap().to_string();

    let (status, preview) = server
        .post(&token, &format!("/activities/{a1}/restore/preview"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["success"], true);
    assert_eq!(preview["data"], json!({"amount": 500, "category": "utilities"}));

    let (status, outcome) = server
        .post(&token, &format!("/activities/{a1}/restore"), json!({"reason": "entered twice"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["success"], true);
    assert!(outcome["restored_activity_id"].is_string());

    // The expense is gone.
    let (status, body) = server
        .delete(&token, &format!("/admin/rows/expenses/id/{expense_id}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    // And cannot be restored twice.
    let (status, body) = server
        .post(&token, &format!("/activities/{a1}/restore"), json!({"reason": "again"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn restore_input_is_validated() {
    let server = TestServer::spawn().await;
    let token = owner();

    let (status, body) = server
        .post(&token, "/activities/not-a-uuid/restore", json!({"reason": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = server
        .post(&token, &format!("/activities/{}/restore", UserId::new()), json!({"reason": "x"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = server
        .post(&token, "/activities", json!({"type": "teleport", "delta": {}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn branch_users_cannot_restore_other_branches_or_administer() {
    let server = TestServer::spawn().await;
    let owner = owner();
    let (branch_id, expense_id) = seed_expense(&server, &owner).await;

    let (_, recorded) = server
        .post(
            &owner,
            "/activities",
            json!({
                "type": "expense_add",
                "delta": {"expense_id": expense_id, "amount": 500, "category": "utilities"},
                "branch_id": branch_id,
            }),
        )
        .await;
    let a1 = recorded["id"].as_str().unwrap().to_string();

    let outsider = mint_jwt(Role::new("manager"), Some(BranchId::new()));
    let (status, body) = server
        .post(&outsider, &format!("/activities/{a1}/restore"), json!({"reason": "nope"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = server
        .post(&outsider, "/admin/bulk-delete", json!({"table": "expenses", "confirm": "expenses"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server.get(&outsider, "/admin/audit-log").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn branch_users_record_stock_moves_only_at_their_branch() {
    let server = TestServer::spawn().await;
    let mine = BranchId::new();
    let clerk = mint_jwt(Role::new("cashier"), Some(mine));
    let product = "0190a0b2-0000-7000-8000-000000000001";

    let (status, body) = server
        .post(
            &clerk,
            "/activities",
            json!({
                "type": "stock_reduce",
                "delta": {"product_id": product, "branch_id": BranchId::new(), "quantity": 1000},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = server
        .post(
            &clerk,
            "/activities",
            json!({
                "type": "stock_reduce",
                "delta": {"product_id": product, "branch_id": mine, "quantity": 2},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["recorded"], true);
}

#[tokio::test]
async fn ledger_rows_cannot_be_corrected() {
    let server = TestServer::spawn().await;
    let (status, body) = server
        .post(
            &owner(),
            "/activities",
            json!({
                "type": "edit_correction",
                "delta": {"table": "activities", "key": "x", "before": {"status": "completed"}},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn blocked_delete_then_dependents_then_cascade() {
    let server = TestServer::spawn().await;
    let token = owner();
    let (branch_id, _) = seed_expense(&server, &token).await;

    let (status, body) = server
        .delete(&token, &format!("/admin/rows/branches/id/{branch_id}"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "referential_integrity");
    assert_eq!(body["table"], "expenses");
    assert_eq!(body["constraint"], "expenses_branch_id_fkey");

    let (status, body) = server
        .get(&token, &format!("/admin/dependents?table=branches&value={branch_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let dependents = body["dependents"].as_array().unwrap();
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0]["table"], "expenses");
    assert_eq!(dependents[0]["count"], 1);

    let (status, outcome) = server
        .post(
            &token,
            "/admin/cascade-delete",
            json!({
                "table": "branches",
                "primary_key": "id",
                "value": branch_id,
                "dependents": [{"table": "expenses", "column": "branch_id"}],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["target_rows"], 1);

    let (_, body) = server
        .get(&token, &format!("/admin/dependents?table=branches&value={branch_id}"))
        .await;
    assert_eq!(body["dependents"], json!([]));

    let (status, body) = server.get(&token, "/admin/audit-log?table=branches").await;
    assert_eq!(status, StatusCode::OK);
    let operations: Vec<_> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["operation"].as_str().unwrap().to_string())
        .collect();
    // Newest first: the cascade delete, then the seed insert.
    assert_eq!(operations, vec!["delete", "insert"]);
}

#[tokio::test]
async fn bulk_delete_requires_matching_confirmation() {
    let server = TestServer::spawn().await;
    let token = owner();
    seed_expense(&server, &token).await;

    let (status, body) = server
        .post(&token, "/admin/bulk-delete", json!({"table": "expenses", "confirm": "Expenses"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = server
        .post(&token, "/admin/bulk-delete", json!({"table": "expenses", "soft": true, "confirm": "expenses"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (status, body) = server
        .post(&token, "/admin/bulk-delete", json!({"table": "expenses", "confirm": "expenses"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected_rows"], 1);
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let server = TestServer::spawn().await;
    let token = owner();

    let res = server
        .client
        .post(format!("{}/admin/cascade-delete", server.base_url))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let (status, _) = server
        .post(&token, "/admin/cascade-delete", json!({"table": "drop table;", "primary_key": "id", "value": "1"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
