// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the REST API over a real socket.
//!
//! Each test starts the router on an ephemeral port with seeded data and
//! drives it with reqwest.

use chrono::Duration;
use futures::future::join_all;
use points_ledger::api::{AppState, create_router};
use points_ledger::seed::Seed;
use points_ledger::{AccessGate, CustomerId, Engine, LedgerStore, RewardId, TenantId, TokenService};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

const CAFE: &str = "11111111-1111-4111-8111-111111111111";
const BAKERY: &str = "44444444-4444-4444-8444-444444444444";
const ANA: &str = "22222222-2222-4222-8222-222222222222";
const BRUNO: &str = "55555555-5555-4555-8555-555555555555";
const ESPRESSO: &str = "33333333-3333-4333-8333-333333333333";
const CAKE: &str = "66666666-6666-4666-8666-666666666666";
const BREAD: &str = "77777777-7777-4777-8777-777777777777";
const ANA_PHONE: &str = "+5511900000001";
const PASSWORD: &str = "changeme1";

fn seed() -> Seed {
    let json = json!({
        "tenants": [
            {"id": CAFE, "name": "Cafe Aurora"},
            {"id": BAKERY, "name": "Bakery Sol"}
        ],
        "customers": [
            {"id": ANA, "phone": ANA_PHONE, "password": PASSWORD, "name": "Ana",
             "tenantIds": [CAFE, BAKERY], "passwordChangeRequired": true},
            {"id": BRUNO, "phone": "+5511900000002", "password": PASSWORD, "name": "Bruno",
             "tenantIds": [CAFE], "status": "suspended"}
        ],
        "rewards": [
            {"id": CAKE, "tenantId": CAFE, "name": "Cake", "pointsRequired": 300},
            {"id": ESPRESSO, "tenantId": CAFE, "name": "Espresso", "pointsRequired": 100,
             "redemptionCount": 4},
            {"id": BREAD, "tenantId": BAKERY, "name": "Bread", "pointsRequired": 50}
        ],
        "earnings": [
            {"tenantId": CAFE, "customerId": ANA, "points": 150},
            {"tenantId": BAKERY, "customerId": ANA, "points": 20}
        ]
    });
    Seed::from_reader(json.to_string().as_bytes()).unwrap()
}

// === Server Setup ===

struct TestServer {
    base_url: String,
    engine: Arc<Engine>,
    gate: Arc<AccessGate>,
}

impl TestServer {
    async fn new() -> Self {
        Self::with_signature(None).await
    }

    async fn with_signature(app_signature: Option<&str>) -> Self {
        let engine = Arc::new(Engine::new());
        seed().apply(&engine, 4).unwrap();

        let tokens = TokenService::new(
            b"server-test-secret-0123456789abcdef",
            "points-ledger",
            Duration::minutes(30),
        );
        let gate = Arc::new(AccessGate::new(tokens, Arc::clone(engine.customers()), 4));
        let state = AppState {
            engine: engine.clone(),
            gate: gate.clone(),
            app_signature: app_signature.map(Arc::from),
        };

        let app = create_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready by polling with retries
        let client = Client::new();
        let health_url = format!("{}/health", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer {
            base_url,
            engine,
            gate,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token_for(&self, customer: &str) -> String {
        self.gate.tokens().issue(customer.parse().unwrap()).unwrap()
    }
}

async fn read(response: reqwest::Response) -> (StatusCode, Value) {
    let status = response.status();
    (status, response.json().await.unwrap())
}

// === Tests ===

#[tokio::test]
async fn health_is_open() {
    let server = TestServer::with_signature(Some("sig")).await;
    let response = Client::new().get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn tenants_listed_by_name_without_auth() {
    let server = TestServer::new().await;
    let (status, body) = read(Client::new().get(server.url("/tenants")).send().await.unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let names: Vec<&str> = body["tenants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Bakery Sol", "Cafe Aurora"]);
}

#[tokio::test]
async fn login_returns_working_token() {
    let server = TestServer::new().await;
    let client = Client::new();

    let (status, body) = read(
        client
            .post(server.url("/auth/login"))
            .json(&json!({"phoneNumber": ANA_PHONE, "password": PASSWORD}))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["id"], ANA);
    assert_eq!(body["user"]["passwordChangeRequired"], true);
    assert!(body["user"].get("passwordHash").is_none());

    let token = body["token"].as_str().unwrap();
    let (status, profile) = read(
        client
            .get(server.url("/auth/profile"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["user"]["name"], "Ana");
}

#[tokio::test]
async fn login_failures() {
    let server = TestServer::new().await;
    let client = Client::new();

    let cases = [
        (json!({"phoneNumber": ANA_PHONE, "password": "wrong-password"}), StatusCode::UNAUTHORIZED),
        (json!({"phoneNumber": "+000", "password": PASSWORD}), StatusCode::UNAUTHORIZED),
        (json!({"phoneNumber": "+5511900000002", "password": PASSWORD}), StatusCode::UNAUTHORIZED),
        (json!({"phoneNumber": ANA_PHONE}), StatusCode::BAD_REQUEST),
    ];
    for (payload, expected) in cases {
        let (status, body) = read(
            client
                .post(server.url("/auth/login"))
                .json(&payload)
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, expected, "payload {payload}");
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());
    }
}

#[tokio::test]
async fn protected_routes_require_valid_token() {
    let server = TestServer::new().await;
    let client = Client::new();
    let suspended = server.token_for(BRUNO);

    for path in ["/auth/profile", "/rewards", "/transactions", "/transactions/recent"] {
        let missing = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED, "{path}");

        let garbage = client
            .get(server.url(path))
            .bearer_auth("not-a-token")
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED, "{path}");

        let (status, body) = read(
            client
                .get(server.url(path))
                .bearer_auth(&suspended)
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn app_signature_gate() {
    let server = TestServer::with_signature(Some("s3cret")).await;
    let client = Client::new();

    let (status, body) = read(client.get(server.url("/tenants")).send().await.unwrap()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Forbidden: Invalid app signature");

    let wrong = client
        .get(server.url("/tenants"))
        .header("x-awd-app-signature", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let ok = client
        .get(server.url("/tenants"))
        .header("x-awd-app-signature", "s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn cors_preflight_skips_signature_gate() {
    let server = TestServer::with_signature(Some("s3cret")).await;

    let preflight = Client::new()
        .request(reqwest::Method::OPTIONS, server.url("/rewards/redeem"))
        .header("origin", "http://localhost:19006")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization,x-awd-app-signature")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::OK);
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");
    let allowed = preflight.headers()["access-control-allow-headers"]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("x-awd-app-signature"), "{allowed}");
}

#[tokio::test]
async fn rewards_sorted_with_tenant_names() {
    let server = TestServer::new().await;
    let token = server.token_for(ANA);

    let (status, body) = read(
        Client::new()
            .get(server.url("/rewards"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rewards = body["rewards"].as_array().unwrap();
    let listed: Vec<(&str, &str, i64)> = rewards
        .iter()
        .map(|r| {
            (
                r["name"].as_str().unwrap(),
                r["tenantName"].as_str().unwrap(),
                r["pointsRequired"].as_i64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        listed,
        vec![
            ("Bread", "Bakery Sol", 50),
            ("Espresso", "Cafe Aurora", 100),
            ("Cake", "Cafe Aurora", 300)
        ]
    );
    assert_eq!(rewards[1]["redemptionCount"], 4);

    let (_, cafe) = read(
        Client::new()
            .get(server.url(&format!("/rewards?tenantId={CAFE}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(cafe["rewards"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn redeem_updates_balance_and_history() {
    let server = TestServer::new().await;
    let client = Client::new();
    let token = server.token_for(ANA);

    let (status, body) = read(
        client
            .post(server.url("/rewards/redeem"))
            .bearer_auth(&token)
            .json(&json!({"rewardId": ESPRESSO}))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Reward redeemed successfully");
    assert_eq!(body["balance"], 50);
    assert_eq!(body["transaction"]["type"], "REWARD_REDEEMED");
    assert_eq!(body["transaction"]["points"], -100);
    assert_eq!(body["transaction"]["description"], "Redeemed reward: Espresso");

    let (_, balance) = read(
        client
            .get(server.url(&format!("/balance?tenantId={CAFE}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(balance["balance"], 50);
    assert_eq!(balance["transactionCount"], 2);
    assert_eq!(balance["totalEarned"], 150);
    assert_eq!(balance["totalRedeemed"], 100);

    let (_, history) = read(
        client
            .get(server.url("/transactions"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    let history = history["transactions"].as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0]["type"], "REWARD_REDEEMED");

    let reward: RewardId = ESPRESSO.parse().unwrap();
    assert_eq!(server.engine.store().redemption_count(reward).unwrap(), 5);
}

#[tokio::test]
async fn redeem_failures() {
    let server = TestServer::new().await;
    let client = Client::new();
    let token = server.token_for(ANA);

    let cases = [
        (json!({"rewardId": CAKE}), StatusCode::BAD_REQUEST),
        (json!({}), StatusCode::BAD_REQUEST),
        (json!({"rewardId": "not-a-uuid"}), StatusCode::BAD_REQUEST),
        (json!({"rewardId": RewardId::new_v4()}), StatusCode::NOT_FOUND),
        (json!({"rewardId": BREAD, "tenantId": CAFE}), StatusCode::NOT_FOUND),
    ];
    for (payload, expected) in cases {
        let (status, body) = read(
            client
                .post(server.url("/rewards/redeem"))
                .bearer_auth(&token)
                .json(&payload)
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, expected, "payload {payload}");
        assert_eq!(body["success"], false);
    }

    let (_, body) = read(
        client
            .post(server.url("/rewards/redeem"))
            .bearer_auth(&token)
            .json(&json!({"rewardId": CAKE}))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert!(body["message"].as_str().unwrap().contains("150"));

    let cafe: TenantId = CAFE.parse().unwrap();
    let ana: CustomerId = ANA.parse().unwrap();
    assert_eq!(server.engine.resolve_balance(cafe, ana).unwrap(), 150);
}

#[tokio::test]
async fn change_password_flow() {
    let server = TestServer::new().await;
    let client = Client::new();
    let token = server.token_for(ANA);

    let short = client
        .post(server.url("/auth/change-password"))
        .bearer_auth(&token)
        .json(&json!({"newPassword": "short"}))
        .send()
        .await
        .unwrap();
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);

    let (status, body) = read(
        client
            .post(server.url("/auth/change-password"))
            .bearer_auth(&token)
            .json(&json!({"newPassword": "a-much-better-secret"}))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Password updated successfully");

    let login = client
        .post(server.url("/auth/login"))
        .json(&json!({"phoneNumber": ANA_PHONE, "password": "a-much-better-secret"}))
        .send()
        .await
        .unwrap();
    let (_, body) = read(login).await;
    assert_eq!(body["user"]["passwordChangeRequired"], false);
}

#[tokio::test]
async fn recent_transactions_capped_at_ten() {
    let server = TestServer::new().await;
    let cafe: TenantId = CAFE.parse().unwrap();
    let ana: CustomerId = ANA.parse().unwrap();
    for _ in 0..15 {
        server.engine.record_earning(cafe, ana, 1, "visit").unwrap();
    }

    let (_, body) = read(
        Client::new()
            .get(server.url("/transactions/recent"))
            .bearer_auth(server.token_for(ANA))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["transactions"].as_array().unwrap().len(), 10);
}

/// Concurrent redemptions over HTTP never overdraw the ledger.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "opens many connections, may fail in CI"]
async fn concurrent_redemptions_single_customer() {
    let server = TestServer::new().await;
    let client = Client::new();
    let token = server.token_for(ANA);
    let cafe: TenantId = CAFE.parse().unwrap();
    let ana: CustomerId = ANA.parse().unwrap();
    server.engine.record_earning(cafe, ana, 850, "Opening").unwrap();

    const NUM_REQUESTS: usize = 200;
    let start = Instant::now();

    let handles: Vec<_> = (0..NUM_REQUESTS)
        .map(|_| {
            let client = client.clone();
            let url = server.url("/rewards/redeem");
            let token = token.clone();
            tokio::spawn(async move {
                client
                    .post(&url)
                    .bearer_auth(token)
                    .json(&json!({"rewardId": ESPRESSO}))
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let statuses: Vec<StatusCode> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let successful = statuses.iter().filter(|s| **s == StatusCode::OK).count();

    println!(
        "Concurrent redemptions: {} requests in {:?}, {} succeeded",
        NUM_REQUESTS,
        start.elapsed(),
        successful
    );

    assert!(statuses.iter().all(|s| matches!(
        *s,
        StatusCode::OK | StatusCode::BAD_REQUEST | StatusCode::CONFLICT
    )));
    assert!(successful <= 10);
    assert_eq!(
        server.engine.resolve_balance(cafe, ana).unwrap(),
        1_000 - 100 * successful as i64
    );
}
