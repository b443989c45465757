mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{TestApp, PASSWORD};
use myshop::config::Config;
use myshop::services::mail::subject;
use myshop::store::{AccountStore, SecurityStore};

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let reply = app.get("/health", &[]).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"status": "healthy", "service": "myshop"}));
}

#[tokio::test]
async fn test_register_verify_and_profile() {
    let app = TestApp::new();
    let id = app.register("Sara@Example.com").await;

    let duplicate = app
        .post("/api/accounts/register/", json!({"email": "sara@example.com", "password": PASSWORD}), &[])
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let customer = app.store.customer(id).await.unwrap().unwrap();
    assert!(!customer.is_email_verified);
    assert_eq!(app.mail.sent_to("sara@example.com").await[0].subject, subject::VERIFY_EMAIL);

    let path = format!("/api/accounts/verify-email/{}/", customer.email_verification_token);
    assert_eq!(app.get(&path, &[]).await.status, StatusCode::OK);
    assert!(app.store.customer(id).await.unwrap().unwrap().is_email_verified);
    assert_eq!(app.get("/api/accounts/verify-email/not-a-token/", &[]).await.status, StatusCode::BAD_REQUEST);

    let login = app.login("sara@example.com").await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.body["security"]["message"], "Login successful");
    let bearer = format!("Bearer {}", login.body["access"].as_str().unwrap());

    let profile = app.get("/api/accounts/customer/", &[("authorization", &bearer)]).await;
    assert_eq!(profile.body["email"], "sara@example.com");
    assert!(profile.body.get("password_hash").is_none());

    let updated = app
        .call(Method::PUT, "/api/accounts/customer/", Some(json!({"last_name": "Ahmadi"})), &[("authorization", &bearer)])
        .await;
    assert_eq!(updated.body["last_name"], "Ahmadi");

    assert_eq!(app.get("/api/accounts/customer/", &[]).await.status, StatusCode::UNAUTHORIZED);
    let bad = app.get("/api/accounts/customer/", &[("authorization", "Bearer nope")]).await;
    assert_eq!(bad.status, StatusCode::UNAUTHORIZED);
    assert!(bad.body.get("detail").is_some());
}

#[tokio::test]
async fn test_refresh_issues_new_access_token() {
    let app = TestApp::new();
    app.register("reza@example.com").await;
    let login = app.login("reza@example.com").await;

    let refreshed = app.post("/api/accounts/token/refresh/", json!({"refresh": login.body["refresh"]}), &[]).await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert_eq!(refreshed.body["user_id"], login.body["user_id"]);

    let wrong_kind = app.post("/api/accounts/token/refresh/", json!({"refresh": login.body["access"]}), &[]).await;
    assert_eq!(wrong_kind.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_address_book() {
    let app = TestApp::new();
    let bearer = app.customer("ali@example.com").await;
    let auth = [("authorization", bearer.as_str())];
    let address = json!({
        "receiver_name": "Ali", "street_address": "Valiasr 12", "city": "Tehran", "phone": "0912",
        "postal_code": "12345"
    });

    let first = app.post("/api/accounts/customer/addresses/", address.clone(), &auth).await;
    assert_eq!(first.status, StatusCode::CREATED);
    let again = app.post("/api/accounts/customer/addresses/", address, &auth).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body["address_id"], first.body["address_id"]);

    let missing = app.post("/api/accounts/customer/addresses/", json!({"receiver_name": "Ali"}), &auth).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    for city in ["Shiraz", "Tabriz"] {
        let extra = json!({"receiver_name": "Ali", "street_address": "Main", "city": city, "phone": "0912"});
        assert_eq!(app.post("/api/accounts/customer/addresses/", extra, &auth).await.status, StatusCode::CREATED);
    }
    let full = json!({"receiver_name": "Ali", "street_address": "Main", "city": "Yazd", "phone": "0912"});
    assert_eq!(app.post("/api/accounts/customer/addresses/", full, &auth).await.status, StatusCode::BAD_REQUEST);

    let list = app.get("/api/accounts/customer/addresses/", &auth).await;
    assert_eq!(list.body["addresses"].as_array().unwrap().len(), 3);

    let id = first.body["address_id"].as_i64().unwrap();
    let path = format!("/api/accounts/customer/addresses/{id}/");
    let edited = json!({"receiver_name": "Ali", "street_address": "Valiasr 14", "city": "Tehran", "phone": "0912"});
    let reply = app.call(Method::PUT, &path, Some(edited), &auth).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["street_address"], "Valiasr 14");

    assert_eq!(app.call(Method::DELETE, &path, None, &auth).await.status, StatusCode::OK);
    assert_eq!(app.call(Method::DELETE, &path, None, &auth).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_progressive_login_security_and_unlock() {
    let mut config = Config::for_memory();
    config.security.max_per_minute = 100;
    let app = TestApp::with_config(config);
    app.register("target@example.com").await;

    let mut statuses = Vec::new();
    for _ in 0..12 {
        let reply = app
            .post("/api/accounts/token/", json!({"email": "target@example.com", "password": "wrong"}), &[("x-forwarded-for", "10.0.0.9")])
            .await;
        statuses.push(reply.status);
        if reply.status == StatusCode::BAD_REQUEST {
            assert_eq!(reply.body["verification_required"], true);
        }
    }
    assert!(statuses[..9].iter().all(|s| *s == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[9], StatusCode::BAD_REQUEST);
    assert_eq!(statuses[11], StatusCode::UNAUTHORIZED);

    let lock = app.store.active_lock("target@example.com").await.unwrap().expect("account locked");
    let subjects: Vec<String> = app.mail.sent_to("target@example.com").await.into_iter().map(|m| m.subject).collect();
    assert!(subjects.iter().any(|s| s == subject::VERIFICATION_CODE));
    assert!(subjects.iter().any(|s| s == subject::ACCOUNT_LOCKED));

    let status = app.post("/api/accounts/security/status/", json!({"email": "target@example.com"}), &[]).await;
    assert_eq!(status.body["is_locked"], true);
    assert_eq!(status.body["security_tier"], 5);

    let resend = app.post("/api/accounts/resend-code/", json!({"email": "target@example.com"}), &[]).await;
    assert_eq!(resend.status, StatusCode::FORBIDDEN);

    let unlocked = app.get(&format!("/api/accounts/unlock/{}/", lock.unlock_token), &[]).await;
    assert_eq!(unlocked.status, StatusCode::OK);
    assert_eq!(unlocked.body["message"], "Your account has been successfully unlocked!");
    assert!(app.mail.sent_to("target@example.com").await.iter().any(|m| m.subject == subject::ACCOUNT_UNLOCKED));

    let reused = app.get(&format!("/api/accounts/unlock/{}/", lock.unlock_token), &[]).await;
    assert_eq!(reused.status, StatusCode::BAD_REQUEST);
    assert_eq!(reused.body["error"], "Invalid or expired unlock link.");
}

#[tokio::test]
async fn test_resend_code_is_rate_limited() {
    let app = TestApp::new();
    for _ in 0..3 {
        let reply = app.post("/api/accounts/resend-code/", json!({"email": "code@example.com"}), &[]).await;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let reply = app.post("/api/accounts/resend-code/", json!({"email": "code@example.com"}), &[]).await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.body["detail"], "Too many code requests. Please wait 5 minutes.");

    let missing = app.post("/api/accounts/resend-code/", json!({}), &[]).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_security_dashboard_requires_staff() {
    let app = TestApp::new();
    let customer = app.customer("plain@example.com").await;
    let staff = app.staff("boss@example.com").await;

    let denied = app.get("/api/accounts/security/dashboard/", &[("authorization", &customer)]).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    let dashboard = app.get("/api/accounts/security/dashboard/", &[("authorization", &staff)]).await;
    assert_eq!(dashboard.status, StatusCode::OK);
}

#[tokio::test]
async fn test_sessions_and_revoke_all() {
    let app = TestApp::new();
    app.register("multi@example.com").await;

    let mut tokens = Vec::new();
    for (name, id) in [("Pixel", "dev-a"), ("iPhone", "dev-b")] {
        let reply = app
            .post(
                "/api/accounts/token/",
                json!({
                    "email": "multi@example.com", "password": PASSWORD,
                    "device_info": {"name": name, "platform": "android", "id": id}
                }),
                &[("x-forwarded-for", "10.1.1.1")],
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        tokens.push(format!("Bearer {}", reply.body["access"].as_str().unwrap()));
    }

    let listed = app.get("/api/accounts/sessions/", &[("authorization", &tokens[0])]).await;
    assert_eq!(listed.body["total"], 2);
    let current = app.get("/api/accounts/sessions/current/", &[("authorization", &tokens[0])]).await;
    assert_eq!(current.body["session"]["device"], "Pixel");

    let revoked = app.post("/api/accounts/sessions/revoke-all/", json!({}), &[("authorization", &tokens[0])]).await;
    assert_eq!(revoked.body["revoked_count"], 1);

    assert_eq!(app.get("/api/accounts/customer/", &[("authorization", &tokens[0])]).await.status, StatusCode::OK);
    assert_eq!(app.get("/api/accounts/customer/", &[("authorization", &tokens[1])]).await.status, StatusCode::UNAUTHORIZED);

    let everything = app
        .post("/api/accounts/sessions/revoke-all/", json!({"include_current": true}), &[("authorization", &tokens[0])])
        .await;
    assert_eq!(everything.status, StatusCode::OK);
    assert_eq!(app.get("/api/accounts/customer/", &[("authorization", &tokens[0])]).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_delete_account_keeps_orders_and_anonymizes_history() {
    let app = TestApp::new();
    let bearer = app.customer("gone@example.com").await;
    let auth = [("authorization", bearer.as_str())];

    let refused = app.post("/api/accounts/delete-account/", json!({"password": "nope"}), &auth).await;
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
    let missing = app.post("/api/accounts/delete-account/", json!({}), &auth).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let deleted = app.post("/api/accounts/delete-account/", json!({"password": PASSWORD}), &auth).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.body["success"], true);
    assert!(app.store.customer_by_email("gone@example.com").await.unwrap().is_none());
    assert!(app.mail.sent_to("gone@example.com").await.iter().any(|m| m.subject == subject::ACCOUNT_DELETED));
    assert_eq!(app.get("/api/accounts/customer/", &auth).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_signs_out_everywhere() {
    let app = TestApp::new();
    let id = app.register("mina@example.com").await;
    let old = app.login("mina@example.com").await;
    let old_bearer = format!("Bearer {}", old.body["access"].as_str().unwrap());

    let requested = app.post("/api/accounts/password-reset/", json!({"email": "Mina@Example.com"}), &[]).await;
    assert_eq!(requested.status, StatusCode::OK);
    let unknown = app.post("/api/accounts/password-reset/", json!({"email": "ghost@example.com"}), &[]).await;
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(unknown.body, requested.body);
    assert!(app.mail.sent_to("ghost@example.com").await.is_empty());

    let token = app.store.customer(id).await.unwrap().unwrap().password_reset_token.unwrap();
    let path = format!("/api/accounts/password-reset/{token}/");
    let sent = app.mail.sent_to("mina@example.com").await;
    let reset_mail = sent.iter().find(|m| m.subject == subject::PASSWORD_RESET).unwrap();
    assert!(reset_mail.body.contains(&path));

    let mismatch = app.post(&path, json!({"new_password": "brand-new-pass", "new_password_confirm": "other-pass"}), &[]).await;
    assert_eq!(mismatch.status, StatusCode::BAD_REQUEST);
    let short = app.post(&path, json!({"new_password": "short", "new_password_confirm": "short"}), &[]).await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);

    let new_password = json!({"new_password": "brand-new-pass", "new_password_confirm": "brand-new-pass"});
    let done = app.post(&path, new_password.clone(), &[]).await;
    assert_eq!(done.status, StatusCode::OK, "{}", done.body);
    assert_eq!(done.body["sessions_revoked"], 1);

    assert_eq!(app.get("/api/accounts/customer/", &[("authorization", &old_bearer)]).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.post(&path, new_password, &[]).await.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.login("mina@example.com").await.status, StatusCode::UNAUTHORIZED);
    let fresh = app.post("/api/accounts/token/", json!({"email": "mina@example.com", "password": "brand-new-pass"}), &[]).await;
    assert_eq!(fresh.status, StatusCode::OK, "{}", fresh.body);
}

#[tokio::test]
async fn test_password_reset_link_expires_after_a_day() {
    let app = TestApp::new();
    let id = app.register("late@example.com").await;
    app.post("/api/accounts/password-reset/", json!({"email": "late@example.com"}), &[]).await;

    let mut customer = app.store.customer(id).await.unwrap().unwrap();
    let token = customer.password_reset_token.unwrap();
    customer.password_reset_sent_at = Some(chrono::Utc::now() - chrono::Duration::hours(25));
    app.store.update_customer(&customer).await.unwrap();

    let path = format!("/api/accounts/password-reset/{token}/");
    let body = json!({"new_password": "brand-new-pass", "new_password_confirm": "brand-new-pass"});
    let expired = app.post(&path, body.clone(), &[]).await;
    assert_eq!(expired.status, StatusCode::BAD_REQUEST);
    assert!(expired.text.contains("Password reset link has expired."));
    assert!(app.store.customer(id).await.unwrap().unwrap().password_reset_token.is_none());
    assert_eq!(app.post("/api/accounts/password-reset/not-a-token/", body, &[]).await.status, StatusCode::BAD_REQUEST);
}
