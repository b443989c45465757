mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::TestApp;

const DEVICE: &str = "6F9619FF-8B86-D011-B42D-00C04FC964FF";
const OTHER_DEVICE: &str = "0b2c4d6e-1111-4222-8333-944455556666";

async fn catalog(app: &TestApp) -> (String, i64, i64, i64) {
    let staff = app.staff("admin@example.com").await;
    let plain = app.product(&staff, json!({"name": "کتاب", "price_toman": 100000.0, "reduced_price_toman": 80000.0})).await;
    let shoe = app.product(&staff, json!({"name": "کفش", "price_toman": 150000.0})).await;
    let variant = app
        .post(
            &format!("/api/admin/products/{shoe}/variants/"),
            json!({"sku": "SHOE-42", "attributes": {"size": "42"}, "price_toman": 120000.0, "stock_quantity": 2}),
            &[("authorization", &staff)],
        )
        .await;
    assert_eq!(variant.status, StatusCode::CREATED, "{}", variant.body);
    (staff, plain, shoe, variant.body["id"].as_i64().unwrap())
}

#[tokio::test]
async fn test_guest_cart_requires_device_id() {
    let app = TestApp::new();
    let missing = app.get("/api/shop/cart/", &[]).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["error"], "Device ID required for guest users. Send X-Device-ID header.");

    let invalid = app.get("/api/shop/cart/", &[("x-device-id", "not-a-uuid")]).await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.body["error"], "Invalid device ID format");

    let empty = app.get("/api/shop/cart/", &[("x-device-id", DEVICE)]).await;
    assert_eq!(empty.status, StatusCode::OK);
    assert_eq!(empty.body["is_guest"], true);
    assert_eq!(empty.body["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_guest_cart_lines_and_variants() {
    let app = TestApp::new();
    let (_, plain, shoe, variant) = catalog(&app).await;
    let guest = [("x-device-id", DEVICE)];

    let added = app.post("/api/shop/cart/add/", json!({"product_id": plain, "quantity": 2}), &guest).await;
    assert_eq!(added.status, StatusCode::CREATED, "{}", added.body);
    assert!(added.body["cart"]["total_price_toman"].is_number(), "{}", added.body);
    assert_eq!(added.body["cart"]["total_price_toman"].as_f64(), Some(160000.0));
    assert_eq!(added.body["cart"]["total_original_price_toman"].as_f64(), Some(200000.0));

    let needs_variant = app.post("/api/shop/cart/add/", json!({"product_id": shoe}), &guest).await;
    assert_eq!(needs_variant.status, StatusCode::BAD_REQUEST);
    assert_eq!(needs_variant.body["available_variants"][0]["sku"], "SHOE-42");

    let too_many = app.post("/api/shop/cart/add/", json!({"product_id": shoe, "variant_id": variant, "quantity": 3}), &guest).await;
    assert_eq!(too_many.status, StatusCode::BAD_REQUEST);
    assert_eq!(too_many.body["error"], "Only 2 items available in stock");

    let shoe_line = app.post("/api/shop/cart/add/", json!({"product_id": shoe, "variant_id": variant, "quantity": 2}), &guest).await;
    assert_eq!(shoe_line.status, StatusCode::CREATED);
    let cart = &shoe_line.body["cart"];
    assert_eq!(cart["total_items"], 4);
    let line = cart["items"].as_array().unwrap().iter().find(|l| l["variant_id"] == variant).unwrap().clone();
    assert_eq!(line["unit_price"].as_f64(), Some(120000.0));

    let zero = app.post("/api/shop/cart/add/", json!({"product_id": plain, "quantity": 0}), &guest).await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);

    let other = app.get("/api/shop/cart/", &[("x-device-id", OTHER_DEVICE)]).await;
    assert_eq!(other.body["items"].as_array().unwrap().len(), 0);

    let item = line["id"].as_i64().unwrap();
    let decreased = app.post("/api/shop/cart/remove/", json!({"item_id": item, "quantity": 1}), &guest).await;
    assert_eq!(decreased.body["message"], "Cart item quantity decreased successfully");
    let removed = app.post("/api/shop/cart/remove/", json!({"item_id": item}), &guest).await;
    assert_eq!(removed.body["message"], "Cart item removed successfully");
    assert_eq!(removed.body["cart"]["items"].as_array().unwrap().len(), 1);

    let foreign = app.post("/api/shop/cart/update/", json!({"item_id": item, "quantity": 1}), &[("x-device-id", OTHER_DEVICE)]).await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_guest_checkout() {
    let app = TestApp::new();
    let (_, plain, _, _) = catalog(&app).await;
    let guest = [("x-device-id", DEVICE)];

    let empty = app.post("/api/shop/checkout/", json!({"email": "g@example.com"}), &guest).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    assert_eq!(empty.body["error"], "Cart is empty");

    app.post("/api/shop/cart/add/", json!({"product_id": plain, "quantity": 2}), &guest).await;

    let no_email = app.post("/api/shop/checkout/", json!({"city": "Tehran"}), &guest).await;
    assert_eq!(no_email.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_email.body["error"], "Email is required for guest checkout");

    let no_address = app.post("/api/shop/checkout/", json!({"email": "g@example.com", "city": "Tehran"}), &guest).await;
    assert_eq!(no_address.status, StatusCode::BAD_REQUEST);

    let placed = app
        .post(
            "/api/shop/checkout/",
            json!({
                "email": "G@Example.com", "receiver_name": "Mina Karimi", "street_address": "Enghelab 3",
                "city": "Tehran", "phone": "0912", "delivery_option": "express", "payment_method": "card"
            }),
            &guest,
        )
        .await;
    assert_eq!(placed.status, StatusCode::CREATED, "{}", placed.body);
    assert_eq!(placed.body["success"], true);
    let order = &placed.body["order"];
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_toman"].as_f64(), Some(210000.0));

    let cart = app.get("/api/shop/cart/", &guest).await;
    assert_eq!(cart.body["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_customer_checkout_orders_and_admin() {
    let app = TestApp::new();
    let (staff, plain, _, _) = catalog(&app).await;
    let bearer = app.customer("buyer@example.com").await;
    let auth = [("authorization", bearer.as_str())];

    let added = app.post("/api/shop/cart/add/", json!({"product_id": plain}), &auth).await;
    assert_eq!(added.body["cart"]["is_guest"], false);

    let placed = app
        .post(
            "/api/shop/checkout/",
            json!({"receiver_name": "Sara", "street_address": "Azadi 1", "city": "Karaj", "phone": "0935"}),
            &auth,
        )
        .await;
    assert_eq!(placed.status, StatusCode::CREATED, "{}", placed.body);
    assert_eq!(placed.body["order"]["status"], "paid");
    assert_eq!(placed.body["order"]["total_toman"].as_f64(), Some(110000.0));
    let id = placed.body["order"]["id"].as_i64().unwrap();

    let addresses = app.get("/api/accounts/customer/addresses/", &auth).await;
    assert_eq!(addresses.body["addresses"].as_array().unwrap().len(), 1);

    let mine = app.get("/api/shop/orders/", &auth).await;
    assert_eq!(mine.body.as_array().unwrap().len(), 1);
    assert_eq!(app.get("/api/shop/orders/", &[]).await.status, StatusCode::UNAUTHORIZED);

    let track = app.get(&format!("/api/shop/orders/{id}/track/"), &auth).await;
    assert_eq!(track.body["tracking_number"], format!("TRK{id:06}"));
    assert_eq!(track.body["timeline"].as_array().unwrap().len(), 5);

    let cancelled = app.call(Method::POST, &format!("/api/shop/orders/{id}/cancel/"), None, &auth).await;
    assert_eq!(cancelled.status, StatusCode::OK);
    assert_eq!(cancelled.body["status"], "cancellation_requested");
    assert_eq!(cancelled.body["reason"], "Customer requested cancellation");

    let stranger = app.customer("stranger@example.com").await;
    let hidden = app.get(&format!("/api/shop/orders/{id}/"), &[("authorization", &stranger)]).await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);

    let admin = [("authorization", staff.as_str())];
    assert_eq!(app.get("/api/admin/orders/", &auth).await.status, StatusCode::FORBIDDEN);
    let paid = app.get("/api/admin/orders/?paid=true", &admin).await;
    assert_eq!(paid.body["count"], 1);

    let unpaid = app.post(&format!("/api/admin/orders/{id}/paid/"), json!({"paid": false}), &admin).await;
    assert_eq!(unpaid.body["paid"], false);
    assert_eq!(app.get("/api/admin/orders/?paid=true", &admin).await.body["count"], 0);

    let csv = app.get("/api/admin/orders/export/csv/", &admin).await;
    assert_eq!(csv.status, StatusCode::OK);
    assert!(csv.content_type.starts_with("text/csv"));
    assert!(csv.text.lines().next().unwrap().starts_with("ID,Order Number"));
    assert_eq!(csv.text.lines().count(), 2);
}

#[tokio::test]
async fn test_cart_throttle() {
    let app = TestApp::new();
    let guest = [("x-device-id", DEVICE), ("x-forwarded-for", "10.2.2.2")];
    for _ in 0..50 {
        assert_eq!(app.get("/api/shop/cart/", &guest).await.status, StatusCode::OK);
    }
    let throttled = app.get("/api/shop/cart/", &guest).await;
    assert_eq!(throttled.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(throttled.body["detail"], "Too many requests, please try again later.");
}

#[tokio::test]
async fn test_wishlist() {
    let app = TestApp::new();
    let (_, plain, shoe, _) = catalog(&app).await;
    let bearer = app.customer("wish@example.com").await;
    let auth = [("authorization", bearer.as_str())];

    let saved = app.post("/api/shop/wishlist/", json!({"product_id": plain, "priority": "high"}), &auth).await;
    assert_eq!(saved.status, StatusCode::CREATED, "{}", saved.body);
    assert_eq!(saved.body["priority_display_fa"], "زیاد");
    let updated = app.post("/api/shop/wishlist/", json!({"product_id": plain, "quantity": 2}), &auth).await;
    assert_eq!(updated.status, StatusCode::OK);

    let toggled = app.post("/api/shop/wishlist/toggle/", json!({"product_id": shoe}), &auth).await;
    assert_eq!(toggled.body["in_wishlist"], true);

    let status = app.get(&format!("/api/shop/wishlist/status/?product_ids={plain},{shoe},999"), &auth).await;
    assert_eq!(status.body[plain.to_string()], true);
    assert_eq!(status.body["999"], false);

    let list = app.get("/api/shop/wishlist/", &auth).await;
    assert_eq!(list.body.as_array().unwrap().len(), 2);

    let path = format!("/api/shop/wishlist/product/{plain}/");
    assert_eq!(app.call(Method::DELETE, &path, None, &auth).await.status, StatusCode::NO_CONTENT);
    assert_eq!(app.call(Method::DELETE, &path, None, &auth).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get("/api/shop/wishlist/", &[]).await.status, StatusCode::UNAUTHORIZED);
}
