mod support;

use reqwest::StatusCode;
use serde_json::{json, Value};

use support::{jwt_config, TestServer};
use web_api::{JwtConfig, JwtService};

#[tokio::test]
async fn health_endpoint_responds() {
    let server = TestServer::spawn().await;
    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_auth_distinguishes_missing_and_invalid_tokens() {
    let server = TestServer::spawn().await;
    let user = server.signup("Alice").await;

    let missing = server.client.get(server.url("/api/users/me")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["message"], "Authentication required");

    let invalid = server
        .client
        .get(server.url("/api/users/me"))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::FORBIDDEN);
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token");

    let me: Value = server
        .client
        .get(server.url("/api/users/me"))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["email"], "alice@example.com");
    assert_eq!(me["role"], "user");
    assert!(me.get("password").is_none());
}

#[tokio::test]
async fn registration_conflicts_and_bad_login_are_reported() {
    let server = TestServer::spawn().await;
    server.signup("Bob").await;

    let duplicate = server
        .client
        .post(server.url("/api/users/register"))
        .json(&json!({
            "name": "Bob",
            "surname": "Again",
            "email": "bob@example.com",
            "password": "secret-pass",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let wrong_password = server
        .client
        .post(server.url("/api/users/login"))
        .json(&json!({ "email": "bob@example.com", "password": "not-it" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
}

async fn refresh(server: &TestServer, body: Value) -> reqwest::Response {
    server
        .client
        .post(server.url("/api/users/refresh"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn refresh_rotates_tokens_and_rejects_reuse() {
    let server = TestServer::spawn().await;
    let user = server.signup("Rosa").await;

    let response = refresh(&server, json!({ "refreshToken": user.refresh_token })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated: Value = response.json().await.unwrap();
    let access = rotated["accessToken"].as_str().unwrap();
    let next_refresh = rotated["refreshToken"].as_str().unwrap();
    assert_ne!(next_refresh, user.refresh_token);

    let me = server
        .client
        .get(server.url("/api/users/me"))
        .bearer_auth(access)
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);

    let reused = refresh(&server, json!({ "refreshToken": user.refresh_token })).await;
    assert_eq!(reused.status(), StatusCode::UNAUTHORIZED);
    let body: Value = reused.json().await.unwrap();
    assert_eq!(body["message"], "Invalid refresh token");

    let again = refresh(&server, json!({ "refreshToken": next_refresh })).await;
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_reports_missing_invalid_and_expired_tokens() {
    let server = TestServer::spawn().await;
    let user = server.signup("Sven").await;

    let expired_token = JwtService::new(JwtConfig {
        refresh_expiration_minutes: -5,
        ..jwt_config()
    })
    .generate_refresh_token(domain::UserId(user.id))
    .unwrap();

    let cases = [
        (json!({}), "Refresh token is required"),
        (json!({ "refreshToken": "" }), "Refresh token is required"),
        (json!({ "refreshToken": "not.a.jwt" }), "Invalid refresh token"),
        (json!({ "refreshToken": user.token }), "Invalid refresh token"),
        (json!({ "refreshToken": expired_token }), "Refresh token expired"),
    ];
    for (body, message) in cases {
        let response = refresh(&server, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], message);
    }
}

#[tokio::test]
async fn profile_update_and_admin_listing() {
    let server = TestServer::spawn().await;
    let user = server.signup("Carol").await;
    let admin = server.seed_admin().await;

    let mismatch = server
        .client
        .put(server.url("/api/users/me"))
        .bearer_auth(&user.token)
        .json(&json!({ "password": "new-password", "confirmPassword": "other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);

    let updated: Value = server
        .client
        .put(server.url("/api/users/me"))
        .bearer_auth(&user.token)
        .json(&json!({ "surname": "Renamed" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["surname"], "Renamed");
    assert_eq!(updated["name"], "Carol");

    let forbidden = server
        .client
        .get(server.url("/api/users"))
        .bearer_auth(&user.token)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let users: Vec<Value> = server
        .client
        .get(server.url("/api/users"))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn views_are_counted_once_per_client_ip_behind_proxy() {
    let server = TestServer::spawn_behind_proxy().await;
    let author = server.signup("Dana").await;
    let post = server.create_post(&author, "Sunset").await;
    let path = format!("/api/posts/{}", post["id"]);

    for ip in ["203.0.113.5", "198.51.100.7, 203.0.113.5", "198.51.100.7"] {
        let response = server
            .client
            .get(server.url(&path))
            .header("x-forwarded-for", ip)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let viewed: Value = server
        .client
        .get(server.url(&path))
        .header("x-real-ip", "198.51.100.7")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(viewed["views"], 2);

    let missing = server.client.get(server.url("/api/posts/424242")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forwarding_headers_from_direct_clients_do_not_add_views() {
    let server = TestServer::spawn().await;
    let author = server.signup("Dora").await;
    let post = server.create_post(&author, "Spoofed").await;
    let path = format!("/api/posts/{}", post["id"]);

    for i in 0..20 {
        let response = server
            .client
            .get(server.url(&path))
            .header("x-forwarded-for", format!("1.2.3.{i}"))
            .header("x-real-ip", format!("5.6.7.{i}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let viewed: Value = server
        .client
        .get(server.url(&path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(viewed["views"], 1);
}

#[tokio::test]
async fn oversized_forwarded_address_still_serves_the_post() {
    let server = TestServer::spawn_behind_proxy().await;
    let author = server.signup("Dirk").await;
    let post = server.create_post(&author, "Long header").await;
    let path = format!("/api/posts/{}", post["id"]);

    let response = server
        .client
        .get(server.url(&path))
        .header("x-forwarded-for", "9".repeat(200))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 无法解析的转发头按代理自身地址计数
    let viewed: Value = server
        .client
        .get(server.url(&path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(viewed["views"], 1);
}

#[tokio::test]
async fn post_edits_are_limited_to_owner_or_admin() {
    let server = TestServer::spawn().await;
    let author = server.signup("Eve").await;
    let stranger = server.signup("Frank").await;
    let admin = server.seed_admin().await;
    let post = server.create_post(&author, "Original").await;
    let path = format!("/api/posts/{}", post["id"]);

    let denied = server
        .client
        .put(server.url(&path))
        .bearer_auth(&stranger.token)
        .json(&json!({ "label": "Hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    for (user, label) in [(&author, "Edited"), (&admin, "Moderated")] {
        let edited: Value = server
            .client
            .put(server.url(&path))
            .bearer_auth(&user.token)
            .json(&json!({ "label": label, "text": "" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(edited["label"], label);
        assert_eq!(edited["text"], "posted from tests");
    }
}

#[tokio::test]
async fn like_toggle_and_like_count() {
    let server = TestServer::spawn().await;
    let author = server.signup("Gina").await;
    let fan = server.signup("Hank").await;
    let post = server.create_post(&author, "Likeable").await;
    let post_id = post["id"].as_i64().unwrap();

    let like_path = format!("/api/activity/post/{post_id}/like");
    let first: Value = server
        .client
        .post(server.url(&like_path))
        .bearer_auth(&fan.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first, json!({ "message": "Like added", "liked": true, "likeCount": 1 }));

    let count: Value = server
        .client
        .get(server.url(&format!("/api/activity/post/{post_id}/likeCount")))
        .bearer_auth(&author.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["likeCount"], 1);

    let second: Value = server
        .client
        .post(server.url(&like_path))
        .bearer_auth(&fan.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second, json!({ "message": "Like removed", "liked": false, "likeCount": 0 }));

    let unauthenticated = server.client.post(server.url(&like_path)).send().await.unwrap();
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let bad_kind = server
        .client
        .post(server.url(&format!("/api/activity/photo/{post_id}/like")))
        .bearer_auth(&fan.token)
        .send()
        .await
        .unwrap();
    assert_eq!(bad_kind.status(), StatusCode::BAD_REQUEST);

    // 帖子 id 当作评论 id 使用时按不存在处理
    let mismatched = server
        .client
        .post(server.url(&format!("/api/activity/comment/{post_id}/like")))
        .bearer_auth(&fan.token)
        .send()
        .await
        .unwrap();
    assert_eq!(mismatched.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comments_paginate_and_replies_attach_to_root_comment() {
    let server = TestServer::spawn().await;
    let author = server.signup("Ivy").await;
    let post = server.create_post(&author, "Discussion").await;
    let post_id = post["id"].as_i64().unwrap();

    let mut comment_ids = Vec::new();
    for i in 0..12 {
        let response = server
            .client
            .post(server.url(&format!("/api/activity/post/{post_id}/comment")))
            .bearer_auth(&author.token)
            .json(&json!({ "content": format!("comment {i}") }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Comment added");
        comment_ids.push(body["activity"]["id"].as_i64().unwrap());
    }

    let page = |query: &'static str| {
        let url = server.url(&format!("/api/activity/{post_id}/comment/comments{query}"));
        let client = server.client.clone();
        async move { client.get(url).send().await.unwrap().json::<Value>().await.unwrap() }
    };

    let first = page("").await;
    assert_eq!(first["items"].as_array().unwrap().len(), 5);
    assert_eq!(first["items"][0]["id"], comment_ids[0]);
    assert_eq!(first["meta"]["totalItems"], 12);
    assert_eq!(first["meta"]["totalPages"], 3);

    let last = page("?page=3&limit=5").await;
    assert_eq!(last["items"].as_array().unwrap().len(), 2);
    assert_eq!(last["meta"]["currentPage"], 3);

    let fallback = page("?page=zero&limit=-1").await;
    assert_eq!(fallback["meta"]["currentPage"], 1);
    assert_eq!(fallback["meta"]["limit"], 5);

    let post_after: Value = server
        .client
        .get(server.url(&format!("/api/posts/{post_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(post_after["commentCount"], 12);

    let root = comment_ids[0];
    let reply: Value = server
        .client
        .post(server.url(&format!("/api/activity/comment/{root}/comment")))
        .bearer_auth(&author.token)
        .json(&json!({ "content": "a reply" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["message"], "Reply added");
    let reply_id = reply["activity"]["id"].as_i64().unwrap();

    let nested: Value = server
        .client
        .post(server.url(&format!("/api/activity/reply/{reply_id}/comment")))
        .bearer_auth(&author.token)
        .json(&json!({ "content": "reply to a reply" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nested["activity"]["parentId"], root);
    assert_eq!(nested["activity"]["postId"], post_id);

    let replies: Value = server
        .client
        .get(server.url(&format!("/api/activity/{root}/reply/comments")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(replies["meta"]["totalItems"], 2);

    let blank = server
        .client
        .post(server.url(&format!("/api/activity/post/{post_id}/comment")))
        .bearer_auth(&author.token)
        .json(&json!({ "content": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
}
