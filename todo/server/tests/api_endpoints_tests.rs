use axum::http::StatusCode;
use insta::assert_yaml_snapshot;
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{body_json, get, json_request, session_cookie};

#[tokio::test]
async fn can_manage_tasks_through_api() -> anyhow::Result<()> {
    common::init_tracing();
    let db = common::setup_db().await?;
    let user_id = common::seed_user(&db, "apiuser").await?;
    let cookie = session_cookie(user_id, "apiuser");
    let app = common::create_test_app(db);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/tasks/",
            Some(&cookie),
            r#"{"title": "Test Task", "description": "Created over the API"}"#,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["message"], "Task created");
    let id = created["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/tasks/", Some(&cookie)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    let tasks = listed["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Test Task");
    assert_eq!(tasks[0]["status"], "pending");
    assert_eq!(tasks[0]["due_date"], serde_json::Value::Null);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/tasks/{id}/"),
            Some(&cookie),
            r#"{"title": "Updated Task", "status": "completed"}"#,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"message": "Task updated"}));

    let response = app
        .clone()
        .oneshot(get(&format!("/api/tasks/{id}/"), Some(&cookie)))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    assert_eq!(task["id"].as_i64(), Some(id));
    assert_eq!(task["title"], "Updated Task");
    assert_eq!(task["status"], "completed");
    assert_eq!(task["description"], serde_json::Value::Null);

    let response = app
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("/api/tasks/{id}/"),
            Some(&cookie),
            "",
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"message": "Task deleted"}));

    let response = app
        .oneshot(get(&format!("/api/tasks/{id}/"), Some(&cookie)))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"error": "Task not found"}));
    Ok(())
}

#[tokio::test]
async fn cannot_use_api_without_session() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let app = common::create_test_app(db);

    let requests = vec![
        get("/api/tasks/", None),
        json_request("POST", "/api/tasks/", None, r#"{"title": "Sneaky"}"#),
        get("/api/tasks/1/", None),
        json_request("PUT", "/api/tasks/1/", None, r#"{"title": "Sneaky"}"#),
        json_request("DELETE", "/api/tasks/1/", None, ""),
    ];

    for request in requests {
        let uri = request.uri().to_string();
        let response = app.clone().oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(
            body_json(response).await,
            json!({"error": "Authentication required"})
        );
    }
    Ok(())
}

#[tokio::test]
async fn cannot_use_api_with_forged_token() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let app = common::create_test_app(db);

    let token = todo_server::auth::encode_jwt(1, "intruder".to_string(), "wrong_secret")?;
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/tasks/")
                .header("authorization", format!("Bearer {token}"))
                .body(axum::body::Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn can_authenticate_api_with_bearer_token() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let user_id = common::seed_user(&db, "apiuser").await?;
    let app = common::create_test_app(db);

    let token = todo_server::auth::encode_jwt(user_id, "apiuser".to_string(), common::JWT_SECRET)?;
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/tasks/")
                .header("authorization", format!("Bearer {token}"))
                .body(axum::body::Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"tasks": []}));
    Ok(())
}

#[tokio::test]
async fn cannot_create_task_from_malformed_body() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let user_id = common::seed_user(&db, "apiuser").await?;
    let cookie = session_cookie(user_id, "apiuser");
    let app = common::create_test_app(db);

    let bodies = ["{not json", r#"{"description": "no title"}"#, r#"{"title": null}"#];
    for body in bodies {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/tasks/", Some(&cookie), body))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body_json(response).await, json!({"error": "Invalid data"}));
    }

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/tasks/")
                .header("cookie", &cookie)
                .header("content-type", "text/plain")
                .body(axum::body::Body::from(r#"{"title": "Wrong type"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/tasks/", Some(&cookie))).await?;
    assert_eq!(body_json(response).await, json!({"tasks": []}));
    Ok(())
}

#[tokio::test]
async fn cannot_create_task_with_invalid_fields() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let user_id = common::seed_user(&db, "apiuser").await?;
    let cookie = session_cookie(user_id, "apiuser");
    let app = common::create_test_app(db);

    let long_title = "x".repeat(201);
    let body = json!({
        "title": long_title,
        "due_date": "2000-01-01T00:00:00Z",
    })
    .to_string();
    let response = app
        .oneshot(json_request("POST", "/api/tasks/", Some(&cookie), &body))
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_yaml_snapshot!(body_json(response).await, @r#"
    error: Invalid data
    errors:
      due_date: Due date must be in the future.
      title: Title must be 200 characters or less.
    "#);
    Ok(())
}

#[tokio::test]
async fn cannot_touch_tasks_of_another_user() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let alice = common::seed_user(&db, "alice").await?;
    let bob = common::seed_user(&db, "bob").await?;
    let alice_cookie = session_cookie(alice, "alice");
    let bob_cookie = session_cookie(bob, "bob");
    let app = common::create_test_app(db);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/tasks/",
            Some(&alice_cookie),
            r#"{"title": "Alice only"}"#,
        ))
        .await?;
    let id = body_json(response).await["id"].as_i64().unwrap();
    let uri = format!("/api/tasks/{id}/");

    let response = app.clone().oneshot(get(&uri, Some(&bob_cookie))).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request("PUT", &uri, Some(&bob_cookie), r#"{"title": "Mine now"}"#))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request("DELETE", &uri, Some(&bob_cookie), ""))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/api/tasks/", Some(&bob_cookie))).await?;
    assert_eq!(body_json(response).await, json!({"tasks": []}));

    let response = app.oneshot(get(&uri, Some(&alice_cookie))).await?;
    assert_eq!(body_json(response).await["title"], "Alice only");
    Ok(())
}

#[tokio::test]
async fn can_serve_openapi_document() -> anyhow::Result<()> {
    let db = common::setup_db().await?;
    let app = common::create_test_app(db);

    let response = app.oneshot(get("/api/openapi.json", None)).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert!(doc["paths"]["/api/tasks/"]["post"].is_object());
    assert!(doc["paths"]["/api/tasks/{id}/"]["delete"].is_object());
    Ok(())
}
