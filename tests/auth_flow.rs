mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_and_me_report_effective_permissions() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_token = {
        app.insert_user("root@example.com", "s3cret-pass", "admin")
            .await?;
        app.login_token("ROOT@example.com", "s3cret-pass").await?
    };
    let response = app.get("/api/auth/me", Some(&admin_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await?;
    assert_eq!(me["email"], "root@example.com");
    assert_eq!(me["role"], "admin");
    assert_eq!(me["permissions"], json!(["*"]));

    let clerk = app
        .insert_user("clerk@example.com", "s3cret-pass", "usuario")
        .await?;
    app.grant(clerk, "gestion_documental:create").await?;
    let clerk_token = app.login_token("clerk@example.com", "s3cret-pass").await?;
    let me = body_json(app.get("/api/auth/me", Some(&clerk_token)).await?).await?;
    assert_eq!(me["role"], "usuario");
    assert_eq!(me["permissions"], json!(["gestion_documental:create"]));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_and_missing_token_are_unauthorized() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("ana@example.com", "right-password", "usuario")
        .await?;
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "ana@example.com", "password": "wrong-password" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/auth/me", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/documents", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn inactive_accounts_cannot_log_in() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (_, admin_token) = app.signed_in("admin@example.com", "admin").await?;
    let former = app
        .insert_user("former@example.com", "password123", "usuario")
        .await?;

    let response = app
        .post(&format!("/api/users/{former}/deactivate"), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "former@example.com", "password": "password123" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}
