mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, pdf, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

struct Cast {
    author: Uuid,
    author_token: String,
    admin_token: String,
    manager_token: String,
}

async fn cast(app: &TestApp) -> Result<Cast> {
    let (author, author_token) = app.signed_in("author@example.com", "usuario").await?;
    app.grant(author, "gestion_documental:create").await?;
    app.grant(author, "gestion_documental:edit").await?;
    let (_, admin_token) = app.signed_in("admin@example.com", "admin").await?;
    let (_, manager_token) = app.signed_in("manager@example.com", "gerencia").await?;
    Ok(Cast {
        author,
        author_token,
        admin_token,
        manager_token,
    })
}

async fn feed(app: &TestApp, token: &str) -> Result<Vec<Value>> {
    let body = body_json(app.get("/api/notifications", Some(token)).await?).await?;
    Ok(body["notifications"].as_array().cloned().unwrap_or_default())
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().unwrap_or_default().to_string()
}

async fn file_revision(app: &TestApp, token: &str, document_id: &str) -> Result<Value> {
    let response = app
        .patch_multipart(
            &format!("/api/documents/{document_id}"),
            &[("change_reason", "Nueva versión del formato")],
            Some(pdf("v2.pdf")),
            token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn file_change_creates_pending_revision_until_approved() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let v1 = app
        .create_document(&cast.author_token, "PR-GC-01", &[])
        .await?;
    let v1_id = id_of(&v1);

    let v2 = file_revision(&app, &cast.author_token, &v1_id).await?;
    let v2_id = id_of(&v2);
    assert_eq!(v2["version"], 2);
    assert_eq!(v2["status"], "pending_approval");
    assert_eq!(v2["parent_document_id"], v1["id"]);
    assert_eq!(v2["change_reason"], "Nueva versión del formato");

    let still_live = body_json(
        app.get(&format!("/api/documents/{v1_id}"), Some(&cast.author_token))
            .await?,
    )
    .await?;
    assert_eq!(still_live["status"], "published");

    for token in [&cast.admin_token, &cast.manager_token] {
        let entries = feed(&app, token).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["notification_type"], "pending_approval");
        assert_eq!(entries[0]["document_id"], v2["id"]);
        assert_eq!(entries[0]["is_read"], false);
    }
    assert!(feed(&app, &cast.author_token).await?.is_empty());

    let jobs = app.jobs_by_type("send-email").await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        jobs[0].payload["recipients"].as_array().map(Vec::len),
        Some(2)
    );

    let second = app
        .patch_multipart(
            &format!("/api/documents/{v1_id}"),
            &[("change_reason", "Otra más")],
            Some(pdf("v3.pdf")),
            &cast.author_token,
        )
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let pending = body_json(
        app.get("/api/documents/pending", Some(&cast.manager_token))
            .await?,
    )
    .await?;
    assert_eq!(pending.as_array().map(Vec::len), Some(1));

    let approved = app
        .post(
            &format!("/api/documents/{v2_id}/approve"),
            Some(&cast.manager_token),
        )
        .await?;
    assert_eq!(approved.status(), StatusCode::OK);
    let approved = body_json(approved).await?;
    assert_eq!(approved["action"], "approve");
    assert_eq!(approved["deleted"], false);
    assert_eq!(approved["document"]["status"], "published");
    assert!(approved["document"]["change_date"].is_string());

    let archived = body_json(
        app.get(&format!("/api/documents/{v1_id}"), Some(&cast.author_token))
            .await?,
    )
    .await?;
    assert_eq!(archived["status"], "archived");

    let author_feed = feed(&app, &cast.author_token).await?;
    assert_eq!(author_feed.len(), 1);
    assert_eq!(author_feed[0]["notification_type"], "approved");
    assert_eq!(author_feed[0]["document_id"], v2["id"]);

    let history = body_json(
        app.get(
            &format!("/api/documents/{v2_id}/history"),
            Some(&cast.author_token),
        )
        .await?,
    )
    .await?;
    let versions: Vec<i64> = history
        .as_array()
        .map(|rows| rows.iter().filter_map(|row| row["version"].as_i64()).collect())
        .unwrap_or_default();
    assert_eq!(versions, vec![2, 1]);

    let visible = body_json(app.get("/api/documents", Some(&cast.author_token)).await?).await?;
    assert_eq!(visible.as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_reviewers_may_approve_or_reject() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let pending = app
        .create_document(
            &cast.author_token,
            "PR-GC-01",
            &[("submit_for_review", "true")],
        )
        .await?;
    assert_eq!(pending["status"], "pending_approval");
    let id = id_of(&pending);

    let response = app
        .post(
            &format!("/api/documents/{id}/approve"),
            Some(&cast.author_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/documents/{id}/reject"),
            &json!({ "reason": "No" }),
            Some(&cast.author_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let unchanged = body_json(
        app.get(&format!("/api/documents/{id}"), Some(&cast.author_token))
            .await?,
    )
    .await?;
    assert_eq!(unchanged["status"], "pending_approval");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejecting_a_first_version_returns_it_to_draft() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let pending = app
        .create_document(
            &cast.author_token,
            "PR-GC-01",
            &[("submit_for_review", "true")],
        )
        .await?;
    let id = id_of(&pending);

    let missing_reason = app
        .post_json(
            &format!("/api/documents/{id}/reject"),
            &json!({ "reason": "   " }),
            Some(&cast.admin_token),
        )
        .await?;
    assert_eq!(missing_reason.status(), StatusCode::BAD_REQUEST);

    let rejected = app
        .post_json(
            &format!("/api/documents/{id}/reject"),
            &json!({ "reason": "Falta firma" }),
            Some(&cast.admin_token),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::OK);
    let rejected = body_json(rejected).await?;
    assert_eq!(rejected["deleted"], false);
    assert_eq!(rejected["document"]["status"], "draft");
    assert_eq!(rejected["document"]["change_reason"], "RECHAZADO: Falta firma");

    let author_feed = feed(&app, &cast.author_token).await?;
    assert_eq!(author_feed.len(), 1);
    assert_eq!(author_feed[0]["notification_type"], "rejected");

    let again = app
        .post(&format!("/api/documents/{id}/approve"), Some(&cast.admin_token))
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let resubmitted = app
        .post(&format!("/api/documents/{id}/submit"), Some(&cast.author_token))
        .await?;
    assert_eq!(resubmitted.status(), StatusCode::OK);
    let resubmitted = body_json(resubmitted).await?;
    assert_eq!(resubmitted["document"]["status"], "pending_approval");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejecting_a_revision_discards_it() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let v1 = app
        .create_document(&cast.author_token, "PR-GC-01", &[])
        .await?;
    let v1_id = id_of(&v1);
    let v2 = file_revision(&app, &cast.author_token, &v1_id).await?;
    let v2_id = id_of(&v2);
    assert_eq!(app.storage().object_count().await, 2);

    let rejected = app
        .post_json(
            &format!("/api/documents/{v2_id}/reject"),
            &json!({ "reason": "Formato incorrecto" }),
            Some(&cast.manager_token),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::OK);
    let rejected = body_json(rejected).await?;
    assert_eq!(rejected["deleted"], true);
    assert_eq!(rejected["action"], "reject");

    let gone = app
        .get(&format!("/api/documents/{v2_id}"), Some(&cast.author_token))
        .await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    let parent = body_json(
        app.get(&format!("/api/documents/{v1_id}"), Some(&cast.author_token))
            .await?,
    )
    .await?;
    assert_eq!(parent["status"], "published");
    assert_eq!(parent["version"], 1);
    assert_eq!(app.storage().object_count().await, 1);

    let author_feed = feed(&app, &cast.author_token).await?;
    assert_eq!(author_feed.len(), 1);
    assert_eq!(author_feed[0]["notification_type"], "rejected");
    assert_eq!(author_feed[0]["document_id"], v1["id"]);

    let author = cast.author.to_string();
    let revision = file_revision(&app, &cast.author_token, &v1_id).await?;
    assert_eq!(revision["version"], 2);
    assert_eq!(revision["created_by"], author);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn draft_with_a_new_file_goes_to_review_in_place() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let draft = app
        .create_document(
            &cast.author_token,
            "PR-GC-01",
            &[("save_as_draft", "true")],
        )
        .await?;
    assert_eq!(draft["status"], "draft");
    let id = id_of(&draft);
    assert!(feed(&app, &cast.manager_token).await?.is_empty());

    let replaced = app
        .patch_multipart(
            &format!("/api/documents/{id}"),
            &[("change_reason", "Archivo corregido")],
            Some(pdf("v2.pdf")),
            &cast.author_token,
        )
        .await?;
    assert_eq!(replaced.status(), StatusCode::OK);
    let replaced = body_json(replaced).await?;
    assert_eq!(replaced["id"], draft["id"]);
    assert_eq!(replaced["version"], 1);
    assert_eq!(replaced["status"], "pending_approval");
    assert_eq!(replaced["file_name"], "v2.pdf");
    assert_eq!(replaced["change_reason"], "Archivo corregido");

    let document_id: Uuid = id.parse()?;
    let file_path: String = app
        .with_conn(move |conn| {
            use diesel::prelude::*;
            use docflow::schema::documents;
            Ok(documents::table
                .find(document_id)
                .select(documents::file_path)
                .first(conn)?)
        })
        .await?;
    assert!(app.storage().contains(&file_path).await);
    assert_eq!(app.storage().object_count().await, 1);

    for token in [&cast.admin_token, &cast.manager_token] {
        let entries = feed(&app, token).await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["notification_type"], "pending_approval");
        assert_eq!(entries[0]["document_id"], draft["id"]);
    }
    assert_eq!(app.jobs_by_type("send-email").await?.len(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn simultaneous_approve_and_reject_settle_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let pending = app
        .create_document(
            &cast.author_token,
            "PR-GC-01",
            &[("submit_for_review", "true")],
        )
        .await?;
    let id = id_of(&pending);

    let approve_path = format!("/api/documents/{id}/approve");
    let reject_path = format!("/api/documents/{id}/reject");
    let reason = json!({ "reason": "Falta firma" });
    let (approved, rejected) = tokio::join!(
        app.post(&approve_path, Some(&cast.manager_token)),
        app.post_json(&reject_path, &reason, Some(&cast.admin_token)),
    );
    let (approved, rejected) = (approved?.status(), rejected?.status());

    let mut statuses = [approved, rejected];
    statuses.sort_by_key(|status| status.as_u16());
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    let settled = body_json(
        app.get(&format!("/api/documents/{id}"), Some(&cast.author_token))
            .await?,
    )
    .await?;
    let expected = if approved == StatusCode::OK {
        "published"
    } else {
        "draft"
    };
    assert_eq!(settled["status"], expected);

    let author_feed = feed(&app, &cast.author_token).await?;
    assert_eq!(author_feed.len(), 1);
    let kind = if approved == StatusCode::OK {
        "approved"
    } else {
        "rejected"
    };
    assert_eq!(author_feed[0]["notification_type"], kind);

    app.cleanup().await?;
    Ok(())
}
