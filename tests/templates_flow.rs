mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use common::{acquire_db_lock, body_json, body_to_vec, TestApp};
use docflow::render::DOCX_CONTENT_TYPE;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn document_render_merges_fields_with_request_data() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (_, token) = app.signed_in("admin@example.com", "admin").await?;
    let document = app
        .create_document(&token, "PR-GC-01", &[("objective", "Controlar registros")])
        .await?;
    let id = document["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            &format!("/api/documents/{id}/render"),
            &json!({
                "template_code": "acta",
                "data": { "name": "Nombre impreso", "firmado_por": "Ana" },
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some(DOCX_CONTENT_TYPE)
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("acta.docx"));

    let rendered: Value = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(rendered["code"], "PR-GC-01");
    assert_eq!(rendered["version"], 1);
    assert_eq!(rendered["status"], "published");
    assert_eq!(rendered["objective"], "Controlar registros");
    assert_eq!(rendered["name"], "Nombre impreso");
    assert_eq!(rendered["firmado_por"], "Ana");

    let missing = app
        .post_json(
            &format!("/api/documents/{}/render", Uuid::new_v4()),
            &json!({ "template_code": "acta" }),
            Some(&token),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn template_render_takes_flat_data_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (_, token) = app.signed_in("clerk@example.com", "usuario").await?;

    let response = app
        .post_json(
            "/api/templates/informe_auditoria/render",
            &json!({ "data": { "auditor": "Luis", "hallazgos": 3 } }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let rendered: Value = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    assert_eq!(rendered, json!({ "auditor": "Luis", "hallazgos": 3 }));

    let nested = app
        .post_json(
            "/api/templates/informe_auditoria/render",
            &json!({ "data": { "hallazgos": [1, 2] } }),
            Some(&token),
        )
        .await?;
    assert_eq!(nested.status(), StatusCode::BAD_REQUEST);
    let error = body_json(nested).await?;
    assert!(error["error"]
        .as_str()
        .unwrap_or_default()
        .contains("hallazgos"));

    let unauthenticated = app
        .post_json(
            "/api/templates/informe_auditoria/render",
            &json!({ "data": {} }),
            None,
        )
        .await?;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
