use std::collections::HashSet;
use std::time::Duration;

use axum::extract::{multipart::Field, Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::{prelude::*, select, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::email::{dispatch_email, EmailKind, EmailMessage};
use crate::error::{AppError, AppResult};
use crate::models::{
    Document, DocumentFileChange, DocumentMetadataChanges, DocumentStatusChange, NewDocument,
};
use crate::notifications::{
    active_user_email, notify_users, reviewer_audience, NewFeedEntry, NotificationKind,
};
use crate::permissions::{require_permission, DOCUMENTS_CREATE, DOCUMENTS_DELETE, DOCUMENTS_EDIT};
use crate::schema::documents;
use crate::state::AppState;
use crate::storage::{attachment_disposition, document_blob_path};
use crate::validation::{
    check_upload, max_len, normalize_code, required, CheckedUpload, ValidationError,
};
use crate::workflow::{
    authorize, classify_edit, plan, prefix_rejection, rejection_reason, submission_effects,
    Action, DocumentStatus, EditKind, FieldEdits, Lineage, Outcome, SideEffect, TrackedFields,
    WorkflowError,
};

const MAX_NAME_LEN: usize = 255;
const MAX_FIELD_LEN: usize = 255;

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub status: Option<String>,
    pub code: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub code: String,
    pub version: i32,
    pub status: String,
    pub parent_document_id: Option<Uuid>,
    pub name: String,
    pub objective: Option<String>,
    pub scope: Option<String>,
    pub responsible: Option<String>,
    pub storage_location: Option<String>,
    pub retention_period: Option<String>,
    pub final_disposition: Option<String>,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_by: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub change_reason: Option<String>,
    pub change_date: Option<String>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            code: doc.code,
            version: doc.version,
            status: doc.status,
            parent_document_id: doc.parent_document_id,
            name: doc.name,
            objective: doc.objective,
            scope: doc.scope,
            responsible: doc.responsible,
            storage_location: doc.storage_location,
            retention_period: doc.retention_period,
            final_disposition: doc.final_disposition,
            file_name: doc.file_name,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            checksum: doc.checksum,
            created_by: doc.created_by,
            created_at: to_iso(doc.created_at),
            updated_at: to_iso(doc.updated_at),
            change_reason: doc.change_reason,
            change_date: doc.change_date.map(to_iso),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub action: Action,
    pub deleted: bool,
    pub document: Option<DocumentResponse>,
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

struct UploadedFile {
    file_name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct DocumentForm {
    code: Option<String>,
    name: Option<String>,
    fields: FieldEdits,
    change_reason: Option<String>,
    save_as_draft: bool,
    submit_for_review: bool,
    file: Option<UploadedFile>,
}

struct StoredFile {
    path: String,
    file_name: String,
    content_type: String,
    size_bytes: i64,
    checksum: String,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let mut query = documents::table.into_boxed();

    let status_filter = params
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match status_filter {
        Some(raw) => {
            let status = DocumentStatus::parse(raw)
                .ok_or_else(|| AppError::bad_request(format!("unknown document status '{raw}'")))?;
            query = query.filter(documents::status.eq(status.as_str()));
        }
        None if !params.include_archived => {
            query = query.filter(documents::status.ne(DocumentStatus::Archived.as_str()));
        }
        None => {}
    }

    if let Some(code) = params
        .code
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        query = query.filter(documents::code.eq(code.to_ascii_uppercase()));
    }

    let docs: Vec<Document> = query
        .order((documents::created_at.desc(), documents::version.desc()))
        .load(&mut conn)?;

    Ok(Json(docs.into_iter().map(DocumentResponse::from).collect()))
}

/// Reviewer inbox.
pub async fn list_pending_documents(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let docs: Vec<Document> = documents::table
        .filter(documents::status.eq(DocumentStatus::PendingApproval.as_str()))
        .order(documents::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(docs.into_iter().map(DocumentResponse::from).collect()))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    Ok(Json(doc.into()))
}

/// The version chain behind a document, newest first.
pub async fn document_history(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(document_id);

    while let Some(id) = next {
        if !seen.insert(id) {
            warn!(document_id = %id, "document lineage loops back on itself");
            break;
        }
        let doc: Option<Document> = documents::table.find(id).first(&mut conn).optional()?;
        let Some(doc) = doc else {
            if chain.is_empty() {
                return Err(AppError::not_found());
            }
            break;
        };
        next = doc.parent_document_id;
        chain.push(DocumentResponse::from(doc));
    }

    Ok(Json(chain))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDownloadResponse>> {
    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    drop(conn);

    let ttl = state.config.signed_url_ttl_seconds;
    let url = state
        .storage
        .signed_url(&doc.file_path, Duration::from_secs(ttl))
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    Ok(Json(DocumentDownloadResponse {
        url,
        expires_in: ttl,
        file_name: doc.file_name,
        content_type: doc.content_type,
        size_bytes: doc.size_bytes,
    }))
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let form = read_document_form(multipart).await?;

    let code = normalize_code(&required("code", form.code.as_deref())?)?;
    let name = required("name", form.name.as_deref())?;
    max_len("name", &name, MAX_NAME_LEN)?;
    let fields = form.fields.into_fields();
    check_field_lengths(&fields)?;
    let file = form
        .file
        .ok_or(ValidationError::Required { field: "file" })?;
    let checked = check_upload(&file.file_name, file.bytes.len(), state.config.upload_max_bytes)?;
    let status = initial_status(form.save_as_draft, form.submit_for_review)?;
    let change_reason = form
        .change_reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());

    let mut conn = state.db()?;
    require_permission(&mut conn, &user, DOCUMENTS_CREATE)?;
    let taken: bool = select(exists(documents::table.filter(documents::code.eq(&code))))
        .get_result(&mut conn)?;
    if taken {
        return Err(AppError::conflict(format!(
            "a document with code {code} already exists"
        )));
    }
    drop(conn);

    let now = Utc::now().naive_utc();
    let stored = store_file(&state, &code, 1, now, checked, file.bytes).await?;

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        code,
        version: 1,
        status: status.as_str().to_string(),
        parent_document_id: None,
        name,
        objective: fields.objective,
        scope: fields.scope,
        responsible: fields.responsible,
        storage_location: fields.storage_location,
        retention_period: fields.retention_period,
        final_disposition: fields.final_disposition,
        file_path: stored.path.clone(),
        file_name: stored.file_name,
        content_type: Some(stored.content_type),
        size_bytes: stored.size_bytes,
        checksum: stored.checksum,
        created_by: user.user_id,
        change_reason,
        change_date: (status == DocumentStatus::Published).then_some(now),
    };

    let mut conn = state.db()?;
    let document: Document = match diesel::insert_into(documents::table)
        .values(&new_document)
        .get_result(&mut conn)
    {
        Ok(document) => document,
        Err(err) => {
            drop(conn);
            discard_blob(&state, &stored.path).await;
            return Err(err.into());
        }
    };

    info!(
        document_id = %document.id,
        code = %document.code,
        status = %document.status,
        "document created"
    );

    if status == DocumentStatus::PendingApproval {
        let target = EffectTarget::live(&document, &user);
        run_best_effort_effects(&state, &mut conn, submission_effects().iter().copied(), &target);
    }

    Ok((StatusCode::CREATED, Json(document.into())))
}

/// Applies an edit. Depending on what changed this is a no-op, an in-place
/// metadata update, a new pending revision or a draft resubmission.
pub async fn edit_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let form = read_document_form(multipart).await?;
    if form.name.is_some() {
        debug!(document_id = %document_id, "ignoring name on edit");
    }
    let upload = match form.file {
        Some(file) => {
            let checked =
                check_upload(&file.file_name, file.bytes.len(), state.config.upload_max_bytes)?;
            Some((checked, file.bytes))
        }
        None => None,
    };

    let mut conn = state.db()?;
    require_permission(&mut conn, &user, DOCUMENTS_EDIT)?;
    let current: Document = documents::table.find(document_id).first(&mut conn)?;
    let status = status_of(&current)?;
    if !status.is_editable() {
        return Err(AppError::conflict(format!(
            "a document in status {status} cannot be edited"
        )));
    }

    let current_fields = TrackedFields::from_document(&current);
    let edited = form.fields.apply(&current_fields);
    check_field_lengths(&edited)?;

    match (classify_edit(&current_fields, &edited, upload.is_some()), upload) {
        (EditKind::Unchanged, _) => {
            debug!(document_id = %document_id, "edit carried no changes");
            Ok((StatusCode::OK, Json(current.into())))
        }
        (EditKind::DirectUpdate { changed }, _) => {
            let updated: Document = diesel::update(
                documents::table
                    .find(document_id)
                    .filter(documents::status.eq(status.as_str())),
            )
            .set(&metadata_changes(edited, Utc::now().naive_utc()))
            .get_result(&mut conn)
            .optional()?
            .ok_or(WorkflowError::StaleStatus { expected: status })?;

            info!(document_id = %document_id, fields = ?changed, "document metadata updated");
            Ok((StatusCode::OK, Json(updated.into())))
        }
        (EditKind::RequiresReview, Some((checked, bytes))) => match status {
            DocumentStatus::Published => {
                let reason = required("change_reason", form.change_reason.as_deref())?;
                drop(conn);
                let revision =
                    file_revision(&state, &user, current, edited, reason, checked, bytes).await?;
                Ok((StatusCode::CREATED, Json(revision.into())))
            }
            _ => {
                drop(conn);
                let resubmitted = replace_draft_file(
                    &state,
                    &user,
                    current,
                    edited,
                    form.change_reason,
                    checked,
                    bytes,
                )
                .await?;
                Ok((StatusCode::OK, Json(resubmitted.into())))
            }
        },
        (EditKind::RequiresReview, None) => {
            Err(AppError::internal("edit classified for review without a file"))
        }
    }
}

/// Files version `n + 1` of a published document for review. The published
/// row stays untouched until the revision is approved.
async fn file_revision(
    state: &AppState,
    user: &AuthenticatedUser,
    current: Document,
    fields: TrackedFields,
    reason: String,
    checked: CheckedUpload,
    bytes: Vec<u8>,
) -> AppResult<Document> {
    {
        let mut conn = state.db()?;
        let pending: bool = select(exists(
            documents::table
                .filter(documents::parent_document_id.eq(current.id))
                .filter(documents::status.eq(DocumentStatus::PendingApproval.as_str())),
        ))
        .get_result(&mut conn)?;
        if pending {
            return Err(AppError::conflict(format!(
                "a revision of {} is already pending approval",
                current.code
            )));
        }
    }

    let now = Utc::now().naive_utc();
    let version = current.version + 1;
    let stored = store_file(state, &current.code, version, now, checked, bytes).await?;

    let revision = NewDocument {
        id: Uuid::new_v4(),
        code: current.code.clone(),
        version,
        status: DocumentStatus::PendingApproval.as_str().to_string(),
        parent_document_id: Some(current.id),
        name: current.name.clone(),
        objective: fields.objective,
        scope: fields.scope,
        responsible: fields.responsible,
        storage_location: fields.storage_location,
        retention_period: fields.retention_period,
        final_disposition: fields.final_disposition,
        file_path: stored.path.clone(),
        file_name: stored.file_name,
        content_type: Some(stored.content_type),
        size_bytes: stored.size_bytes,
        checksum: stored.checksum,
        created_by: user.user_id,
        change_reason: Some(reason),
        change_date: Some(now),
    };

    let mut conn = state.db()?;
    let document: Document = match diesel::insert_into(documents::table)
        .values(&revision)
        .get_result(&mut conn)
    {
        Ok(document) => document,
        Err(err) => {
            drop(conn);
            discard_blob(state, &stored.path).await;
            return Err(err.into());
        }
    };

    info!(
        document_id = %document.id,
        parent_document_id = %current.id,
        code = %document.code,
        version = document.version,
        "revision submitted for approval"
    );

    let target = EffectTarget::live(&document, user);
    run_best_effort_effects(state, &mut conn, submission_effects().iter().copied(), &target);

    Ok(document)
}

/// A draft gets its file replaced in place and goes to review.
async fn replace_draft_file(
    state: &AppState,
    user: &AuthenticatedUser,
    current: Document,
    fields: TrackedFields,
    change_reason: Option<String>,
    checked: CheckedUpload,
    bytes: Vec<u8>,
) -> AppResult<Document> {
    let transition = plan(
        DocumentStatus::Draft,
        Action::Submit,
        Lineage::of(current.parent_document_id),
    )?;
    let now = Utc::now().naive_utc();
    let stored = store_file(state, &current.code, current.version, now, checked, bytes).await?;

    let file_change = DocumentFileChange {
        file_path: stored.path.clone(),
        file_name: stored.file_name,
        content_type: Some(stored.content_type),
        size_bytes: stored.size_bytes,
        checksum: stored.checksum,
        status: DocumentStatus::PendingApproval.as_str().to_string(),
        change_reason: change_reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty()),
    };

    let mut conn = state.db()?;
    let updated: Option<Document> = diesel::update(
        documents::table
            .find(current.id)
            .filter(documents::status.eq(DocumentStatus::Draft.as_str())),
    )
    .set((&metadata_changes(fields, now), &file_change))
    .get_result(&mut conn)
    .optional()?;

    let Some(document) = updated else {
        drop(conn);
        discard_blob(state, &stored.path).await;
        return Err(WorkflowError::StaleStatus {
            expected: DocumentStatus::Draft,
        }
        .into());
    };

    info!(
        document_id = %document.id,
        code = %document.code,
        "draft file replaced and submitted for approval"
    );

    let target = EffectTarget::live(&document, user);
    run_best_effort_effects(state, &mut conn, transition.best_effort_effects(), &target);
    drop(conn);

    if current.file_path != document.file_path {
        discard_blob(state, &current.file_path).await;
    }
    Ok(document)
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    require_permission(&mut conn, &user, DOCUMENTS_DELETE)?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;
    let status = status_of(&doc)?;
    if status != DocumentStatus::Draft {
        return Err(AppError::conflict(format!(
            "only draft documents can be deleted; this one is {status}"
        )));
    }

    let deleted = diesel::delete(
        documents::table
            .find(document_id)
            .filter(documents::status.eq(DocumentStatus::Draft.as_str())),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(WorkflowError::StaleStatus {
            expected: DocumentStatus::Draft,
        }
        .into());
    }
    drop(conn);

    info!(document_id = %document_id, code = %doc.code, "draft deleted");
    discard_blob(&state, &doc.file_path).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TransitionResponse>> {
    apply_transition(&state, &user, document_id, Action::Submit, None)
        .await
        .map(Json)
}

pub async fn approve_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TransitionResponse>> {
    apply_transition(&state, &user, document_id, Action::Approve, None)
        .await
        .map(Json)
}

pub async fn reject_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    payload: Option<Json<RejectRequest>>,
) -> AppResult<Json<TransitionResponse>> {
    let reason = payload.and_then(|Json(payload)| payload.reason);
    apply_transition(&state, &user, document_id, Action::Reject, reason)
        .await
        .map(Json)
}

enum Applied {
    Updated(Document),
    Deleted(Document),
}

/// Runs one row of the transition table: primary writes in a transaction
/// guarded by the expected status, best-effort effects after commit.
async fn apply_transition(
    state: &AppState,
    user: &AuthenticatedUser,
    document_id: Uuid,
    action: Action,
    reason: Option<String>,
) -> AppResult<TransitionResponse> {
    authorize(action, user.role()?)?;
    let reason = match action {
        Action::Reject => Some(rejection_reason(reason.as_deref())?),
        _ => None,
    };

    let mut conn = state.db()?;
    let document: Document = documents::table.find(document_id).first(&mut conn)?;
    let from = status_of(&document)?;
    let transition = plan(from, action, Lineage::of(document.parent_document_id))?;
    if action == Action::Submit && document.created_by != user.user_id {
        require_permission(&mut conn, user, DOCUMENTS_EDIT)?;
    }

    let now = Utc::now().naive_utc();
    let applied = conn.transaction::<_, AppError, _>(|conn| {
        let mut change_date = None;
        let mut change_reason = None;

        for effect in transition.primary_effects() {
            match effect {
                SideEffect::ArchiveParent => {
                    if let Some(parent_id) = document.parent_document_id {
                        let archived = diesel::update(
                            documents::table
                                .find(parent_id)
                                .filter(documents::status.eq(DocumentStatus::Published.as_str())),
                        )
                        .set((
                            documents::status.eq(DocumentStatus::Archived.as_str()),
                            documents::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                        if archived == 0 {
                            warn!(
                                document_id = %document.id,
                                parent_document_id = %parent_id,
                                "parent was not published when its revision was approved"
                            );
                        }
                    }
                }
                SideEffect::StampChangeDate => change_date = Some(now),
                SideEffect::PrefixChangeReason => {
                    let reason = reason.as_deref().unwrap_or_default();
                    change_reason = Some(prefix_rejection(
                        reason,
                        document.change_reason.as_deref(),
                    ));
                }
                _ => {}
            }
        }

        let guarded = documents::table
            .find(document.id)
            .filter(documents::status.eq(from.as_str()));

        match transition.outcome {
            Outcome::Status(next) => {
                let updated: Option<Document> = diesel::update(guarded)
                    .set(&DocumentStatusChange {
                        status: next.as_str().to_string(),
                        updated_at: now,
                        change_date,
                        change_reason,
                    })
                    .get_result(conn)
                    .optional()?;
                updated
                    .map(Applied::Updated)
                    .ok_or_else(|| WorkflowError::StaleStatus { expected: from }.into())
            }
            Outcome::Delete => {
                let deleted = diesel::delete(guarded).execute(conn)?;
                if deleted == 0 {
                    return Err(WorkflowError::StaleStatus { expected: from }.into());
                }
                Ok(Applied::Deleted(document.clone()))
            }
        }
    })?;

    let (subject, deleted) = match &applied {
        Applied::Updated(doc) => (doc, false),
        Applied::Deleted(doc) => (doc, true),
    };
    info!(
        document_id = %subject.id,
        code = %subject.code,
        version = subject.version,
        action = %action,
        from = %from,
        deleted,
        actor = %user.user_id,
        "document transition applied"
    );

    let target = EffectTarget {
        document: subject,
        link_document_id: if deleted {
            subject.parent_document_id
        } else {
            Some(subject.id)
        },
        reason: reason.as_deref(),
        actor: user,
    };
    run_best_effort_effects(state, &mut conn, transition.best_effort_effects(), &target);
    drop(conn);

    match applied {
        Applied::Updated(doc) => Ok(TransitionResponse {
            action,
            deleted: false,
            document: Some(doc.into()),
        }),
        Applied::Deleted(doc) => {
            discard_blob(state, &doc.file_path).await;
            Ok(TransitionResponse {
                action,
                deleted: true,
                document: None,
            })
        }
    }
}

/// What the notification and email effects talk about.
struct EffectTarget<'a> {
    document: &'a Document,
    /// Row that links in the feed and emails; the parent when the document
    /// itself was deleted.
    link_document_id: Option<Uuid>,
    reason: Option<&'a str>,
    actor: &'a AuthenticatedUser,
}

impl<'a> EffectTarget<'a> {
    fn live(document: &'a Document, actor: &'a AuthenticatedUser) -> Self {
        Self {
            document,
            link_document_id: Some(document.id),
            reason: None,
            actor,
        }
    }
}

/// Notifications and emails after the primary write has committed.
/// Nothing here can fail the request.
fn run_best_effort_effects(
    state: &AppState,
    conn: &mut PgConnection,
    effects: impl Iterator<Item = SideEffect>,
    target: &EffectTarget<'_>,
) {
    let document = target.document;
    let mut reviewers: Option<Vec<(Uuid, String)>> = None;

    for effect in effects {
        match effect {
            SideEffect::NotifyReviewers | SideEffect::EmailReviewers => {
                if reviewers.is_none() {
                    reviewers = match reviewer_audience(conn) {
                        Ok(found) => Some(found),
                        Err(err) => {
                            warn!(document_id = %document.id, error = %err, "failed to load reviewers");
                            Some(Vec::new())
                        }
                    };
                }
                let audience = reviewers.as_deref().unwrap_or_default();
                if effect == SideEffect::NotifyReviewers {
                    let ids: Vec<Uuid> = audience.iter().map(|(id, _)| *id).collect();
                    notify(state, conn, &ids, NotificationKind::PendingApproval, target);
                } else {
                    let emails = audience.iter().map(|(_, email)| email.clone()).collect();
                    email(state, conn, emails, EmailKind::DocumentPending, target);
                }
            }
            SideEffect::NotifyCreator(kind) => {
                notify(state, conn, &[document.created_by], kind, target);
            }
            SideEffect::EmailCreator(kind) => match active_user_email(conn, document.created_by) {
                Ok(Some(address)) => email(state, conn, vec![address], kind, target),
                Ok(None) => debug!(
                    document_id = %document.id,
                    "creator is inactive; skipping email"
                ),
                Err(err) => warn!(
                    document_id = %document.id,
                    error = %err,
                    "failed to resolve creator email"
                ),
            },
            SideEffect::ArchiveParent
            | SideEffect::StampChangeDate
            | SideEffect::PrefixChangeReason => {}
        }
    }
}

fn notify(
    state: &AppState,
    conn: &mut PgConnection,
    recipients: &[Uuid],
    kind: NotificationKind,
    target: &EffectTarget<'_>,
) {
    let (title, message) = feed_text(kind, target.document, target.reason);
    notify_users(
        conn,
        &state.hub,
        recipients,
        NewFeedEntry {
            kind,
            title: &title,
            message: &message,
            document_id: target.link_document_id,
        },
    );
}

fn email(
    state: &AppState,
    conn: &mut PgConnection,
    recipients: Vec<String>,
    kind: EmailKind,
    target: &EffectTarget<'_>,
) {
    let document = target.document;
    let link = target
        .link_document_id
        .map(|id| state.config.document_link(id));
    let payload = json!({
        "document_id": document.id,
        "code": document.code,
        "name": document.name,
        "version": document.version,
        "reason": target.reason,
        "actor": target.actor.email,
        "link": link,
    });
    dispatch_email(conn, EmailMessage::new(kind, recipients, payload));
}

fn feed_text(kind: NotificationKind, document: &Document, reason: Option<&str>) -> (String, String) {
    let label = format!("{} v{} - {}", document.code, document.version, document.name);
    match kind {
        NotificationKind::PendingApproval => (
            "Documento pendiente de aprobación".to_string(),
            format!("{label} requiere revisión"),
        ),
        NotificationKind::Approved => (
            "Documento aprobado".to_string(),
            format!("{label} fue aprobado y publicado"),
        ),
        NotificationKind::Rejected => (
            "Documento rechazado".to_string(),
            match reason {
                Some(reason) => format!("{label} fue rechazado: {reason}"),
                None => format!("{label} fue rechazado"),
            },
        ),
        NotificationKind::ImprovementFollowUp => (
            "Seguimiento requerido".to_string(),
            format!("{label} requiere seguimiento"),
        ),
    }
}

fn status_of(document: &Document) -> AppResult<DocumentStatus> {
    DocumentStatus::parse(&document.status).ok_or_else(|| {
        AppError::internal(format!(
            "document {} has unknown status {}",
            document.id, document.status
        ))
    })
}

fn initial_status(save_as_draft: bool, submit_for_review: bool) -> AppResult<DocumentStatus> {
    match (save_as_draft, submit_for_review) {
        (true, true) => Err(AppError::bad_request(
            "save_as_draft and submit_for_review are mutually exclusive",
        )),
        (true, false) => Ok(DocumentStatus::Draft),
        (false, true) => Ok(DocumentStatus::PendingApproval),
        (false, false) => Ok(DocumentStatus::Published),
    }
}

fn check_field_lengths(fields: &TrackedFields) -> AppResult<()> {
    let bounded = [
        ("responsible", &fields.responsible, MAX_FIELD_LEN),
        ("storage_location", &fields.storage_location, MAX_FIELD_LEN),
        ("retention_period", &fields.retention_period, 100),
        ("final_disposition", &fields.final_disposition, 100),
    ];
    for (field, value, max) in bounded {
        if let Some(value) = value {
            max_len(field, value, max)?;
        }
    }
    Ok(())
}

fn metadata_changes(fields: TrackedFields, now: NaiveDateTime) -> DocumentMetadataChanges {
    DocumentMetadataChanges {
        objective: fields.objective,
        scope: fields.scope,
        responsible: fields.responsible,
        storage_location: fields.storage_location,
        retention_period: fields.retention_period,
        final_disposition: fields.final_disposition,
        updated_at: now,
    }
}

async fn store_file(
    state: &AppState,
    code: &str,
    version: i32,
    uploaded_at: NaiveDateTime,
    checked: CheckedUpload,
    bytes: Vec<u8>,
) -> AppResult<StoredFile> {
    let checksum = hex::encode(Sha256::digest(&bytes));
    let size_bytes = bytes.len() as i64;
    let path = document_blob_path(code, version, uploaded_at, &checked.file_name);

    state
        .storage
        .upload(
            &path,
            bytes,
            Some(checked.content_type.clone()),
            attachment_disposition(&checked.file_name),
        )
        .await
        .map_err(|err| {
            error!(error = %err, path = %path, "failed to store document file");
            AppError::internal(format!("failed to store document file: {err}"))
        })?;

    debug!(path = %path, size_bytes, "document file stored");
    Ok(StoredFile {
        path,
        file_name: checked.file_name,
        content_type: checked.content_type,
        size_bytes,
        checksum,
    })
}

async fn discard_blob(state: &AppState, path: &str) {
    if let Err(err) = state.storage.delete(path).await {
        warn!(path = %path, error = %err, "failed to delete stored file");
    }
}

async fn read_document_form(mut multipart: Multipart) -> AppResult<DocumentForm> {
    let mut form = DocumentForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                // Browsers send an empty part for an untouched file input.
                if !(file_name.is_empty() && data.is_empty()) {
                    form.file = Some(UploadedFile {
                        file_name,
                        bytes: data.to_vec(),
                    });
                }
            }
            "code" => form.code = Some(field_text(field).await?),
            "name" => form.name = Some(field_text(field).await?),
            "objective" => form.fields.objective = Some(field_text(field).await?),
            "scope" => form.fields.scope = Some(field_text(field).await?),
            "responsible" => form.fields.responsible = Some(field_text(field).await?),
            "storage_location" => form.fields.storage_location = Some(field_text(field).await?),
            "retention_period" => form.fields.retention_period = Some(field_text(field).await?),
            "final_disposition" => form.fields.final_disposition = Some(field_text(field).await?),
            "change_reason" => form.change_reason = Some(field_text(field).await?),
            "save_as_draft" => form.save_as_draft = parse_flag(&field_text(field).await?),
            "submit_for_review" => form.submit_for_review = parse_flag(&field_text(field).await?),
            other => debug!(field = %other, "ignoring unknown form field"),
        }
    }

    Ok(form)
}

async fn field_text(field: Field<'_>) -> AppResult<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid {name}: {err}")))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}
