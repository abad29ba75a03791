use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_permissions)]
pub struct NewUserPermission {
    pub user_id: Uuid,
    pub permission_code: String,
    pub granted_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(User, foreign_key = created_by))]
pub struct Document {
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
    pub file_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub change_reason: Option<String>,
    pub change_date: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
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
    pub file_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_by: Uuid,
    pub change_reason: Option<String>,
    pub change_date: Option<NaiveDateTime>,
}

/// Tracked metadata written as a whole; `None` clears the column.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = documents, treat_none_as_null = true)]
pub struct DocumentMetadataChanges {
    pub objective: Option<String>,
    pub scope: Option<String>,
    pub responsible: Option<String>,
    pub storage_location: Option<String>,
    pub retention_period: Option<String>,
    pub final_disposition: Option<String>,
    pub updated_at: NaiveDateTime,
}

/// Status move; `None` leaves the audit columns untouched.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = documents)]
pub struct DocumentStatusChange {
    pub status: String,
    pub updated_at: NaiveDateTime,
    pub change_date: Option<NaiveDateTime>,
    pub change_reason: Option<String>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = documents)]
pub struct DocumentFileChange {
    pub file_path: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
    pub change_reason: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub document_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub document_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = improvement_actions)]
pub struct ImprovementAction {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: String,
    pub origin: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub closure_approved: Option<String>,
    pub closure_notes: Option<String>,
    pub follow_up_notes: Option<String>,
    pub is_archived: bool,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub closed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = improvement_actions)]
pub struct NewImprovementAction {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub description: String,
    pub origin: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub created_by: Uuid,
}

/// Partial edit; `None` leaves the column as it is.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = improvement_actions)]
pub struct ImprovementActionChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub origin: Option<String>,
    pub responsible_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
