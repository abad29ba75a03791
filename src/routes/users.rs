use std::collections::HashMap;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{auth::revoke_all_refresh_tokens, to_iso};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, NewUserPermission, User};
use crate::permissions::{is_valid_permission_code, require_admin, Role};
use crate::schema::{user_permissions, users};
use crate::state::AppState;
use crate::validation::{max_len, required, ValidationError};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct GrantPermissionRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub permissions: Vec<String>,
    pub created_at: String,
}

impl UserResponse {
    fn new(user: User, permissions: Vec<String>) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_active: user.is_active,
            permissions,
            created_at: to_iso(user.created_at),
        }
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    require_admin(&user)?;
    let mut conn = state.db()?;

    let records: Vec<User> = users::table.order(users::email.asc()).load(&mut conn)?;
    let grants: Vec<(Uuid, String)> = user_permissions::table
        .select((user_permissions::user_id, user_permissions::permission_code))
        .order(user_permissions::permission_code.asc())
        .load(&mut conn)?;

    let mut by_user: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (user_id, code) in grants {
        by_user.entry(user_id).or_default().push(code);
    }

    Ok(Json(
        records
            .into_iter()
            .map(|record| {
                let permissions = by_user.remove(&record.id).unwrap_or_default();
                UserResponse::new(record, permissions)
            })
            .collect(),
    ))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    require_admin(&user)?;

    let email = required("email", Some(&payload.email))?.to_lowercase();
    max_len("email", &email, 255)?;
    if !email.contains('@') {
        return Err(ValidationError::Invalid {
            field: "email",
            reason: "must be an email address".to_string(),
        }
        .into());
    }
    let full_name = required("full_name", Some(&payload.full_name))?;
    max_len("full_name", &full_name, 255)?;
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::Invalid {
            field: "password",
            reason: format!("must be at least {MIN_PASSWORD_LEN} characters"),
        }
        .into());
    }
    let role = Role::parse(&payload.role)
        .ok_or_else(|| AppError::bad_request(format!("unknown role '{}'", payload.role)))?;

    let password_hash = password::hash_password(&payload.password)?;
    let mut conn = state.db()?;
    let created: User = diesel::insert_into(users::table)
        .values(&NewUser {
            id: Uuid::new_v4(),
            email,
            full_name,
            password_hash,
            role: role.as_str().to_string(),
        })
        .get_result(&mut conn)?;

    info!(user_id = %created.id, role = %role, created_by = %user.user_id, "user created");
    Ok((StatusCode::CREATED, Json(UserResponse::new(created, Vec::new()))))
}

/// Blocks login and refresh and revokes every outstanding refresh token.
pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    require_admin(&user)?;
    if target_id == user.user_id {
        return Err(AppError::bad_request("administrators cannot deactivate themselves"));
    }

    let mut conn = state.db()?;
    let (updated, revoked) = conn.transaction::<_, AppError, _>(|conn| {
        let updated = set_active(conn, target_id, false)?;
        let revoked = revoke_all_refresh_tokens(conn, target_id)?;
        Ok((updated, revoked))
    })?;

    info!(user_id = %target_id, revoked, actor = %user.user_id, "user deactivated");
    let permissions = load_permissions(&mut conn, target_id)?;
    Ok(Json(UserResponse::new(updated, permissions)))
}

pub async fn reactivate_user(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    require_admin(&user)?;
    let mut conn = state.db()?;
    let updated = set_active(&mut conn, target_id, true)?;

    info!(user_id = %target_id, actor = %user.user_id, "user reactivated");
    let permissions = load_permissions(&mut conn, target_id)?;
    Ok(Json(UserResponse::new(updated, permissions)))
}

pub async fn grant_permission(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<GrantPermissionRequest>,
) -> AppResult<Json<UserResponse>> {
    require_admin(&user)?;
    let code = payload.code.trim().to_string();
    if !is_valid_permission_code(&code) {
        return Err(ValidationError::Invalid {
            field: "code",
            reason: "expected module:action".to_string(),
        }
        .into());
    }

    let mut conn = state.db()?;
    let target: User = users::table.find(target_id).first(&mut conn)?;
    diesel::insert_into(user_permissions::table)
        .values(&NewUserPermission {
            user_id: target_id,
            permission_code: code.clone(),
            granted_by: Some(user.user_id),
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)?;

    info!(user_id = %target_id, permission = %code, actor = %user.user_id, "permission granted");
    let permissions = load_permissions(&mut conn, target_id)?;
    Ok(Json(UserResponse::new(target, permissions)))
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    Path((target_id, code)): Path<(Uuid, String)>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    require_admin(&user)?;
    let mut conn = state.db()?;
    let removed = diesel::delete(
        user_permissions::table
            .filter(user_permissions::user_id.eq(target_id))
            .filter(user_permissions::permission_code.eq(&code)),
    )
    .execute(&mut conn)?;
    if removed == 0 {
        return Err(AppError::not_found());
    }

    info!(user_id = %target_id, permission = %code, actor = %user.user_id, "permission revoked");
    Ok(StatusCode::NO_CONTENT)
}

fn set_active(conn: &mut PgConnection, user_id: Uuid, active: bool) -> AppResult<User> {
    let updated = diesel::update(users::table.find(user_id))
        .set((
            users::is_active.eq(active),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(conn)?;
    Ok(updated)
}

fn load_permissions(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<String>> {
    let codes = user_permissions::table
        .filter(user_permissions::user_id.eq(user_id))
        .select(user_permissions::permission_code)
        .order(user_permissions::permission_code.asc())
        .load(conn)?;
    Ok(codes)
}
