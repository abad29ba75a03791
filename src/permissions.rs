use std::collections::BTreeSet;
use std::fmt;

use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::schema::user_permissions;

pub const WILDCARD: &str = "*";

pub const DOCUMENTS_CREATE: &str = "gestion_documental:create";
pub const DOCUMENTS_EDIT: &str = "gestion_documental:edit";
pub const DOCUMENTS_DELETE: &str = "gestion_documental:delete";
pub const ACTIONS_CREATE: &str = "acciones_mejora:create";
pub const ACTIONS_EDIT: &str = "acciones_mejora:edit";
pub const ACTIONS_CLOSE: &str = "acciones_mejora:close";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Gerencia,
    Usuario,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Gerencia => "gerencia",
            Role::Usuario => "usuario",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "gerencia" => Some(Role::Gerencia),
            "usuario" => Some(Role::Usuario),
            _ => None,
        }
    }

    /// Roles allowed to approve or reject documents under review.
    pub fn is_reviewer(self) -> bool {
        matches!(self, Role::Admin | Role::Gerencia)
    }

    pub fn reviewer_roles() -> [&'static str; 2] {
        [Role::Admin.as_str(), Role::Gerencia.as_str()]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A permission code is `module:action`, both halves lowercase ascii words.
pub fn is_valid_permission_code(code: &str) -> bool {
    fn is_word(part: &str) -> bool {
        !part.is_empty()
            && part
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch == '_')
    }

    match code.split_once(':') {
        Some((module, action)) => is_word(module) && is_word(action),
        None => false,
    }
}

pub fn evaluate_permission<S: AsRef<str>>(role: Role, grants: &[S], code: &str) -> bool {
    if role == Role::Admin {
        return true;
    }
    grants.iter().any(|grant| grant.as_ref() == code)
}

#[derive(Debug, Clone)]
pub struct PermissionSet {
    role: Role,
    grants: BTreeSet<String>,
}

impl PermissionSet {
    pub fn new(role: Role, grants: impl IntoIterator<Item = String>) -> Self {
        Self {
            role,
            grants: grants.into_iter().collect(),
        }
    }

    pub fn load(conn: &mut PgConnection, user_id: Uuid, role: Role) -> AppResult<Self> {
        let grants: Vec<String> = user_permissions::table
            .filter(user_permissions::user_id.eq(user_id))
            .select(user_permissions::permission_code)
            .load(conn)?;
        Ok(Self::new(role, grants))
    }

    pub fn has_permission(&self, code: &str) -> bool {
        let grants: Vec<&str> = self.grants.iter().map(String::as_str).collect();
        evaluate_permission(self.role, &grants, code)
    }

    pub fn has_any_permission(&self, codes: &[&str]) -> bool {
        codes.iter().any(|code| self.has_permission(code))
    }

    /// Effective codes as shown to clients; admins get the wildcard only.
    pub fn effective(&self) -> Vec<String> {
        if self.role == Role::Admin {
            return vec![WILDCARD.to_string()];
        }
        self.grants.iter().cloned().collect()
    }
}

/// Loads the caller's permissions and fails with 403 unless `code` is held.
pub fn require_permission(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    code: &str,
) -> AppResult<()> {
    let role = user.role()?;
    if role == Role::Admin {
        return Ok(());
    }
    let permissions = PermissionSet::load(conn, user.user_id, role)?;
    if permissions.has_permission(code) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("missing permission {code}")))
    }
}

pub fn require_admin(user: &AuthenticatedUser) -> AppResult<()> {
    if user.role()? == Role::Admin {
        Ok(())
    } else {
        Err(AppError::forbidden("administrator role required"))
    }
}
