pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    permissions::Role,
    schema::users,
    state::AppState,
};

/// The caller's session, resolved from the bearer token on every request.
///
/// Role and active flag are read from `users`, so deactivation and role
/// changes apply before the token expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub email: String,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn role(&self) -> AppResult<Role> {
        Role::parse(&self.role).ok_or_else(AppError::unauthorized)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let (is_active, role): (bool, String) = users::table
            .find(claims.sub)
            .select((users::is_active, users::role))
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;
        if !is_active {
            return Err(AppError::forbidden("account is deactivated"));
        }

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
            role,
        })
    }
}
