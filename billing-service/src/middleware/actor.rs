//! Acting-user context.
//!
//! The gateway authenticates the caller and forwards who they are, which
//! role they hold and which branch they are working in as headers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use salon_core::error::AppError;

use crate::models::Role;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";
pub const BRANCH_ID_HEADER: &str = "X-Branch-ID";

#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: String,
    pub role: Role,
    pub branch_id: String,
}

impl ActorContext {
    pub fn new(user_id: impl Into<String>, role: Role, branch_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            branch_id: branch_id.into(),
        }
    }
}

fn required_header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = required_header(parts, USER_ID_HEADER)?;
        let role = required_header(parts, USER_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|e| AppError::AuthError(anyhow::anyhow!(e)))?;
        let branch_id = required_header(parts, BRANCH_ID_HEADER)?;

        let span = tracing::Span::current();
        span.record("user_id", user_id);
        span.record("branch_id", branch_id);

        Ok(ActorContext::new(user_id, role, branch_id))
    }
}
