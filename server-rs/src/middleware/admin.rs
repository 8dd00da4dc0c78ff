use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::AppError;
use crate::middleware::auth::AuthUser;

/// Middleware: admin role required. Runs before the handler touches any comment.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .copied()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    if !user.role.is_admin() {
        tracing::warn!(user_id = %user.id, "non-admin hit an admin route");
        return Err(AppError::Forbidden("Insufficient permission".into()));
    }
    Ok(next.run(req).await)
}
