use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::comment::UserRole;
use crate::services::comment_service::Viewer;
use crate::AppState;

/// Access token claims issued by the platform's auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub role: Option<String>,
    #[serde(rename = "type", default)]
    pub token_type: Option<String>, // "access" or "refresh"
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    pub fn viewer(&self) -> Viewer {
        Viewer {
            id: self.id,
            role: self.role,
        }
    }
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

fn extract_bearer(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

fn user_from_claims(claims: Claims) -> AppResult<AuthUser> {
    if claims.token_type.as_deref() == Some("refresh") {
        return Err(AppError::Unauthorized("Access token required".into()));
    }
    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;
    Ok(AuthUser {
        id,
        role: UserRole::parse(claims.role.as_deref()),
    })
}

/// Middleware: requires a valid access token. Sets AuthUser in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.extensions().get::<AuthUser>().is_none() {
        let token = extract_bearer(&req)
            .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;
        let claims = verify_token(&token, &state.config.jwt.secret)?;
        let user = user_from_claims(claims)?;
        req.extensions_mut().insert(user);
    }
    Ok(next.run(req).await)
}

/// Middleware: sets AuthUser when a valid token is present, never rejects.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = extract_bearer(&req) {
        match verify_token(&token, &state.config.jwt.secret).and_then(user_from_claims) {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(e) => tracing::debug!("ignoring bearer token: {e}"),
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(sub: &str, role: Option<&str>, token_type: Option<&str>) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            role: role.map(String::from),
            token_type: token_type.map(String::from),
            exp: now + 600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    #[test]
    fn access_tokens_resolve_to_users() {
        let id = Uuid::new_v4();
        let claims = verify_token(&token(&id.to_string(), Some("admin"), None), "secret").unwrap();
        let user = user_from_claims(claims).unwrap();
        assert_eq!(user.id, id);
        assert!(user.role.is_admin());
    }

    #[test]
    fn refresh_tokens_and_bad_signatures_are_rejected() {
        let id = Uuid::new_v4().to_string();
        let refresh = verify_token(&token(&id, None, Some("refresh")), "secret").unwrap();
        assert!(matches!(
            user_from_claims(refresh),
            Err(AppError::Unauthorized(_))
        ));
        assert!(verify_token(&token(&id, None, None), "other").is_err());
    }
}
