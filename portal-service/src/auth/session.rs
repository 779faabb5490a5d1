//! Signed session cookies.
//!
//! The cookie carries an HS256 JWT; nothing is kept server side, so logout
//! only clears the cookie.

use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::state::AppState;

pub const COOKIE_NAME: &str = "portal-session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id for users, normalized email for admins.
    pub sub: String,
    pub role: Role,
    pub name: String,
    /// Alert count at login time.
    #[serde(default)]
    pub alerts: usize,
    pub iat: i64,
    pub exp: i64,
}

pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure: bool,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration, secure: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            secure,
        }
    }

    pub fn issue(
        &self,
        sub: &str,
        role: Role,
        name: &str,
        alerts: usize,
    ) -> jsonwebtoken::errors::Result<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            role,
            name: name.to_string(),
            alerts,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> jsonwebtoken::errors::Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Returns the claims of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .ok()
    }

    pub fn from_headers(&self, headers: &HeaderMap) -> Option<Claims> {
        session_token(headers).and_then(|t| self.verify(t))
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.ttl.as_secs(),
            if self.secure { "; Secure" } else { "" }
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!(
            "{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            if self.secure { "; Secure" } else { "" }
        )
    }
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(COOKIE_NAME)?.strip_prefix('='))
        .find(|token| !token.is_empty())
}

fn require(parts: &Parts, state: &AppState, role: Role) -> Result<Claims, AppError> {
    match state.sessions.from_headers(&parts.headers) {
        Some(claims) if claims.role == role => Ok(claims),
        _ => Err(AppError::Unauthorized("Please log in to continue".to_string())),
    }
}

/// A logged-in household.
#[derive(Debug, Clone)]
pub struct UserSession(pub Claims);

impl UserSession {
    pub fn user_id(&self) -> &str {
        &self.0.sub
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for UserSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        require(parts, state, Role::User).map(UserSession)
    }
}

/// A logged-in administrator.
#[derive(Debug, Clone)]
pub struct AdminSession(pub Claims);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        require(parts, state, Role::Admin).map(AdminSession)
    }
}
