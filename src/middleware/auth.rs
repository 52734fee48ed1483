use crate::error::{FrameworkError, FrameworkResult};
use crate::http::{Request, Response};
use crate::middleware::rate_limit::unix_now;
use crate::middleware::{Middleware, MiddlewareResult, Next};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub iat: u64,
    pub exp: u64,
}

/// The identity attached to a request under the `auth_user` data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: u64,
    pub email: String,
    pub name: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        AuthUser {
            id: claims.user_id,
            email: claims.email,
            name: claims.name,
        }
    }
}

/// Issues and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn issue(&self, user: &AuthUser) -> FrameworkResult<String> {
        let now = unix_now();
        self.sign(&Claims {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        })
    }

    pub fn sign(&self, claims: &Claims) -> FrameworkResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| FrameworkError::internal(format!("failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> FrameworkResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => FrameworkError::Unauthorized("Token has expired".into()),
                _ => FrameworkError::Unauthorized("Invalid or expired token".into()),
            })
    }
}

/// Requires `Authorization: Bearer <token>`. On success the verified user
/// is stored in request data as `auth_user`.
#[derive(Clone)]
pub struct AuthMiddleware {
    tokens: Arc<TokenService>,
}

impl AuthMiddleware {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }

    fn authenticate(&self, req: &Request) -> FrameworkResult<AuthUser> {
        let header = req
            .header("authorization")
            .ok_or_else(|| FrameworkError::Unauthorized("Authorization header missing".into()))?;

        let token = header
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FrameworkError::Unauthorized("Invalid authorization header format".into()))?;

        self.tokens.verify(token).map(AuthUser::from)
    }
}

impl Middleware for AuthMiddleware {
    fn handle(&self, mut req: Request, next: Next) -> MiddlewareResult {
        let auth = self.clone();
        Box::pin(async move {
            match auth.authenticate(&req) {
                Ok(user) => {
                    tracing::debug!(user_id = user.id, "request authenticated");
                    req.set_data("auth_user", user);
                    next.handle(req).await
                }
                Err(err) => {
                    tracing::debug!(path = req.path(), error = %err, "authentication failed");
                    let mut response = Response::error(&err.to_string(), 401);
                    response.header("WWW-Authenticate", "Bearer");
                    Ok(response)
                }
            }
        })
    }
}
