use crate::container::Container;
use crate::error::{FrameworkError, FrameworkResult};
use crate::handler::Controller;
use crate::http::{Request, Response};
use crate::middleware::{AuthUser, TokenService};
use crate::validation::validate;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

struct Account {
    id: u64,
    name: &'static str,
    email: &'static str,
    password_sha256: String,
}

impl Account {
    fn new(id: u64, name: &'static str, email: &'static str, password: &str) -> Self {
        Account {
            id,
            name,
            email,
            password_sha256: digest(password),
        }
    }

    fn user(&self) -> AuthUser {
        AuthUser {
            id: self.id,
            email: self.email.to_string(),
            name: self.name.to_string(),
        }
    }
}

fn digest(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Known accounts keyed by email.
pub struct Accounts {
    accounts: Vec<Account>,
}

impl Default for Accounts {
    fn default() -> Self {
        Accounts {
            accounts: vec![
                Account::new(1, "Admin User", "admin@example.com", "password123"),
                Account::new(2, "Regular User", "user@example.com", "userpass"),
            ],
        }
    }
}

impl Accounts {
    pub fn authenticate(&self, email: &str, password: &str) -> Option<AuthUser> {
        let hashed = digest(password);
        self.accounts
            .iter()
            .find(|account| account.email.eq_ignore_ascii_case(email))
            .filter(|account| account.password_sha256 == hashed)
            .map(Account::user)
    }
}

pub struct AuthController {
    accounts: Arc<Accounts>,
    tokens: Arc<TokenService>,
}

impl Controller for AuthController {
    fn resolve(container: &Container) -> FrameworkResult<Self> {
        Ok(AuthController {
            accounts: container.resolve::<Accounts>()?,
            tokens: container.resolve::<TokenService>()?,
        })
    }
}

impl AuthController {
    fn token_payload(&self, user: &AuthUser) -> FrameworkResult<Value> {
        Ok(json!({
            "token": self.tokens.issue(user)?,
            "token_type": "Bearer",
            "expires_in": self.tokens.ttl_secs(),
            "user": user,
        }))
    }

    /// `POST api/auth/login`
    pub async fn login(self, req: Request, _res: Response) -> FrameworkResult<Response> {
        let input = req.all();
        validate(&input, &[("email", "required|email"), ("password", "required|min:6")])?;

        let email = input.get("email").and_then(Value::as_str).unwrap_or_default();
        let password = input.get("password").and_then(Value::as_str).unwrap_or_default();
        let user = self
            .accounts
            .authenticate(email, password)
            .ok_or_else(|| FrameworkError::Unauthorized("Invalid credentials".into()))?;

        tracing::info!(user_id = user.id, "user logged in");
        Ok(Response::success_value(self.token_payload(&user)?, "Login successful"))
    }

    /// `GET api/auth/me`, behind the `auth` middleware.
    pub async fn me(self, req: Request, _res: Response) -> FrameworkResult<Response> {
        let user: AuthUser = req
            .get_typed_data("auth_user")
            .ok_or_else(|| FrameworkError::Unauthorized("Authentication required".into()))?;
        Response::success(&user, "User profile retrieved")
    }

    /// `POST api/auth/refresh`, behind the `auth` middleware.
    pub async fn refresh(self, req: Request, _res: Response) -> FrameworkResult<Response> {
        let user: AuthUser = req
            .get_typed_data("auth_user")
            .ok_or_else(|| FrameworkError::Unauthorized("Authentication required".into()))?;
        Ok(Response::success_value(self.token_payload(&user)?, "Token refreshed"))
    }
}
