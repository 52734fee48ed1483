use crate::container::Container;
use crate::error::{FrameworkError, FrameworkResult};
use crate::handler::{Controller, HandlerFuture, ResourceController};
use crate::http::{Request, Response};
use crate::validation::validate;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

impl User {
    fn new(id: u64, name: &str, email: &str) -> Self {
        User {
            id,
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

/// A fixed set of users. Created users are echoed back, never stored.
#[derive(Debug)]
pub struct UserDirectory {
    users: Vec<User>,
    next_id: AtomicU64,
}

impl Default for UserDirectory {
    fn default() -> Self {
        UserDirectory {
            users: vec![
                User::new(1, "John Doe", "john@example.com"),
                User::new(2, "Jane Smith", "jane@example.com"),
                User::new(3, "Bob Johnson", "bob@example.com"),
            ],
            next_id: AtomicU64::new(100),
        }
    }
}

impl UserDirectory {
    pub fn all(&self) -> &[User] {
        &self.users
    }

    pub fn find(&self, id: u64) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn text_field<'a>(input: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn timestamp() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}

fn user_id(req: &Request) -> FrameworkResult<u64> {
    req.param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| FrameworkError::NotFound("User not found".into()))
}

/// RESTful endpoints over [`UserDirectory`].
pub struct UserController {
    users: Arc<UserDirectory>,
}

impl Controller for UserController {
    fn resolve(container: &Container) -> FrameworkResult<Self> {
        Ok(UserController {
            users: container.resolve::<UserDirectory>()?,
        })
    }
}

impl ResourceController for UserController {
    fn index(self, _req: Request, _res: Response) -> HandlerFuture {
        Box::pin(async move {
            let response = Response::success(&self.users.all(), "Users retrieved successfully")?;
            Ok(response.into())
        })
    }

    fn store(self, req: Request, _res: Response) -> HandlerFuture {
        Box::pin(async move {
            let input = req.all();
            validate(&input, &[("name", "required|min:2|max:50"), ("email", "required|email|max:100")])?;

            let created = json!({
                "id": self.users.next_id(),
                "name": text_field(&input, "name"),
                "email": text_field(&input, "email"),
                "created_at": timestamp(),
            });
            let mut response = Response::success_value(created, "User created successfully");
            response.status(201);
            Ok(response.into())
        })
    }

    fn show(self, req: Request, _res: Response) -> HandlerFuture {
        Box::pin(async move {
            let id = user_id(&req)?;
            match self.users.find(id) {
                Some(user) => Ok(Response::success(user, "User retrieved successfully")?.into()),
                None => Ok(Response::error("User not found", 404).into()),
            }
        })
    }

    fn update(self, req: Request, _res: Response) -> HandlerFuture {
        Box::pin(async move {
            let id = user_id(&req)?;
            let input = req.all();
            validate(&input, &[("name", "min:2|max:50"), ("email", "email|max:100")])?;

            let current = self.users.find(id);
            let updated = json!({
                "id": id,
                "name": text_field(&input, "name").or(current.map(|u| u.name.as_str())).unwrap_or("Updated Name"),
                "email": text_field(&input, "email").or(current.map(|u| u.email.as_str())).unwrap_or("updated@example.com"),
                "updated_at": timestamp(),
            });
            Ok(Response::success_value(updated, "User updated successfully").into())
        })
    }

    fn destroy(self, req: Request, _res: Response) -> HandlerFuture {
        Box::pin(async move {
            let id = user_id(&req)?;
            tracing::info!(user_id = id, "user deleted");
            Ok(Response::success_value(json!([]), "User deleted successfully").into())
        })
    }
}
