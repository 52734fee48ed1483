use crate::container::Container;
use crate::error::{FrameworkError, FrameworkResult};
use crate::http::{Request, Response};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type HttpResponse = FrameworkResult<Response>;

/// What a handler produced. Plain data is wrapped in the success envelope.
#[derive(Debug)]
pub enum Reply {
    Response(Response),
    Data(Value),
    Empty,
}

impl Reply {
    pub fn into_response(self) -> Response {
        match self {
            Reply::Response(response) => response,
            Reply::Data(data) => Response::success_value(data, "Success"),
            Reply::Empty => Response::new(200),
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

impl From<&mut Response> for Reply {
    fn from(response: &mut Response) -> Self {
        Reply::Response(std::mem::take(response))
    }
}

impl From<Value> for Reply {
    fn from(data: Value) -> Self {
        Reply::Data(data)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

pub type HandlerResult = FrameworkResult<Reply>;
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;
type BoxedHandler = Arc<dyn Fn(Request, Response) -> HandlerFuture + Send + Sync>;

/// A type that can be built from the container to serve a request.
///
/// Controllers are constructed fresh for every dispatched request.
pub trait Controller: Send + Sized + 'static {
    fn resolve(container: &Container) -> FrameworkResult<Self>;
}

/// The conventional five actions of a REST resource.
pub trait ResourceController: Controller {
    fn index(self, req: Request, res: Response) -> HandlerFuture;
    fn store(self, req: Request, res: Response) -> HandlerFuture;
    fn show(self, req: Request, res: Response) -> HandlerFuture;
    fn update(self, req: Request, res: Response) -> HandlerFuture;
    fn destroy(self, req: Request, res: Response) -> HandlerFuture;
}

/// The terminal step of a route.
#[derive(Clone)]
pub enum Action {
    Function(BoxedHandler),
    Controller {
        controller: &'static str,
        method: &'static str,
        invoke: BoxedHandler,
    },
}

impl Action {
    /// Wraps an async function of the request and a fresh response.
    pub fn function<F, Fut, R>(handler: F) -> Action
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameworkResult<R>> + Send + 'static,
        R: Into<Reply>,
    {
        Action::Function(Arc::new(move |req: Request, res: Response| -> HandlerFuture {
            let fut = handler(req, res);
            Box::pin(async move { fut.await.map(Into::into) })
        }))
    }

    /// Binds a controller method. The controller is resolved from the
    /// request's container each time the action runs.
    pub fn controller<C, F, Fut, R>(method: &'static str, handler: F) -> Action
    where
        C: Controller,
        F: Fn(C, Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FrameworkResult<R>> + Send + 'static,
        R: Into<Reply>,
    {
        let controller = short_type_name::<C>();
        Action::Controller {
            controller,
            method,
            invoke: Arc::new(move |req: Request, res: Response| -> HandlerFuture {
                let instance = match C::resolve(req.container()) {
                    Ok(instance) => instance,
                    Err(err) => {
                        let err = FrameworkError::HandlerNotResolvable {
                            controller: controller.to_string(),
                            method: method.to_string(),
                            reason: err.to_string(),
                        };
                        return Box::pin(async move { Err(err) });
                    }
                };
                let fut = handler(instance, req, res);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }

    pub fn invoke(&self, req: Request, res: Response) -> HandlerFuture {
        match self {
            Action::Function(handler) => handler(req, res),
            Action::Controller { invoke, .. } => invoke(req, res),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Action::Function(_) => "closure".to_string(),
            Action::Controller {
                controller, method, ..
            } => format!("{controller}::{method}"),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
