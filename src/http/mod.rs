pub mod body;
pub(crate) mod request;
pub(crate) mod response;

pub use body::{ParamValue, UploadedFile};
pub use request::{Method, RawRequest, Request, RequestOptions};
pub use response::{status_reason, Cookie, Response};
