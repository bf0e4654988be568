pub mod address;
pub mod entity;
pub mod request;
pub mod response;

pub use address::TcpAddress;
pub use entity::{ByteSource, CachedEntity, FixedLengthEntity, Frame, HttpEntity, InboundEntity};
pub use request::{HttpRequest, HttpRequestBuilder, RequestTarget};
pub use response::{HttpResponse, HttpResponseBuilder, Status};
