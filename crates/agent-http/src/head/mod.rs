//! Head parsing and serialization. §1 treats "HTTP head parsing and header
//! data structures" as an external collaborator consumed through a streaming
//! `feed(bytes) -> Incomplete | Done(message) | Error` contract — this module
//! is that collaborator's concrete implementation, built on `httparse` (the
//! crate is already part of the workspace's dependency set).

pub mod chunked;
pub mod etag;
pub mod parser;
pub mod serialize;

pub use chunked::{CHUNK_TERMINATOR, ChunkedDecoder, ChunkedEvent, encode_chunk};
pub use parser::{ParseOutcome, ParsedRequestHead, ParsedResponseHead, RequestHeadParser, ResponseHeadParser};
pub use serialize::{serialize_request_head, serialize_response_head};
