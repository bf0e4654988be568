//! The Server Response Writer (§4.7): the write-side counterpart to the
//! client's outbound/inbound pair, built on the same [`crate::transport::Transport`]
//! abstraction. Accepting inbound requests and routing them to a handler is
//! outside this crate's scope (§1); this module starts once a response is
//! ready to go out.

pub mod traffic_dump;
pub mod writer;

pub use traffic_dump::TrafficDump;
pub use writer::{ResponseWriter, WriteOutcome, WriterOptions};
