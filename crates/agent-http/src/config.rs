//! The tunable constants named throughout §6, collected into one
//! `serde`-deserializable `Config` the way the teacher's own config layer
//! collects its knobs — `Duration` fields use `agent_core::duration::serde_dur`
//! so operators can write `"30s"` / `"2m"` style strings.

use std::time::Duration;

use agent_core::duration::serde_dur;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	/// Maximum length of a single header field (name or value) in a
	/// response/request head.
	pub max_head_field_len: usize,
	/// Maximum total length (status/request line + all headers) of a head.
	pub max_head_total_len: usize,
	/// Size of each chunk read off the transport.
	pub read_buffer_size: usize,
	/// Size of each chunk flushed to the transport per `write()` call.
	pub write_buffer_size: usize,
	/// The server response writer's outbound queue high-water mark (§4.7).
	pub outbound_high_mark: usize,
	/// How long an idle pooled connection is kept before eviction (§4.5).
	#[serde(with = "serde_dur")]
	pub keepalive_idle_timeout: Duration,
	/// Per-chunk write timeout enforced by the response writer.
	#[serde(with = "serde_dur")]
	pub write_timeout: Duration,
	/// Minimum sustained throughput (bytes/sec) the response writer enforces
	/// after the first 10 effective seconds of writing (§4.7).
	pub write_min_throughput: u64,
	/// Grace window used for a graceful `transport_close` (§4.6).
	#[serde(with = "serde_dur")]
	pub transport_close_grace: Duration,
	/// How long the outbound waits for a 100-continue-class response before
	/// sending the body anyway (§6: "implementation-defined, e.g. 1 second").
	#[serde(with = "serde_dur")]
	pub expect_continue_timeout: Duration,
	/// Maximum single chunk size accepted by the chunked-transfer decoder.
	pub max_chunk_size: usize,
	/// New-connection (dial + optional tunnel/TLS chain) total timeout.
	#[serde(with = "serde_dur")]
	pub new_connection_timeout: Duration,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			max_head_field_len: 8 * 1024,
			max_head_total_len: 64 * 1024,
			read_buffer_size: 16 * 1024,
			write_buffer_size: 16 * 1024,
			outbound_high_mark: 256 * 1024,
			keepalive_idle_timeout: Duration::from_secs(60),
			write_timeout: Duration::from_secs(30),
			write_min_throughput: 1024,
			transport_close_grace: Duration::from_secs(1),
			expect_continue_timeout: Duration::from_secs(1),
			max_chunk_size: 8 * 1024 * 1024,
			new_connection_timeout: Duration::from_secs(10),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deserializes_human_readable_durations() {
		let json = serde_json::json!({
			"keepaliveIdleTimeout": "45s",
			"writeTimeout": "10s",
			"writeMinThroughput": 2048,
			"transportCloseGrace": "2s",
			"expectContinueTimeout": "500ms",
			"newConnectionTimeout": "5s",
		});
		let cfg: Config = serde_json::from_value(json).unwrap();
		assert_eq!(cfg.keepalive_idle_timeout, Duration::from_secs(45));
		assert_eq!(cfg.write_min_throughput, 2048);
		assert_eq!(cfg.expect_continue_timeout, Duration::from_millis(500));
		// Fields absent from the JSON fall back to Default (serde(default)).
		assert_eq!(cfg.max_head_field_len, Config::default().max_head_field_len);
	}
}
