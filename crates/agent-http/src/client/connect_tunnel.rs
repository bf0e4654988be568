//! The CONNECT tunnel (§4.3): encode the target as a request line, handle
//! the handshake's head-only response, and retry at most once with computed
//! credentials on a 401/407 challenge.

use std::sync::Arc;

use crate::client::auth::{self, Challenge, Credentials, DigestCache};
use crate::error::{EngineError, Result};
use crate::head::parser::{ParseOutcome, ResponseHeadParser};
use crate::transport::Transport;
use crate::types::address::TcpAddress;

/// Supplies credentials for a tunnel address, if any are configured for it.
/// No credentials configured means the tunnel never attempts authentication
/// (§4.3: "gated by presence of a credentials supplier").
pub trait CredentialsSupplier: Send + Sync {
	fn credentials_for(&self, address: &TcpAddress) -> Option<Credentials>;
}

fn encode_target(host: &str, port: u16) -> String {
	if host.contains(':') {
		format!("[{host}]:{port}")
	} else {
		format!("{host}:{port}")
	}
}

fn build_request(dest: &str, auth_header: Option<(&'static str, &str)>) -> Vec<u8> {
	let mut out = format!("CONNECT {dest} HTTP/1.1\r\nHost: {dest}\r\n");
	if let Some((name, value)) = auth_header {
		out.push_str(&format!("{name}: {value}\r\n"));
	}
	out.push_str("\r\n");
	out.into_bytes()
}

/// Reads bytes until the response head parser reports `Done`, pushing back
/// anything read past the head boundary (a CONNECT response has no body —
/// the bytes after the blank line are the start of the tunneled stream).
async fn read_response_head(
	transport: &mut Transport,
	parser: &ResponseHeadParser,
) -> Result<crate::head::parser::ParsedResponseHead> {
	let mut buf: Vec<u8> = Vec::new();
	loop {
		match parser.feed(&buf)? {
			ParseOutcome::Done { value, consumed } => {
				if consumed < buf.len() {
					transport.unread(bytes::Bytes::copy_from_slice(&buf[consumed..]));
				}
				return Ok(value);
			},
			ParseOutcome::Incomplete => {},
		}
		match transport.read().await? {
			crate::transport::TransportFrame::Chunk(b) => buf.extend_from_slice(&b),
			crate::transport::TransportFrame::Stall => {
				transport.await_readable().await?;
			},
			crate::transport::TransportFrame::Fin | crate::transport::TransportFrame::TlsCloseNotify => {
				return Err(EngineError::truncated("connection closed before tunnel response head completed"));
			},
		}
	}
}

async fn send_and_read(
	transport: &mut Transport,
	dest: &str,
	auth_header: Option<(&'static str, &str)>,
	parser: &ResponseHeadParser,
) -> Result<crate::head::parser::ParsedResponseHead> {
	transport.queue_write(&build_request(dest, auth_header));
	while transport.write().await? > 0 {
		transport.await_writable().await?;
	}
	read_response_head(transport, parser).await
}

fn challenge_header_name(status: u16) -> &'static str {
	if status == 407 { "proxy-authenticate" } else { "www-authenticate" }
}

fn auth_header_name(status: u16) -> &'static str {
	if status == 407 { "Proxy-Authorization" } else { "Authorization" }
}

/// Performs the CONNECT handshake over `transport`, which must already be
/// connected to the tunnel endpoint. `tunnel_address` is used only as the
/// [`DigestCache`] key. Returns once a 2xx status line has been fully
/// consumed; the caller continues using `transport` for tunneled bytes.
pub async fn handshake(
	transport: &mut Transport,
	tunnel_address: &TcpAddress,
	target_host: &str,
	target_port: u16,
	credentials: Option<&(dyn CredentialsSupplier)>,
	digest_cache: &Arc<DigestCache>,
) -> Result<()> {
	let dest = encode_target(target_host, target_port);
	let parser = ResponseHeadParser::new(8 * 1024, 64 * 1024);
	let creds = credentials.and_then(|c| c.credentials_for(tunnel_address));

	// Pre-authenticate with a cached Digest challenge if we have one for this
	// address, so a second tunnel in the same session skips the 401/407
	// round trip.
	let preauth = creds
		.as_ref()
		.and_then(|creds| digest_cache.preauth(tunnel_address, creds, "CONNECT", &dest))
		.map(|v| ("Proxy-Authorization", v));

	let first_auth = preauth.as_ref().map(|(n, v)| (*n, v.as_str()));
	let head = send_and_read(transport, &dest, first_auth, &parser).await?;
	if head.status.code / 100 == 2 {
		return Ok(());
	}

	if !matches!(head.status.code, 401 | 407) {
		return Err(EngineError::tunnel(format!(
			"tunnel establishment failed: {} {}",
			head.status.code, head.status.phrase
		)));
	}

	let Some(creds) = creds else {
		return Err(EngineError::tunnel(format!(
			"tunnel requires authentication ({}) but no credentials are configured",
			head.status.code
		)));
	};

	let challenge_header = head
		.headers
		.get(challenge_header_name(head.status.code))
		.and_then(|v| v.to_str().ok())
		.ok_or_else(|| EngineError::auth("challenge response missing WWW-Authenticate/Proxy-Authenticate"))?;
	let challenge = auth::require_supported(auth::parse_challenge(challenge_header))?;

	let retry_value = match &challenge {
		Challenge::Basic { .. } => auth::basic_header_value(&creds),
		Challenge::Digest(d) => {
			let value = auth::digest_header_value(&creds, d, "CONNECT", &dest, 1);
			digest_cache.record(tunnel_address.clone(), d.clone());
			value
		},
	};

	let retry_head = send_and_read(
		transport,
		&dest,
		Some((auth_header_name(head.status.code), &retry_value)),
		&parser,
	)
	.await?;

	// §4.3: at-most-one retry is mandatory — a second challenge is an error.
	if retry_head.status.code / 100 == 2 {
		Ok(())
	} else if matches!(retry_head.status.code, 401 | 407) {
		Err(EngineError::auth(
			"tunnel issued a second authentication challenge after the retry; this is not supported",
		))
	} else {
		Err(EngineError::tunnel(format!(
			"tunnel establishment failed after auth retry: {} {}",
			retry_head.status.code, retry_head.status.phrase
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_ipv4_and_hostname_targets_plain() {
		assert_eq!(encode_target("example.com", 443), "example.com:443");
		assert_eq!(encode_target("10.0.0.1", 8080), "10.0.0.1:8080");
	}

	#[test]
	fn encodes_ipv6_targets_bracketed() {
		assert_eq!(encode_target("::1", 443), "[::1]:443");
	}

	#[test]
	fn challenge_header_names_follow_status() {
		assert_eq!(challenge_header_name(407), "proxy-authenticate");
		assert_eq!(challenge_header_name(401), "www-authenticate");
		assert_eq!(auth_header_name(407), "Proxy-Authorization");
		assert_eq!(auth_header_name(401), "Authorization");
	}
}
