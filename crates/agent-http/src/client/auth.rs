//! Basic and Digest authentication for the CONNECT tunnel (§4.3, §6). Only
//! what the tunnel needs: computing an `Authorization`/`Proxy-Authorization`
//! value from a challenge, and caching Digest state per tunnel address so a
//! second tunnel to the same address can pre-authenticate with an
//! incremented `nc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest as _, Md5};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{EngineError, Result};
use crate::types::address::TcpAddress;

#[derive(Debug, Clone)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
	Md5,
	Md5Sess,
	Sha256,
}

impl DigestAlgorithm {
	fn parse(token: &str) -> Option<Self> {
		match token.to_ascii_uppercase().as_str() {
			"MD5" | "" => Some(Self::Md5),
			"MD5-SESS" => Some(Self::Md5Sess),
			"SHA-256" => Some(Self::Sha256),
			_ => None,
		}
	}

	fn hash_hex(self, input: &str) -> String {
		match self {
			DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => hex::encode(Md5::digest(input.as_bytes())),
			DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
		}
	}
}

#[derive(Debug, Clone)]
pub struct DigestChallenge {
	pub realm: String,
	pub nonce: String,
	pub opaque: Option<String>,
	pub qop: Option<String>,
	pub algorithm: DigestAlgorithm,
}

/// A challenge this crate knows how to answer. An unsupported scheme (or a
/// Digest `qop` other than `auth`) is not represented here — callers surface
/// [`EngineError::Auth`] instead of guessing.
pub enum Challenge {
	Basic { realm: String },
	Digest(DigestChallenge),
}

/// Parses a single `WWW-Authenticate`/`Proxy-Authenticate` challenge. Only
/// the first challenge in the header is considered; a server offering
/// several schemes in one header is rare enough on a CONNECT proxy that this
/// crate does not attempt full multi-challenge negotiation.
pub fn parse_challenge(header_value: &str) -> Option<Challenge> {
	let value = header_value.trim();
	let (scheme, rest) = value.split_once(char::is_whitespace)?;
	let params = parse_auth_params(rest);
	match scheme.to_ascii_lowercase().as_str() {
		"basic" => Some(Challenge::Basic {
			realm: params.get("realm").cloned().unwrap_or_default(),
		}),
		"digest" => {
			let algorithm = params
				.get("algorithm")
				.and_then(|a| DigestAlgorithm::parse(a))
				.unwrap_or(DigestAlgorithm::Md5);
			Some(Challenge::Digest(DigestChallenge {
				realm: params.get("realm").cloned().unwrap_or_default(),
				nonce: params.get("nonce").cloned()?,
				opaque: params.get("opaque").cloned(),
				qop: params.get("qop").cloned(),
				algorithm,
			}))
		},
		_ => None,
	}
}

fn parse_auth_params(s: &str) -> HashMap<String, String> {
	let mut out = HashMap::new();
	for part in split_auth_params(s) {
		if let Some((k, v)) = part.split_once('=') {
			let v = v.trim().trim_matches('"');
			out.insert(k.trim().to_ascii_lowercase(), v.to_string());
		}
	}
	out
}

/// Splits on commas that are not inside a quoted string (quoted realms etc
/// may legally contain commas).
fn split_auth_params(s: &str) -> Vec<String> {
	let mut parts = Vec::new();
	let mut current = String::new();
	let mut in_quotes = false;
	for c in s.chars() {
		match c {
			'"' => {
				in_quotes = !in_quotes;
				current.push(c);
			},
			',' if !in_quotes => {
				parts.push(std::mem::take(&mut current));
			},
			_ => current.push(c),
		}
	}
	if !current.is_empty() {
		parts.push(current);
	}
	parts
}

pub fn basic_header_value(creds: &Credentials) -> String {
	let raw = format!("{}:{}", creds.username, creds.password);
	format!("Basic {}", BASE64.encode(raw))
}

fn random_cnonce() -> String {
	let mut bytes = [0u8; 16];
	rand::rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

/// Computes an RFC 7616 Digest response for `method request_uri`, tracking
/// `nc` for this attempt (the caller persists the incremented value via
/// [`DigestCache`] for the *next* tunnel to the same address).
pub fn digest_header_value(
	creds: &Credentials,
	challenge: &DigestChallenge,
	method: &str,
	request_uri: &str,
	nc: u32,
) -> String {
	let cnonce = random_cnonce();
	let ha1 = match challenge.algorithm {
		DigestAlgorithm::Md5Sess => {
			let base = challenge
				.algorithm
				.hash_hex(&format!("{}:{}:{}", creds.username, challenge.realm, creds.password));
			challenge
				.algorithm
				.hash_hex(&format!("{base}:{}:{cnonce}", challenge.nonce))
		},
		_ => challenge
			.algorithm
			.hash_hex(&format!("{}:{}:{}", creds.username, challenge.realm, creds.password)),
	};
	let ha2 = challenge.algorithm.hash_hex(&format!("{method}:{request_uri}"));
	let nc_str = format!("{nc:08x}");
	let qop = challenge.qop.as_deref().unwrap_or("auth");
	let response = if challenge.qop.is_some() {
		challenge
			.algorithm
			.hash_hex(&format!("{ha1}:{}:{nc_str}:{cnonce}:{qop}:{ha2}", challenge.nonce))
	} else {
		challenge
			.algorithm
			.hash_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce))
	};

	let algorithm_token = match challenge.algorithm {
		DigestAlgorithm::Md5 => "MD5",
		DigestAlgorithm::Md5Sess => "MD5-sess",
		DigestAlgorithm::Sha256 => "SHA-256",
	};

	let mut out = format!(
		"Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
		creds.username, challenge.realm, challenge.nonce, request_uri, algorithm_token, response
	);
	if challenge.qop.is_some() {
		out.push_str(&format!(", qop=auth, nc={nc_str}, cnonce=\"{cnonce}\""));
	}
	if let Some(opaque) = &challenge.opaque {
		out.push_str(&format!(", opaque=\"{opaque}\""));
	}
	out
}

struct CachedChallenge {
	challenge: DigestChallenge,
	nc: AtomicU32,
}

/// Per-tunnel-address Digest state (§4.3: "cache the scheme parameters ...
/// in a map keyed by tunnel address so subsequent tunnels against the same
/// address pre-authenticate"). Guarded by its own lock, read/written only
/// from tunnel operations for that address (§5).
#[derive(Default)]
pub struct DigestCache {
	entries: Mutex<HashMap<TcpAddress, CachedChallenge>>,
}

impl DigestCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns a pre-authenticated header value for `address` if a prior
	/// tunnel to it recorded a Digest challenge, incrementing `nc` for this
	/// attempt.
	pub fn preauth(&self, address: &TcpAddress, creds: &Credentials, method: &str, uri: &str) -> Option<String> {
		let entries = self.entries.lock();
		let cached = entries.get(address)?;
		let nc = cached.nc.fetch_add(1, Ordering::SeqCst) + 1;
		Some(digest_header_value(creds, &cached.challenge, method, uri, nc))
	}

	pub fn record(&self, address: TcpAddress, challenge: DigestChallenge) {
		self.entries.lock().insert(
			address,
			CachedChallenge {
				challenge,
				nc: AtomicU32::new(1),
			},
		);
	}
}

/// Fails with [`EngineError::Auth`] when no scheme in `challenges` is
/// supported — the tunnel turns that into a [`EngineError::Tunnel`] (§7).
pub fn require_supported(challenge: Option<Challenge>) -> Result<Challenge> {
	challenge.ok_or_else(|| EngineError::auth("unsupported or malformed authentication challenge"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_basic_challenge() {
		let c = parse_challenge("Basic realm=\"proxy\"").unwrap();
		assert!(matches!(c, Challenge::Basic { realm } if realm == "proxy"));
	}

	#[test]
	fn parses_digest_challenge_with_qop() {
		let c = parse_challenge(
			"Digest realm=\"proxy\", nonce=\"abc123\", qop=\"auth\", algorithm=MD5, opaque=\"xyz\"",
		)
		.unwrap();
		let Challenge::Digest(d) = c else { panic!("expected digest") };
		assert_eq!(d.realm, "proxy");
		assert_eq!(d.nonce, "abc123");
		assert_eq!(d.qop.as_deref(), Some("auth"));
		assert_eq!(d.opaque.as_deref(), Some("xyz"));
		assert_eq!(d.algorithm, DigestAlgorithm::Md5);
	}

	#[test]
	fn basic_header_encodes_user_pass() {
		let creds = Credentials {
			username: "alice".into(),
			password: "secret".into(),
		};
		let header = basic_header_value(&creds);
		assert_eq!(header, "Basic YWxpY2U6c2VjcmV0");
	}

	#[test]
	fn digest_cache_preauth_increments_nc() {
		let cache = DigestCache::new();
		let addr = TcpAddress::plain("proxy", 3128);
		let challenge = DigestChallenge {
			realm: "proxy".into(),
			nonce: "n1".into(),
			opaque: None,
			qop: Some("auth".into()),
			algorithm: DigestAlgorithm::Md5,
		};
		cache.record(addr.clone(), challenge);
		let creds = Credentials {
			username: "bob".into(),
			password: "pw".into(),
		};
		let first = cache.preauth(&addr, &creds, "CONNECT", "dest:443").unwrap();
		let second = cache.preauth(&addr, &creds, "CONNECT", "dest:443").unwrap();
		assert!(first.contains("nc=00000001"));
		assert!(second.contains("nc=00000002"));
	}
}
