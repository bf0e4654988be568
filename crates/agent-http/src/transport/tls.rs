use std::sync::Arc;

use once_cell::sync::Lazy;
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{EngineError, Result};

static NATIVE_ROOTS: Lazy<rustls::RootCertStore> = Lazy::new(|| {
	let mut store = rustls::RootCertStore::empty();
	let result = rustls_native_certs::load_native_certs();
	for cert in result.certs {
		let _ = store.add(cert);
	}
	store
});

/// A reusable TLS client configuration. Built once per distinct set of trust
/// roots (the common case: the system trust store) and cloned cheaply
/// (`Arc<ClientConfig>`) per connection, exactly as `rustls` expects to be
/// used — grounded on the teacher's `client/tls.rs` / `http/backendtls.rs`
/// pairing, simplified to this crate's single-hop TLS needs (no ALPN
/// negotiation; this engine is HTTP/1.x only, per spec Non-goals).
#[derive(Clone)]
pub struct TlsConfig {
	connector: TlsConnector,
}

impl TlsConfig {
	/// Builds a client config trusting the platform's native certificate
	/// store.
	pub fn system() -> Self {
		let config = ClientConfig::builder()
			.with_root_certificates(NATIVE_ROOTS.clone())
			.with_no_client_auth();
		Self {
			connector: TlsConnector::from(Arc::new(config)),
		}
	}

	pub fn with_roots(roots: rustls::RootCertStore) -> Self {
		let config = ClientConfig::builder()
			.with_root_certificates(roots)
			.with_no_client_auth();
		Self {
			connector: TlsConnector::from(Arc::new(config)),
		}
	}

	/// Performs the TLS handshake over an already-connected TCP stream, using
	/// `sni_host` both for SNI and for certificate hostname verification
	/// (§4.2: "using `next.host` for SNI and certificate verification").
	pub async fn handshake(
		&self,
		tcp: TcpStream,
		sni_host: &str,
	) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
		let server_name = server_name_for(sni_host)?;
		self
			.connector
			.connect(server_name, tcp)
			.await
			.map_err(EngineError::Io)
	}
}

fn server_name_for(host: &str) -> Result<ServerName<'static>> {
	if let Ok(ip) = host.parse::<std::net::IpAddr>() {
		return Ok(ServerName::IpAddress(ip.into()));
	}
	rustls_pki_types::DnsName::try_from(host.to_string())
		.map(ServerName::DnsName)
		.map_err(|_| EngineError::protocol(format!("invalid TLS server name: {host}")))
}
