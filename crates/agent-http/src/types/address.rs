use std::fmt;

/// A dial destination: a host, a port, and whether to layer TLS over the raw
/// bytes. Equality is total on the triple — two addresses that differ only in
/// case are intentionally distinct; callers are expected to lower-case `host`
/// before constructing one (the same rule `HttpRequest` applies to `Host`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpAddress {
	pub ssl: bool,
	pub host: String,
	pub port: u16,
}

impl TcpAddress {
	pub fn new(ssl: bool, host: impl Into<String>, port: u16) -> Self {
		Self {
			ssl,
			host: host.into(),
			port,
		}
	}

	pub fn plain(host: impl Into<String>, port: u16) -> Self {
		Self::new(false, host, port)
	}

	pub fn tls(host: impl Into<String>, port: u16) -> Self {
		Self::new(true, host, port)
	}
}

impl fmt::Display for TcpAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.host.contains(':') {
			// IPv6 literal
			write!(f, "[{}]:{}", self.host, self.port)
		} else {
			write!(f, "{}:{}", self.host, self.port)
		}
	}
}
