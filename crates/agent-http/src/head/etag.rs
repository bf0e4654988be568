use crate::error::{EngineError, Result};

/// Parses an `ETag` header value (`"abc"` or `W/"abc"`, `\`-escapes honored)
/// into the tag's opaque content, per §6. A weak tag's content is returned
/// without the `W/` prefix but [`is_weak`] distinguishes the two.
pub struct ETag {
	pub value: String,
	pub weak: bool,
}

pub fn parse_etag(raw: &str) -> Result<ETag> {
	let (weak, rest) = match raw.strip_prefix("W/") {
		Some(rest) => (true, rest),
		None => (false, raw),
	};
	let rest = rest
		.strip_prefix('"')
		.ok_or_else(|| EngineError::protocol("etag must be a quoted-string"))?;
	let mut value = String::with_capacity(rest.len());
	let mut chars = rest.chars();
	let mut closed = false;
	while let Some(c) = chars.next() {
		match c {
			'\\' => match chars.next() {
				Some(escaped) => value.push(escaped),
				None => return Err(EngineError::protocol("etag ends with a dangling escape")),
			},
			'"' => {
				closed = true;
				break;
			},
			c => value.push(c),
		}
	}
	if !closed {
		return Err(EngineError::protocol("etag quoted-string is not terminated"));
	}
	if chars.next().is_some() {
		return Err(EngineError::protocol("trailing bytes after etag quoted-string"));
	}
	Ok(ETag { value, weak })
}

/// Formats an opaque tag value back into wire form, `\`-escaping `"` and `\`.
pub fn format_etag(value: &str, weak: bool) -> String {
	let mut out = String::with_capacity(value.len() + 2 + if weak { 2 } else { 0 });
	if weak {
		out.push_str("W/");
	}
	out.push('"');
	for c in value.chars() {
		if c == '"' || c == '\\' {
			out.push('\\');
		}
		out.push(c);
	}
	out.push('"');
	out
}
