use std::time::Duration;

/// serde (de)serialization for a `Duration` using the same human-readable
/// syntax as the source's config files (`"30s"`, `"2m"`, `"500ms"`).
pub mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		s.serialize_str(&durationfmt::to_string(*d))
	}

	pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(d)?;
		super::parse(&s).map_err(serde::de::Error::custom)
	}
}

/// Same as [`serde_dur`] but for an `Option<Duration>`, treating an absent or
/// null field as `None` rather than an error.
pub mod serde_dur_option {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match d {
			Some(d) => s.serialize_str(&durationfmt::to_string(*d)),
			None => s.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s: Option<String> = Option::deserialize(d)?;
		match s {
			Some(s) => super::parse(&s).map(Some).map_err(serde::de::Error::custom),
			None => Ok(None),
		}
	}
}

/// Parses a Go-style duration string (`"1h30m"`, `"250ms"`) into a [`Duration`].
pub fn parse(s: &str) -> Result<Duration, String> {
	let nanos = go_parse_duration::parse_duration(s).map_err(|e| format!("{e:?}"))?;
	if nanos < 0 {
		return Err(format!("duration must not be negative: {s}"));
	}
	Ok(Duration::from_nanos(nanos as u64))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_common_values() {
		for s in ["1s", "30s", "2m", "500ms", "1h"] {
			let d = parse(s).unwrap();
			let formatted = durationfmt::to_string(d);
			assert_eq!(parse(&formatted).unwrap(), d, "input {s}");
		}
	}

	#[test]
	fn rejects_negative() {
		assert!(parse("-5s").is_err());
	}
}
