//! Query strings.
//!
//! Route parameters and request data share one namespace, modeled as a JSON object so that
//! nested objects and arrays survive the round trip through a URL.

use serde_json::{Map, Value};
use std::borrow::Cow;

/// Named parameters, as captured from a route or passed to a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);
impl Params {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	/// The parameter as a string, if it is one.
	#[must_use]
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.0.get(key).and_then(Value::as_str)
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.0.insert(key.into(), value.into())
	}

	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.0.remove(key)
	}

	/// Overwrites existing keys with `other`'s.
	pub fn extend(&mut self, other: Params) {
		self.0.extend(other.0)
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}

	#[must_use]
	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	#[must_use]
	pub fn to_query_string(&self) -> String {
		build_query_string(&self.0)
	}
}
impl From<Map<String, Value>> for Params {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}
impl From<Params> for Value {
	fn from(params: Params) -> Self {
		Value::Object(params.0)
	}
}
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
	}
}

fn scalar_string(value: &Value) -> Cow<'_, str> {
	match value {
		Value::String(s) => Cow::Borrowed(s),
		Value::Null => Cow::Borrowed(""),
		other => Cow::Owned(other.to_string()),
	}
}

/// Encodes `object` as `key=value` pairs joined by `&`.
///
/// Nested objects use bracketed keys (`a[b]=c`), arrays repeat their key with duplicate
/// values dropped, and `null` produces a bare key.
#[must_use]
pub fn build_query_string(object: &Map<String, Value>) -> String {
	build_prefixed(object, None)
}

fn build_prefixed(object: &Map<String, Value>, prefix: Option<&str>) -> String {
	let mut parts = Vec::with_capacity(object.len());
	for (name, value) in object {
		let key = match prefix {
			Some(prefix) => format!("{}[{}]", prefix, name),
			None => name.clone(),
		};
		match value {
			Value::Null => parts.push(urlencoding::encode(&key).into_owned()),
			Value::Object(nested) => {
				let nested = build_prefixed(nested, Some(&key));
				if !nested.is_empty() {
					parts.push(nested)
				}
			}
			Value::Array(items) => {
				let mut seen = Vec::with_capacity(items.len());
				for item in items {
					let item = scalar_string(item);
					if !seen.contains(&item) {
						parts.push(format!("{}={}", urlencoding::encode(&key), urlencoding::encode(&item)));
						seen.push(item);
					}
				}
			}
			Value::Bool(_) | Value::Number(_) | Value::String(_) => {
				parts.push(format!("{}={}", urlencoding::encode(&key), urlencoding::encode(&scalar_string(value))))
			}
		}
	}
	parts.join("&")
}

fn decode(component: &str) -> String {
	urlencoding::decode(component).map_or_else(|_| component.to_owned(), Cow::into_owned)
}

/// Decodes a query string, with or without its leading `?`.
///
/// Repeated keys collect into an array. A key without `=` maps to `null`.
#[must_use]
pub fn parse_query_string(query: &str) -> Params {
	let query = query.strip_prefix('?').unwrap_or(query);
	let mut params = Map::new();
	if query.is_empty() {
		return Params(params);
	}

	for pair in query.split('&') {
		let mut split = pair.split('=');
		let key = decode(split.next().unwrap_or_default());
		let value = match (split.next(), split.next()) {
			(Some(value), None) => Value::String(decode(value)),
			_ => Value::Null,
		};
		match params.get_mut(&key) {
			Some(Value::Array(values)) => values.push(value),
			Some(existing) if !existing.is_null() => {
				let first = existing.take();
				*existing = Value::Array(vec![first, value]);
			}
			_ => {
				params.insert(key, value);
			}
		}
	}
	Params(params)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn object(value: Value) -> Map<String, Value> {
		match value {
			Value::Object(map) => map,
			_ => Map::new(),
		}
	}

	#[test]
	fn nested_arrays_and_nulls() {
		let query = build_query_string(&object(json!({
			"a": { "b": "c d" },
			"flag": null,
			"tag": ["x", "y", "x"],
		})));
		assert_eq!(query, "a%5Bb%5D=c%20d&flag&tag=x&tag=y");
	}

	#[test]
	fn repeated_and_bare_keys() {
		let params = parse_query_string("?tab=info&tag=a&tag=b%20c&bare");
		assert_eq!(params.get_str("tab"), Some("info"));
		assert_eq!(params.get("tag"), Some(&json!(["a", "b c"])));
		assert_eq!(params.get("bare"), Some(&Value::Null));
		assert!(parse_query_string("").is_empty());
	}
}
