//! The request coordinator.
//!
//! [`Requests::send`] brackets each request with the scheduler's pending-computation counter, so
//! any number of concurrent requests collapse into one redraw after the last completes. The
//! transport itself is pluggable.

use crate::{
	deferred::{Deferred, Promise, Rejection},
	query::build_query_string,
	scheduler::Scheduler,
};
use core::fmt::{self, Debug, Formatter};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::{rc::Rc, sync::OnceLock};
use thiserror::Error;
use tracing::{error, instrument, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
	/// A non-2xx response, with its (unwrapped) body.
	#[error("request failed with status {status}")]
	Status { status: u16, body: Value },
	#[error("could not decode response: {0}")]
	Decode(String),
	#[error("transport failure: {0}")]
	Transport(String),
	#[error("invalid request: {0}")]
	Invalid(String),
}
impl Rejection for RequestError {
	fn is_fatal(&self) -> bool {
		matches!(self, RequestError::Invalid(_))
	}
}

/// What the transport completes a request with.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	pub status: u16,
	pub body: String,
}
impl Response {
	#[must_use]
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self { status, body: body.into() }
	}

	#[must_use]
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// A request ready to hand to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
	pub method: String,
	pub url: String,
	pub headers: Vec<(String, String)>,
	pub body: Option<String>,
}

pub type Completion = Box<dyn FnOnce(Result<Response, String>)>;

/// Sends prepared requests. `complete` may be called synchronously or later, but exactly once.
pub trait Transport {
	fn send(&self, request: PreparedRequest, complete: Completion);
}

type SerializeFn = Rc<dyn Fn(&Value) -> Result<String, String>>;
type DeserializeFn = Rc<dyn Fn(&str) -> Result<Value, String>>;
type ExtractFn = Rc<dyn Fn(&Response) -> String>;
type UnwrapFn = Rc<dyn Fn(Value, &Response) -> Value>;

/// A request description.
#[derive(Clone)]
pub struct RequestOptions {
	method: String,
	url: String,
	data: Option<Value>,
	background: bool,
	headers: Vec<(String, String)>,
	serialize: Option<SerializeFn>,
	deserialize: Option<DeserializeFn>,
	extract: Option<ExtractFn>,
	unwrap_success: Option<UnwrapFn>,
	unwrap_error: Option<UnwrapFn>,
}
impl Debug for RequestOptions {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("RequestOptions")
			.field("method", &self.method)
			.field("url", &self.url)
			.field("background", &self.background)
			.finish_non_exhaustive()
	}
}
impl RequestOptions {
	#[must_use]
	pub fn new(method: &str, url: impl Into<String>) -> Self {
		Self {
			method: method.to_uppercase(),
			url: url.into(),
			data: None,
			background: false,
			headers: Vec::new(),
			serialize: None,
			deserialize: None,
			extract: None,
			unwrap_success: None,
			unwrap_error: None,
		}
	}

	#[must_use]
	pub fn get(url: impl Into<String>) -> Self {
		Self::new("GET", url)
	}

	#[must_use]
	pub fn post(url: impl Into<String>) -> Self {
		Self::new("POST", url)
	}

	/// Fills `:name` url segments first; what remains becomes the query string (GET) or body.
	#[must_use]
	pub fn data(mut self, data: impl Into<Value>) -> Self {
		self.data = Some(data.into());
		self
	}

	/// Background requests neither suspend nor trigger redraws.
	#[must_use]
	pub fn background(mut self, background: bool) -> Self {
		self.background = background;
		self
	}

	#[must_use]
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	#[must_use]
	pub fn serialize(mut self, serialize: impl Fn(&Value) -> Result<String, String> + 'static) -> Self {
		self.serialize = Some(Rc::new(serialize));
		self
	}

	#[must_use]
	pub fn deserialize(mut self, deserialize: impl Fn(&str) -> Result<Value, String> + 'static) -> Self {
		self.deserialize = Some(Rc::new(deserialize));
		self
	}

	/// Chooses the text handed to the deserializer.
	#[must_use]
	pub fn extract(mut self, extract: impl Fn(&Response) -> String + 'static) -> Self {
		self.extract = Some(Rc::new(extract));
		self
	}

	#[must_use]
	pub fn unwrap_success(mut self, unwrap: impl Fn(Value, &Response) -> Value + 'static) -> Self {
		self.unwrap_success = Some(Rc::new(unwrap));
		self
	}

	#[must_use]
	pub fn unwrap_error(mut self, unwrap: impl Fn(Value, &Response) -> Value + 'static) -> Self {
		self.unwrap_error = Some(Rc::new(unwrap));
		self
	}

	#[must_use]
	pub fn is_background(&self) -> bool {
		self.background
	}

	/// Resolves url parameters and encodes the remaining data.
	///
	/// # Errors
	///
	/// Iff the custom or default serializer fails.
	pub fn prepare(&self) -> Result<PreparedRequest, RequestError> {
		let mut data = self.data.clone();
		let mut url = match &mut data {
			Some(Value::Object(map)) => parameterize(&self.url, map),
			_ => self.url.clone(),
		};

		let mut headers = self.headers.clone();
		if self.deserialize.is_none() {
			headers.push(("Accept".to_owned(), "application/json, text/*".to_owned()));
		}

		let mut body = None;
		if self.method == "GET" {
			if let Some(Value::Object(map)) = &data {
				let query = build_query_string(map);
				if !query.is_empty() {
					url.push(if url.contains('?') { '&' } else { '?' });
					url.push_str(&query);
				}
			}
		} else if let Some(data) = &data {
			body = Some(match &self.serialize {
				Some(serialize) => serialize(data).map_err(RequestError::Invalid)?,
				None => {
					headers.push(("Content-Type".to_owned(), "application/json; charset=utf-8".to_owned()));
					serde_json::to_string(data).map_err(|error| RequestError::Invalid(error.to_string()))?
				}
			});
		}

		Ok(PreparedRequest {
			method: self.method.clone(),
			url,
			headers,
			body,
		})
	}

	/// Turns a transport response into the value the request resolves or rejects with.
	fn interpret(&self, response: &Response) -> Result<Value, RequestError> {
		let text = match &self.extract {
			Some(extract) => extract(response),
			None if response.body.is_empty() && self.deserialize.is_none() => "null".to_owned(),
			None => response.body.clone(),
		};
		let value = match &self.deserialize {
			Some(deserialize) => deserialize(&text).map_err(RequestError::Decode)?,
			None => serde_json::from_str(&text).map_err(|error| RequestError::Decode(error.to_string()))?,
		};

		if response.is_success() {
			Ok(match &self.unwrap_success {
				Some(unwrap) => unwrap(value, response),
				None => value,
			})
		} else {
			Err(RequestError::Status {
				status: response.status,
				body: match &self.unwrap_error {
					Some(unwrap) => unwrap(value, response),
					None => value,
				},
			})
		}
	}
}

/// Replaces `:name` tokens with (and removes) the matching data entries.
fn parameterize(url: &str, data: &mut Map<String, Value>) -> String {
	static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
	let token = match TOKEN.get_or_init(|| Regex::new(r"(?i):[a-z]\w+").ok()) {
		Some(token) => token,
		None => return url.to_owned(),
	};
	token
		.replace_all(url, |captures: &Captures<'_>| {
			let name = &captures[0][1..];
			match data.remove(name) {
				Some(Value::String(value)) => value,
				Some(Value::Null) | None => String::new(),
				Some(other) => other.to_string(),
			}
		})
		.into_owned()
}

/// Issues requests on behalf of an [`App`](`crate::app::App`).
#[derive(Clone)]
pub struct Requests {
	scheduler: Rc<Scheduler>,
	transport: Rc<dyn Transport>,
}
impl Debug for Requests {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Requests").finish_non_exhaustive()
	}
}
impl Requests {
	#[must_use]
	pub fn new(scheduler: Rc<Scheduler>, transport: Rc<dyn Transport>) -> Self {
		Self { scheduler, transport }
	}

	/// Sends a request, resolving with the decoded response body.
	///
	/// Continuations attached to the returned promise before completion run before the
	/// pending-computation counter is decremented.
	#[instrument(skip_all, fields(method = &*options.method, url = &*options.url))]
	pub fn send<T>(&self, options: RequestOptions) -> Promise<T, RequestError>
	where
		T: DeserializeOwned + Clone + 'static,
	{
		let background = options.background;
		if !background {
			self.scheduler.start_computation();
		}
		let deferred = Deferred::<T, RequestError>::with_hook(self.scheduler.error_hook());
		let promise = deferred.promise();

		let prepared = match options.prepare() {
			Ok(prepared) => prepared,
			Err(error) => {
				deferred.reject(error);
				if !background {
					end_computation(&self.scheduler);
				}
				return promise;
			}
		};

		trace!(url = &*prepared.url, "Dispatching request.");
		let scheduler = self.scheduler.clone();
		self.transport.send(
			prepared,
			Box::new(move |outcome| {
				let outcome = match outcome {
					Ok(response) => options.interpret(&response).and_then(|value| serde_json::from_value::<T>(value).map_err(|error| RequestError::Decode(error.to_string()))),
					Err(error) => Err(RequestError::Transport(error)),
				};
				deferred.settle(outcome);
				drop(deferred);
				if !background {
					end_computation(&scheduler);
				}
			}),
		);
		promise
	}
}

fn end_computation(scheduler: &Scheduler) {
	if let Err(error) = scheduler.end_computation() {
		error!("Redraw after request completion failed: {}", error)
	}
}
