//! Route tables and the browser-history abstraction they are driven through.

use crate::{
	component::ComponentRef,
	query::{parse_query_string, Params},
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use regex::Regex;
use std::{borrow::Cow, rc::Rc};
use tracing::{trace, warn};

/// Which part of the location holds the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMode {
	/// `?/route`
	#[default]
	Search,
	/// `#/route`
	Hash,
	/// `/route`
	Pathname,
}
impl RouteMode {
	#[must_use]
	pub fn prefix(self) -> &'static str {
		match self {
			RouteMode::Search => "?",
			RouteMode::Hash => "#",
			RouteMode::Pathname => "",
		}
	}

	/// Strips this mode's prefix from a location fragment.
	#[must_use]
	pub fn normalize(self, location: &str) -> String {
		location.strip_prefix(self.prefix()).unwrap_or(location).to_owned()
	}
}

/// Where routes are read from and written to.
pub trait History {
	/// The current route, already normalized for `mode`.
	fn location(&self, mode: RouteMode) -> String;
	fn push(&self, mode: RouteMode, route: &str);
	fn replace(&self, mode: RouteMode, route: &str);
	fn scroll_to_top(&self) {}
}

/// A [`History`] that keeps its entries in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
	entries: RefCell<Vec<String>>,
	scrolls: RefCell<usize>,
}
impl MemoryHistory {
	#[must_use]
	pub fn new(initial: impl Into<String>) -> Rc<Self> {
		Rc::new(Self {
			entries: RefCell::new(vec![initial.into()]),
			scrolls: RefCell::default(),
		})
	}

	#[must_use]
	pub fn entries(&self) -> Vec<String> {
		self.entries.borrow().clone()
	}

	/// Drops the newest entry, as the back button would. Returns the new current route.
	pub fn back(&self) -> Option<String> {
		let mut entries = self.entries.borrow_mut();
		if entries.len() > 1 {
			entries.pop();
		}
		entries.last().cloned()
	}

	#[must_use]
	pub fn scrolls(&self) -> usize {
		*self.scrolls.borrow()
	}
}
impl History for MemoryHistory {
	fn location(&self, mode: RouteMode) -> String {
		self.entries.borrow().last().map(|entry| mode.normalize(entry)).unwrap_or_default()
	}

	fn push(&self, mode: RouteMode, route: &str) {
		self.entries.borrow_mut().push(format!("{}{}", mode.prefix(), route))
	}

	fn replace(&self, mode: RouteMode, route: &str) {
		let mut entries = self.entries.borrow_mut();
		entries.pop();
		entries.push(format!("{}{}", mode.prefix(), route))
	}

	fn scroll_to_top(&self) {
		*self.scrolls.borrow_mut() += 1
	}
}

struct Route {
	pattern: String,
	names: Vec<String>,
	matcher: Option<Regex>,
	component: ComponentRef,
}

/// Patterns in declaration order. `:name` captures one segment, `:name...` the remainder.
#[derive(Default)]
pub struct RouteTable {
	routes: Vec<Route>,
}
impl Debug for RouteTable {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.routes.iter().map(|route| &route.pattern)).finish()
	}
}

/// A resolved route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
	pub pattern: String,
	pub params: Params,
	pub component: ComponentRef,
}

impl RouteTable {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `pattern`. A pattern that fails to compile still matches exactly.
	#[must_use]
	pub fn route(mut self, pattern: impl Into<String>, component: ComponentRef) -> Self {
		let pattern = pattern.into();
		let (source, names) = compile(&pattern);
		let matcher = Regex::new(&source)
			.map_err(|error| warn!(pattern = &*pattern, "Route pattern does not compile: {}", error))
			.ok();
		self.routes.push(Route {
			pattern,
			names,
			matcher,
			component,
		});
		self
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.routes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.routes.is_empty()
	}

	/// Matches `path`, which may carry a query string.
	///
	/// An exact pattern match wins over captures. Captured values are URL-decoded and
	/// override query parameters of the same name.
	#[must_use]
	pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
		let (path, mut params) = match path.split_once('?') {
			Some((path, query)) => (path, parse_query_string(query)),
			None => (path, Params::new()),
		};

		if let Some(route) = self.routes.iter().find(|route| route.pattern == path) {
			trace!(pattern = &*route.pattern, "Exact route match.");
			return Some(RouteMatch {
				pattern: route.pattern.clone(),
				params,
				component: route.component.clone(),
			});
		}

		for route in &self.routes {
			let captures = match route.matcher.as_ref().and_then(|matcher| matcher.captures(path)) {
				Some(captures) => captures,
				None => continue,
			};
			for (name, value) in route.names.iter().zip(captures.iter().skip(1)) {
				let value = value.map_or("", |value| value.as_str());
				let decoded = urlencoding::decode(value).map_or(Cow::Borrowed(value), |decoded| decoded);
				params.insert(name.clone(), decoded.into_owned());
			}
			trace!(pattern = &*route.pattern, "Route matched.");
			return Some(RouteMatch {
				pattern: route.pattern.clone(),
				params,
				component: route.component.clone(),
			});
		}
		None
	}
}

/// Translates a route pattern into an anchored regex and its parameter names.
fn compile(pattern: &str) -> (String, Vec<String>) {
	let mut source = String::from("^");
	let mut names = Vec::new();
	for (i, segment) in pattern.split('/').enumerate() {
		if i > 0 {
			source.push('/');
		}
		let mut rest = segment;
		while let Some(start) = rest.find(':') {
			source.push_str(&regex::escape(&rest[..start]));
			let parameter = &rest[start + 1..];
			match parameter.find("...") {
				Some(end) => {
					names.push(parameter[..end].replace('.', ""));
					source.push_str("(.*?)");
					rest = &parameter[end + 3..];
				}
				None => {
					names.push(parameter.to_owned());
					source.push_str("([^/]+)");
					rest = "";
				}
			}
		}
		source.push_str(&regex::escape(rest));
	}
	source.push_str("/?$");
	(source, names)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compiles_segments_and_remainders() {
		let (source, names) = compile("/files/:path.../raw/:rev");
		assert_eq!(source, "^/files/(.*?)/raw/([^/]+)/?$");
		assert_eq!(names, vec!["path", "rev"]);
	}

	#[test]
	fn memory_history_tracks_entries() {
		let history = MemoryHistory::new("?/");
		history.push(RouteMode::Search, "/a");
		history.replace(RouteMode::Search, "/b");
		assert_eq!(history.location(RouteMode::Search), "/b");
		assert_eq!(history.back().as_deref(), Some("?/"));
		assert_eq!(history.location(RouteMode::Search), "/");
	}
}
