//! The host document abstraction the reconciler mutates.
//!
//! [`HostTree`] is deliberately narrow: the engine only ever creates nodes, moves them by index
//! within a parent and writes attributes, properties, style rules and event listeners.
//! [`MemoryDocument`](`crate::memory::MemoryDocument`) and [`WebDocument`](`crate::web::WebDocument`) implement it.

use core::{
	any::Any,
	cell::Cell,
	fmt::{self, Debug, Display, Formatter},
};
use std::rc::Rc;
use thiserror::Error;

pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
	#[error("node not found")]
	NotFound,
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("operation rejected by the host: {0}")]
	Rejected(String),
}

/// A primitive value as exchanged with host properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
	Str(Rc<str>),
	Number(f64),
	Bool(bool),
}
impl Scalar {
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Scalar::Str(s) => Some(s),
			Scalar::Number(_) | Scalar::Bool(_) => None,
		}
	}
}
impl Display for Scalar {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Scalar::Str(s) => f.write_str(s),
			Scalar::Number(n) => write!(f, "{}", n),
			Scalar::Bool(b) => write!(f, "{}", b),
		}
	}
}
impl From<&str> for Scalar {
	fn from(s: &str) -> Self {
		Scalar::Str(s.into())
	}
}
impl From<String> for Scalar {
	fn from(s: String) -> Self {
		Scalar::Str(s.into())
	}
}
impl From<f64> for Scalar {
	fn from(n: f64) -> Self {
		Scalar::Number(n)
	}
}
impl From<bool> for Scalar {
	fn from(b: bool) -> Self {
		Scalar::Bool(b)
	}
}

/// Live view of the element an [`Event`] was dispatched on.
pub trait EventTarget {
	fn property(&self, name: &str) -> Option<Scalar>;
}

/// A host event as seen by handlers.
pub struct Event {
	name: String,
	target: Option<Rc<dyn EventTarget>>,
	raw: Option<Rc<dyn Any>>,
	default_prevented: Cell<bool>,
}
impl Event {
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			target: None,
			raw: None,
			default_prevented: Cell::new(false),
		}
	}

	#[must_use]
	pub fn with_target(mut self, target: Rc<dyn EventTarget>) -> Self {
		self.target = Some(target);
		self
	}

	/// Attaches the host's native event object, retrievable through [`Event::raw`].
	#[must_use]
	pub fn with_raw(mut self, raw: Rc<dyn Any>) -> Self {
		self.raw = Some(raw);
		self
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn target_property(&self, name: &str) -> Option<Scalar> {
		self.target.as_ref().and_then(|target| target.property(name))
	}

	#[must_use]
	pub fn raw<T: 'static>(&self) -> Option<&T> {
		self.raw.as_deref().and_then(<dyn Any>::downcast_ref)
	}

	pub fn prevent_default(&self) {
		self.default_prevented.set(true)
	}

	#[must_use]
	pub fn is_default_prevented(&self) -> bool {
		self.default_prevented.get()
	}
}
impl Debug for Event {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Event")
			.field("name", &self.name)
			.field("default_prevented", &self.default_prevented.get())
			.finish_non_exhaustive()
	}
}

/// A listener as bound into the host tree.
///
/// Listeners are compared by [`Rc::ptr_eq`] wherever identity matters.
pub type Listener = Rc<dyn Fn(&Event)>;

/// Shallow description of a host node, used by [`load`](`crate::load`).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInfo {
	Element { tag: String, attributes: Vec<(String, String)> },
	Text(String),
	Other,
}

/// A mutable host document.
///
/// All methods take `&self`: hosts are expected to be cheap handles with interior mutability,
/// since event listeners bound into the tree may call back into the engine while it holds one.
pub trait HostTree {
	type Node: Clone + PartialEq + Debug + 'static;

	fn create_element(&self, tag: &str, namespace: Option<&str>, is: Option<&str>) -> Result<Self::Node, HostError>;
	fn create_text(&self, data: &str) -> Self::Node;

	/// Parses `markup` and inserts the resulting nodes before `before` (or at the end), returning them in order.
	fn insert_markup(&self, parent: &Self::Node, before: Option<&Self::Node>, markup: &str) -> Result<Vec<Self::Node>, HostError>;

	fn child_count(&self, parent: &Self::Node) -> usize;
	fn child_at(&self, parent: &Self::Node, index: usize) -> Option<Self::Node>;
	fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

	/// Moves `node` (detaching it first if necessary) before `before`, or to the end of `parent`.
	fn insert_before(&self, parent: &Self::Node, node: &Self::Node, before: Option<&Self::Node>) -> Result<(), HostError>;
	fn remove_child(&self, parent: &Self::Node, node: &Self::Node) -> Result<(), HostError>;
	fn set_text(&self, node: &Self::Node, data: &str);
	fn inspect(&self, node: &Self::Node) -> NodeInfo;

	/// Whether assigning `name` as a property is meaningful for `node` (the `name in node` check).
	fn has_property(&self, node: &Self::Node, name: &str) -> bool;
	fn property(&self, node: &Self::Node, name: &str) -> Option<Scalar>;
	fn set_property(&self, node: &Self::Node, name: &str, value: &Scalar) -> Result<(), HostError>;

	fn set_attribute(&self, node: &Self::Node, namespace: Option<&str>, name: &str, value: &str) -> Result<(), HostError>;
	fn remove_attribute(&self, node: &Self::Node, name: &str) -> Result<(), HostError>;

	/// Sets one style rule. An empty `value` clears the rule.
	fn set_style(&self, node: &Self::Node, rule: &str, value: &str);

	/// Binds (or with [`None`] unbinds) the single listener for `event` on `node`.
	fn set_listener(&self, node: &Self::Node, event: &str, listener: Option<Listener>);

	/// Called once for each element the engine discards, after it was detached.
	fn release(&self, _node: &Self::Node) {}

	/// Called at the end of each render pass.
	fn flush(&self) {}
}
