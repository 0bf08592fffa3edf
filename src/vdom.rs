//! The virtual node model.
//!
//! Trees are plain owned values, rebuilt by views on every render and compared against the
//! renderer's cache. Event handlers and config hooks compare by pointer, so reusing a handler
//! [`Rc`] across renders avoids rebinding it.

use crate::{
	component::ComponentRef,
	host::{Event, Listener, Scalar},
};
use core::{
	any::Any,
	fmt::{self, Debug, Display, Formatter},
};
use regex::Regex;
use std::{collections::BTreeMap, rc::Rc, sync::OnceLock};

/// Identity of a list item across renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
	Int(i64),
	Str(Rc<str>),
}
impl Display for Key {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Key::Int(i) => write!(f, "{}", i),
			Key::Str(s) => write!(f, "{:?}", s),
		}
	}
}
impl From<&str> for Key {
	fn from(s: &str) -> Self {
		Key::Str(s.into())
	}
}
impl From<String> for Key {
	fn from(s: String) -> Self {
		Key::Str(s.into())
	}
}
impl From<i64> for Key {
	fn from(i: i64) -> Self {
		Key::Int(i)
	}
}
impl From<i32> for Key {
	fn from(i: i32) -> Self {
		Key::Int(i.into())
	}
}
impl From<u32> for Key {
	fn from(i: u32) -> Self {
		Key::Int(i.into())
	}
}
impl From<usize> for Key {
	fn from(i: usize) -> Self {
		i64::try_from(i).map_or_else(|_| Key::Str(i.to_string().into()), Key::Int)
	}
}

/// Inline style rules, diffed rule by rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Style(BTreeMap<Rc<str>, Rc<str>>);
impl Style {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn rule(mut self, name: impl Into<Rc<str>>, value: impl Into<Rc<str>>) -> Self {
		self.0.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(|value| &**value)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(name, value)| (&**name, &**value))
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl<N: Into<Rc<str>>, V: Into<Rc<str>>> FromIterator<(N, V)> for Style {
	fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(name, value)| (name.into(), value.into())).collect())
	}
}

/// An event handler attribute value.
#[derive(Clone)]
pub struct EventHandler(Rc<dyn Fn(&Event)>);
impl EventHandler {
	pub fn new(handler: impl Fn(&Event) + 'static) -> Self {
		Self(Rc::new(handler))
	}

	/// Calls `callback` with the event target's `property` (`m.withAttr`).
	///
	/// Events whose target lacks the property are ignored.
	pub fn with_attr(property: impl Into<String>, callback: impl Fn(Scalar) + 'static) -> Self {
		let property = property.into();
		Self::new(move |event| {
			if let Some(value) = event.target_property(&property) {
				callback(value)
			}
		})
	}

	pub fn call(&self, event: &Event) {
		(self.0)(event)
	}

	pub(crate) fn listener(&self) -> Listener {
		self.0.clone()
	}
}
impl PartialEq for EventHandler {
	fn eq(&self, other: &Self) -> bool {
		Rc::as_ptr(&self.0).cast::<()>() == Rc::as_ptr(&other.0).cast::<()>()
	}
}
impl Debug for EventHandler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "EventHandler({:p})", Rc::as_ptr(&self.0).cast::<()>())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
	Str(Rc<str>),
	Number(f64),
	Bool(bool),
	Handler(EventHandler),
	Style(Style),
}
impl AttrValue {
	#[must_use]
	pub fn as_scalar(&self) -> Option<Scalar> {
		match self {
			AttrValue::Str(s) => Some(Scalar::Str(s.clone())),
			AttrValue::Number(n) => Some(Scalar::Number(*n)),
			AttrValue::Bool(b) => Some(Scalar::Bool(*b)),
			AttrValue::Handler(_) | AttrValue::Style(_) => None,
		}
	}

	/// The string form written through `set_attribute`.
	#[must_use]
	pub fn to_attribute_string(&self) -> Option<String> {
		self.as_scalar().map(|scalar| scalar.to_string())
	}
}
impl From<&str> for AttrValue {
	fn from(s: &str) -> Self {
		AttrValue::Str(s.into())
	}
}
impl From<String> for AttrValue {
	fn from(s: String) -> Self {
		AttrValue::Str(s.into())
	}
}
impl From<Rc<str>> for AttrValue {
	fn from(s: Rc<str>) -> Self {
		AttrValue::Str(s)
	}
}
impl From<bool> for AttrValue {
	fn from(b: bool) -> Self {
		AttrValue::Bool(b)
	}
}
impl From<f64> for AttrValue {
	fn from(n: f64) -> Self {
		AttrValue::Number(n)
	}
}
impl From<i32> for AttrValue {
	fn from(n: i32) -> Self {
		AttrValue::Number(n.into())
	}
}
impl From<EventHandler> for AttrValue {
	fn from(handler: EventHandler) -> Self {
		AttrValue::Handler(handler)
	}
}
impl From<Style> for AttrValue {
	fn from(style: Style) -> Self {
		AttrValue::Style(style)
	}
}
impl From<Scalar> for AttrValue {
	fn from(scalar: Scalar) -> Self {
		match scalar {
			Scalar::Str(s) => AttrValue::Str(s),
			Scalar::Number(n) => AttrValue::Number(n),
			Scalar::Bool(b) => AttrValue::Bool(b),
		}
	}
}

/// Per-element state that persists across renders and is handed to [`Config`] hooks.
#[derive(Default)]
pub struct ConfigContext {
	retain: Option<bool>,
	onunload: Option<Box<dyn FnOnce()>>,
	state: Option<Box<dyn Any>>,
}
impl ConfigContext {
	/// Overrides whether the redraw strategy may recreate this element.
	///
	/// `Some(true)` keeps it through full redraws, `Some(false)` recreates it even on diff redraws.
	pub fn set_retain(&mut self, retain: Option<bool>) {
		self.retain = retain;
	}

	#[must_use]
	pub fn retain(&self) -> Option<bool> {
		self.retain
	}

	/// Runs `onunload` once when the element is discarded.
	pub fn on_unload(&mut self, onunload: impl FnOnce() + 'static) {
		self.onunload = Some(Box::new(onunload));
	}

	pub(crate) fn take_onunload(&mut self) -> Option<Box<dyn FnOnce()>> {
		self.onunload.take()
	}

	pub fn state<T: 'static>(&mut self) -> Option<&mut T> {
		self.state.as_mut().and_then(|state| state.downcast_mut())
	}

	pub fn set_state<T: 'static>(&mut self, state: T) {
		self.state = Some(Box::new(state));
	}
}
impl Debug for ConfigContext {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConfigContext")
			.field("retain", &self.retain)
			.field("onunload", &self.onunload.is_some())
			.field("state", &self.state.is_some())
			.finish()
	}
}

/// A post-mutation hook, called as `(host node, initialized, context)` after the pass finishes.
///
/// The host node is passed as [`Any`] and downcasts to the host's `Node` type.
#[derive(Clone)]
pub struct Config(Rc<dyn Fn(&dyn Any, bool, &mut ConfigContext)>);
impl Config {
	pub fn new(hook: impl Fn(&dyn Any, bool, &mut ConfigContext) + 'static) -> Self {
		Self(Rc::new(hook))
	}

	pub fn call(&self, node: &dyn Any, initialized: bool, context: &mut ConfigContext) {
		(self.0)(node, initialized, context)
	}
}
impl PartialEq for Config {
	fn eq(&self, other: &Self) -> bool {
		Rc::as_ptr(&self.0).cast::<()>() == Rc::as_ptr(&other.0).cast::<()>()
	}
}
impl Debug for Config {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "Config({:p})", Rc::as_ptr(&self.0).cast::<()>())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
	pub tag: Rc<str>,
	pub attrs: BTreeMap<Rc<str>, AttrValue>,
	pub key: Option<Key>,
	pub config: Option<Config>,
	pub children: Vec<Node>,
}
impl Element {
	#[must_use]
	pub fn new(tag: impl Into<Rc<str>>) -> Self {
		Self {
			tag: tag.into(),
			attrs: BTreeMap::new(),
			key: None,
			config: None,
			children: Vec::new(),
		}
	}

	/// Parses a `tag#id.class[name=value][flag]` selector. The tag defaults to `div`.
	#[must_use]
	pub fn parse(selector: &str) -> Self {
		static PARSER: OnceLock<Option<Regex>> = OnceLock::new();
		let mut element = Self::new("div");
		let parser = match PARSER.get_or_init(|| Regex::new(r"(?:(^|#|\.)([^#.\[\]]+))|(\[.+?\])").ok()) {
			Some(parser) => parser,
			None => return element,
		};

		for captures in parser.captures_iter(selector) {
			match (captures.get(1).map(|m| m.as_str()), captures.get(2), captures.get(3)) {
				(Some(""), Some(tag), _) => element.tag = tag.as_str().into(),
				(Some("#"), Some(id), _) => {
					element.attrs.insert("id".into(), id.as_str().into());
				}
				(Some("."), Some(class), _) => element = element.class(class.as_str()),
				(_, _, Some(bracket)) => {
					let (name, value) = parse_bracket(bracket.as_str());
					element = element.attr(name, value);
				}
				_ => (),
			}
		}
		element
	}

	/// Sets an attribute. `key` sets the [`Key`] instead, `class` and `className` merge with selector classes.
	#[must_use]
	pub fn attr(mut self, name: impl Into<Rc<str>>, value: impl Into<AttrValue>) -> Self {
		let name = name.into();
		let value = value.into();
		match (&*name, value) {
			("key", AttrValue::Str(key)) => self.key = Some(Key::Str(key)),
			#[allow(clippy::cast_possible_truncation)]
			("key", AttrValue::Number(key)) => self.key = Some(Key::Int(key as i64)),
			("class" | "className", AttrValue::Str(class)) => return self.class(&*class),
			(_, value) => {
				self.attrs.insert(name.clone(), value);
			}
		}
		self
	}

	/// Appends `class` to the class list.
	#[must_use]
	pub fn class(mut self, class: &str) -> Self {
		let merged = match self.attrs.get("class") {
			Some(AttrValue::Str(existing)) if !existing.is_empty() => format!("{} {}", existing, class),
			_ => class.to_owned(),
		};
		self.attrs.insert("class".into(), merged.into());
		self
	}

	/// Binds `handler` to `event` (without the `on` prefix).
	#[must_use]
	pub fn on(self, event: &str, handler: impl Fn(&Event) + 'static) -> Self {
		self.listen(event, EventHandler::new(handler))
	}

	#[must_use]
	pub fn listen(mut self, event: &str, handler: EventHandler) -> Self {
		self.attrs.insert(format!("on{}", event).into(), AttrValue::Handler(handler));
		self
	}

	#[must_use]
	pub fn style(mut self, style: Style) -> Self {
		self.attrs.insert("style".into(), AttrValue::Style(style));
		self
	}

	#[must_use]
	pub fn key(mut self, key: impl Into<Key>) -> Self {
		self.key = Some(key.into());
		self
	}

	#[must_use]
	pub fn config(mut self, hook: impl Fn(&dyn Any, bool, &mut ConfigContext) + 'static) -> Self {
		self.config = Some(Config::new(hook));
		self
	}

	#[must_use]
	pub fn child(mut self, child: impl Into<Node>) -> Self {
		self.children.push(child.into());
		self
	}

	#[must_use]
	pub fn children<I>(mut self, children: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<Node>,
	{
		self.children.extend(children.into_iter().map(Into::into));
		self
	}

	#[must_use]
	pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
		self.attrs.get(name)
	}
}

fn parse_bracket(bracket: &str) -> (&str, AttrValue) {
	let inner = bracket.trim_start_matches('[').trim_end_matches(']');
	match inner.split_once('=') {
		None => (inner, AttrValue::Bool(true)),
		Some((name, value)) => {
			let quoted = value.len() >= 2 && (value.starts_with('"') && value.ends_with('"') || value.starts_with('\'') && value.ends_with('\''));
			let unquoted = if quoted { &value[1..value.len() - 1] } else { value };
			if unquoted.is_empty() && !quoted {
				(name, AttrValue::Bool(true))
			} else {
				(name, unquoted.into())
			}
		}
	}
}

/// Hyperscript entry point: `h("a.button[href=/plugins]")`.
#[must_use]
pub fn h(selector: &str) -> Element {
	Element::parse(selector)
}

/// Marks `markup` to be injected as raw markup rather than escaped text.
pub fn trust(markup: impl Into<Rc<str>>) -> Node {
	Node::Trusted(markup.into())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Element(Element),
	Text(Rc<str>),
	Trusted(Rc<str>),
	/// Nested lists are flattened before diffing.
	List(Vec<Node>),
	Component(ComponentRef),
	/// Keeps whatever is currently rendered in this slot.
	Retain,
}

/// The shape a [`Node`] is cached as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Element,
	Text,
	List,
}

impl Node {
	#[must_use]
	pub fn empty() -> Self {
		Node::Text("".into())
	}

	/// [`None`] for [`Node::Retain`].
	#[must_use]
	pub fn kind(&self) -> Option<NodeKind> {
		match self {
			Node::Element(_) | Node::Component(_) => Some(NodeKind::Element),
			Node::Text(_) | Node::Trusted(_) => Some(NodeKind::Text),
			Node::List(_) => Some(NodeKind::List),
			Node::Retain => None,
		}
	}

	#[must_use]
	pub fn key(&self) -> Option<&Key> {
		match self {
			Node::Element(element) => element.key.as_ref(),
			Node::Component(component) => component.key_ref(),
			Node::Text(_) | Node::Trusted(_) | Node::List(_) | Node::Retain => None,
		}
	}

	#[must_use]
	pub fn describe(&self) -> &'static str {
		match self {
			Node::Element(_) => "an element",
			Node::Text(_) => "text",
			Node::Trusted(_) => "trusted markup",
			Node::List(_) => "a list",
			Node::Component(_) => "a component",
			Node::Retain => "a retain marker",
		}
	}
}

impl From<Element> for Node {
	fn from(element: Element) -> Self {
		Node::Element(element)
	}
}
impl From<ComponentRef> for Node {
	fn from(component: ComponentRef) -> Self {
		Node::Component(component)
	}
}
impl From<&str> for Node {
	fn from(text: &str) -> Self {
		Node::Text(text.into())
	}
}
impl From<String> for Node {
	fn from(text: String) -> Self {
		Node::Text(text.into())
	}
}
impl From<Rc<str>> for Node {
	fn from(text: Rc<str>) -> Self {
		Node::Text(text)
	}
}
macro_rules! text_from_display {
	($($ty:ty),*) => {$(
		impl From<$ty> for Node {
			fn from(value: $ty) -> Self {
				Node::Text(value.to_string().into())
			}
		}
	)*};
}
text_from_display!(i32, i64, u32, u64, usize, f64, bool);
impl<T: Into<Node>> From<Option<T>> for Node {
	fn from(node: Option<T>) -> Self {
		node.map_or_else(Node::empty, Into::into)
	}
}
impl<T: Into<Node>> From<Vec<T>> for Node {
	fn from(nodes: Vec<T>) -> Self {
		Node::List(nodes.into_iter().map(Into::into).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selector_parsing() {
		let element = h("a#home.nav.active[href=/plugins][data-x='y z'][hidden]");
		assert_eq!(&*element.tag, "a");
		assert_eq!(element.attribute("id"), Some(&AttrValue::from("home")));
		assert_eq!(element.attribute("class"), Some(&AttrValue::from("nav active")));
		assert_eq!(element.attribute("href"), Some(&AttrValue::from("/plugins")));
		assert_eq!(element.attribute("data-x"), Some(&AttrValue::from("y z")));
		assert_eq!(element.attribute("hidden"), Some(&AttrValue::Bool(true)));
	}

	#[test]
	fn default_tag_and_class_merge() {
		let element = h(".card").attr("class", "wide").attr("key", 7);
		assert_eq!(&*element.tag, "div");
		assert_eq!(element.attribute("class"), Some(&AttrValue::from("card wide")));
		assert_eq!(element.key, Some(Key::Int(7)));
		assert!(element.attribute("key").is_none());
	}

	#[test]
	fn empty_quoted_value() {
		let element = h("input[value='']");
		assert_eq!(element.attribute("value"), Some(&AttrValue::from("")));
	}

	#[test]
	fn normalization() {
		assert_eq!(Node::from(None::<&str>), Node::empty());
		assert_eq!(Node::from(3), Node::Text("3".into()));
		assert_eq!(Node::from(true), Node::Text("true".into()));
		assert_eq!(Node::from(vec!["a", "b"]).kind(), Some(NodeKind::List));
		assert_eq!(trust("<b>x</b>").kind(), Some(NodeKind::Text));
		assert_eq!(Node::Retain.kind(), None);
	}
}
