//! An in-memory [`HostTree`] with a mutation log.
//!
//! Good enough to render, dispatch events and serialize, and used throughout the test suite to
//! count exactly which host operations a render pass performed.

use crate::host::{Event, EventTarget, HostError, HostTree, Listener, NodeInfo, Scalar};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter, Write as _},
};
use std::{collections::BTreeMap, rc::Rc};
use tracing::trace;

/// Names for which [`HostTree::has_property`] holds on elements.
const PROPERTIES: &[&str] = &[
	"value", "checked", "selected", "disabled", "className", "id", "title", "href", "hidden", "tabIndex", "type", "style", "list", "form", "width", "height",
];

/// Properties mirrored into an attribute when assigned.
const REFLECTED: &[(&str, &str)] = &[("id", "id"), ("title", "title"), ("href", "href"), ("className", "class")];

const VOID: &[&str] = &[
	"area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link", "meta", "param", "source", "track", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// One recorded host operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
	CreateElement { node: NodeId, tag: String },
	CreateText { node: NodeId },
	InsertMarkup { parent: NodeId },
	Insert { parent: NodeId, node: NodeId, index: usize },
	Remove { parent: NodeId, node: NodeId },
	SetText { node: NodeId },
	SetProperty { node: NodeId, name: String },
	SetAttribute { node: NodeId, name: String },
	RemoveAttribute { node: NodeId, name: String },
	SetStyle { node: NodeId, rule: String },
	SetListener { node: NodeId, event: String, bound: bool },
}

enum Data {
	Element {
		tag: String,
		namespace: Option<String>,
		attributes: BTreeMap<String, String>,
		properties: BTreeMap<String, Scalar>,
		style: BTreeMap<String, String>,
		listeners: BTreeMap<String, Listener>,
	},
	Text(String),
	Markup(String),
}

struct Entry {
	data: Data,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

#[derive(Default)]
struct Tree {
	nodes: Vec<Entry>,
	log: Vec<Mutation>,
	released: usize,
}
impl Tree {
	fn push(&mut self, data: Data) -> NodeId {
		self.nodes.push(Entry {
			data,
			parent: None,
			children: Vec::new(),
		});
		NodeId(self.nodes.len() - 1)
	}

	fn entry(&self, node: NodeId) -> Result<&Entry, HostError> {
		self.nodes.get(node.0).ok_or(HostError::NotFound)
	}

	fn entry_mut(&mut self, node: NodeId) -> Result<&mut Entry, HostError> {
		self.nodes.get_mut(node.0).ok_or(HostError::NotFound)
	}

	fn unlink(&mut self, node: NodeId) {
		if let Some(parent) = self.nodes.get_mut(node.0).and_then(|entry| entry.parent.take()) {
			if let Some(parent) = self.nodes.get_mut(parent.0) {
				parent.children.retain(|&child| child != node)
			}
		}
	}

	fn is_ancestor(&self, candidate: NodeId, mut of: NodeId) -> bool {
		loop {
			if candidate == of {
				return true;
			}
			match self.nodes.get(of.0).and_then(|entry| entry.parent) {
				Some(parent) => of = parent,
				None => return false,
			}
		}
	}
}

/// A shared handle to an in-memory document.
#[derive(Clone, Default)]
pub struct MemoryDocument(Rc<RefCell<Tree>>);
impl Debug for MemoryDocument {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let tree = self.0.borrow();
		f.debug_struct("MemoryDocument")
			.field("nodes", &tree.nodes.len())
			.field("mutations", &tree.log.len())
			.finish()
	}
}

impl MemoryDocument {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a detached element to render into. Not logged.
	pub fn create_root(&self, tag: &str) -> NodeId {
		self.0.borrow_mut().push(element_data(tag, None))
	}

	#[must_use]
	pub fn mutations(&self) -> Vec<Mutation> {
		self.0.borrow().log.clone()
	}

	#[must_use]
	pub fn mutation_count(&self) -> usize {
		self.0.borrow().log.len()
	}

	pub fn clear_mutations(&self) {
		self.0.borrow_mut().log.clear()
	}

	/// How many elements the renderer released so far.
	#[must_use]
	pub fn released(&self) -> usize {
		self.0.borrow().released
	}

	#[must_use]
	pub fn children(&self, node: NodeId) -> Vec<NodeId> {
		self.0.borrow().entry(node).map(|entry| entry.children.clone()).unwrap_or_default()
	}

	#[must_use]
	pub fn tag(&self, node: NodeId) -> Option<String> {
		match &self.0.borrow().entry(node).ok()?.data {
			Data::Element { tag, .. } => Some(tag.clone()),
			Data::Text(_) | Data::Markup(_) => None,
		}
	}

	#[must_use]
	pub fn namespace(&self, node: NodeId) -> Option<String> {
		match &self.0.borrow().entry(node).ok()?.data {
			Data::Element { namespace, .. } => namespace.clone(),
			Data::Text(_) | Data::Markup(_) => None,
		}
	}

	/// Text content of a text node, or the concatenated text of an element's subtree.
	#[must_use]
	pub fn text(&self, node: NodeId) -> String {
		let tree = self.0.borrow();
		let mut text = String::new();
		collect_text(&tree, node, &mut text);
		text
	}

	#[must_use]
	pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
		match &self.0.borrow().entry(node).ok()?.data {
			Data::Element { attributes, .. } => attributes.get(name).cloned(),
			Data::Text(_) | Data::Markup(_) => None,
		}
	}

	#[must_use]
	pub fn style(&self, node: NodeId, rule: &str) -> Option<String> {
		match &self.0.borrow().entry(node).ok()?.data {
			Data::Element { style, .. } => style.get(rule).cloned(),
			Data::Text(_) | Data::Markup(_) => None,
		}
	}

	#[must_use]
	pub fn listener_count(&self, node: NodeId) -> usize {
		match self.0.borrow().entry(node).map(|entry| &entry.data) {
			Ok(Data::Element { listeners, .. }) => listeners.len(),
			_ => 0,
		}
	}

	/// Simulates user input by writing a property without logging it.
	pub fn set_value(&self, node: NodeId, value: impl Into<Scalar>) {
		if let Ok(Entry {
			data: Data::Element { properties, .. }, ..
		}) = self.0.borrow_mut().entry_mut(node)
		{
			properties.insert("value".to_owned(), value.into());
		}
	}

	/// Dispatches an event named `name` at `node`, targeting it.
	///
	/// Returns the event if a listener handled it.
	pub fn dispatch(&self, node: NodeId, name: &str) -> Option<Event> {
		let event = Event::new(name).with_target(Rc::new(Target {
			document: self.clone(),
			node,
		}));
		self.dispatch_event(node, &event).then(|| event)
	}

	/// Calls the listener bound for `event` on `node`, if any.
	pub fn dispatch_event(&self, node: NodeId, event: &Event) -> bool {
		let listener = match self.0.borrow().entry(node).map(|entry| &entry.data) {
			Ok(Data::Element { listeners, .. }) => listeners.get(event.name()).cloned(),
			_ => None,
		};
		match listener {
			Some(listener) => {
				trace!(?node, event = event.name(), "Dispatching.");
				listener(event);
				true
			}
			None => false,
		}
	}

	/// Serializes `node`'s children.
	#[must_use]
	pub fn inner_html(&self, node: NodeId) -> String {
		let tree = self.0.borrow();
		let mut html = String::new();
		if let Ok(entry) = tree.entry(node) {
			for &child in &entry.children {
				serialize(&tree, child, &mut html)
			}
		}
		html
	}

	#[must_use]
	pub fn outer_html(&self, node: NodeId) -> String {
		let mut html = String::new();
		serialize(&self.0.borrow(), node, &mut html);
		html
	}

	/// Removes `node` from its parent behind the renderer's back. Not logged.
	pub fn detach(&self, node: NodeId) {
		self.0.borrow_mut().unlink(node)
	}

	fn log(&self, mutation: Mutation) {
		self.0.borrow_mut().log.push(mutation)
	}

	fn with_element<R>(&self, node: NodeId, f: impl FnOnce(&mut BTreeMap<String, String>, &mut BTreeMap<String, Scalar>, &mut BTreeMap<String, String>, &mut BTreeMap<String, Listener>) -> R) -> Result<R, HostError> {
		match &mut self.0.borrow_mut().entry_mut(node)?.data {
			Data::Element {
				attributes,
				properties,
				style,
				listeners,
				..
			} => Ok(f(attributes, properties, style, listeners)),
			Data::Text(_) | Data::Markup(_) => Err(HostError::InvalidArgument(format!("{:?} is not an element", node))),
		}
	}
}

fn element_data(tag: &str, namespace: Option<&str>) -> Data {
	Data::Element {
		tag: tag.to_owned(),
		namespace: namespace.map(ToOwned::to_owned),
		attributes: BTreeMap::new(),
		properties: BTreeMap::new(),
		style: BTreeMap::new(),
		listeners: BTreeMap::new(),
	}
}

fn collect_text(tree: &Tree, node: NodeId, text: &mut String) {
	if let Ok(entry) = tree.entry(node) {
		match &entry.data {
			Data::Text(data) | Data::Markup(data) => text.push_str(data),
			Data::Element { .. } => {
				for &child in &entry.children {
					collect_text(tree, child, text)
				}
			}
		}
	}
}

fn escape(text: &str, out: &mut String) {
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			c => out.push(c),
		}
	}
}

fn serialize(tree: &Tree, node: NodeId, out: &mut String) {
	let entry = match tree.entry(node) {
		Ok(entry) => entry,
		Err(_) => return,
	};
	match &entry.data {
		Data::Text(text) => escape(text, out),
		Data::Markup(markup) => out.push_str(markup),
		Data::Element { tag, attributes, style, .. } => {
			out.push('<');
			out.push_str(tag);
			for (name, value) in attributes {
				let _ = write!(out, " {}=\"", name);
				escape(value, out);
				out.push('"');
			}
			if !style.is_empty() && !attributes.contains_key("style") {
				out.push_str(" style=\"");
				let rules: Vec<String> = style.iter().map(|(rule, value)| format!("{}: {}", rule, value)).collect();
				escape(&rules.join("; "), out);
				out.push('"');
			}
			out.push('>');
			if VOID.contains(&tag.as_str()) {
				return;
			}
			for &child in &entry.children {
				serialize(tree, child, out)
			}
			let _ = write!(out, "</{}>", tag);
		}
	}
}

struct Target {
	document: MemoryDocument,
	node: NodeId,
}
impl EventTarget for Target {
	fn property(&self, name: &str) -> Option<Scalar> {
		self.document.property(&self.node, name)
	}
}

impl HostTree for MemoryDocument {
	type Node = NodeId;

	fn create_element(&self, tag: &str, namespace: Option<&str>, _is: Option<&str>) -> Result<NodeId, HostError> {
		if tag.is_empty() || tag.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
			return Err(HostError::InvalidArgument(format!("invalid tag name {:?}", tag)));
		}
		let node = self.0.borrow_mut().push(element_data(tag, namespace));
		self.log(Mutation::CreateElement { node, tag: tag.to_owned() });
		Ok(node)
	}

	fn create_text(&self, data: &str) -> NodeId {
		let node = self.0.borrow_mut().push(Data::Text(data.to_owned()));
		self.log(Mutation::CreateText { node });
		node
	}

	fn insert_markup(&self, parent: &NodeId, before: Option<&NodeId>, markup: &str) -> Result<Vec<NodeId>, HostError> {
		let node = self.0.borrow_mut().push(Data::Markup(markup.to_owned()));
		self.insert_before(parent, &node, before)?;
		self.log(Mutation::InsertMarkup { parent: *parent });
		Ok(vec![node])
	}

	fn child_count(&self, parent: &NodeId) -> usize {
		self.0.borrow().entry(*parent).map_or(0, |entry| entry.children.len())
	}

	fn child_at(&self, parent: &NodeId, index: usize) -> Option<NodeId> {
		self.0.borrow().entry(*parent).ok()?.children.get(index).copied()
	}

	fn parent(&self, node: &NodeId) -> Option<NodeId> {
		self.0.borrow().entry(*node).ok()?.parent
	}

	fn insert_before(&self, parent: &NodeId, node: &NodeId, before: Option<&NodeId>) -> Result<(), HostError> {
		if before == Some(node) {
			return Ok(());
		}
		let index = {
			let mut tree = self.0.borrow_mut();
			if !matches!(tree.entry(*parent)?.data, Data::Element { .. }) {
				return Err(HostError::InvalidArgument("parent is not an element".to_owned()));
			}
			tree.entry(*node)?;
			if tree.is_ancestor(*node, *parent) {
				return Err(HostError::InvalidArgument("insertion would create a cycle".to_owned()));
			}
			if let Some(before) = before {
				if tree.entry(*before)?.parent != Some(*parent) {
					return Err(HostError::NotFound);
				}
			}

			tree.unlink(*node);
			let entry = tree.entry_mut(*parent)?;
			let index = match before {
				Some(before) => entry.children.iter().position(|child| child == before).ok_or(HostError::NotFound)?,
				None => entry.children.len(),
			};
			entry.children.insert(index, *node);
			tree.entry_mut(*node)?.parent = Some(*parent);
			index
		};
		self.log(Mutation::Insert {
			parent: *parent,
			node: *node,
			index,
		});
		Ok(())
	}

	fn remove_child(&self, parent: &NodeId, node: &NodeId) -> Result<(), HostError> {
		{
			let mut tree = self.0.borrow_mut();
			if tree.entry(*node)?.parent != Some(*parent) {
				return Err(HostError::NotFound);
			}
			tree.unlink(*node);
		}
		self.log(Mutation::Remove { parent: *parent, node: *node });
		Ok(())
	}

	fn set_text(&self, node: &NodeId, data: &str) {
		if let Ok(Entry { data: Data::Text(text), .. }) = self.0.borrow_mut().entry_mut(*node) {
			*text = data.to_owned();
		}
		self.log(Mutation::SetText { node: *node })
	}

	fn inspect(&self, node: &NodeId) -> NodeInfo {
		match self.0.borrow().entry(*node).map(|entry| &entry.data) {
			Ok(Data::Element { tag, attributes, .. }) => NodeInfo::Element {
				tag: tag.clone(),
				attributes: attributes.iter().map(|(name, value)| (name.clone(), value.clone())).collect(),
			},
			Ok(Data::Text(text)) => NodeInfo::Text(text.clone()),
			Ok(Data::Markup(_)) | Err(_) => NodeInfo::Other,
		}
	}

	fn has_property(&self, node: &NodeId, name: &str) -> bool {
		matches!(self.0.borrow().entry(*node).map(|entry| &entry.data), Ok(Data::Element { .. })) && PROPERTIES.contains(&name)
	}

	fn property(&self, node: &NodeId, name: &str) -> Option<Scalar> {
		match &self.0.borrow().entry(*node).ok()?.data {
			Data::Element { attributes, properties, .. } => properties.get(name).cloned().or_else(|| {
				REFLECTED
					.iter()
					.find(|(property, _)| *property == name)
					.and_then(|(_, attribute)| attributes.get(*attribute))
					.map(|value| Scalar::Str(value.as_str().into()))
			}),
			Data::Text(_) | Data::Markup(_) => None,
		}
	}

	fn set_property(&self, node: &NodeId, name: &str, value: &Scalar) -> Result<(), HostError> {
		if !self.has_property(node, name) {
			return Err(HostError::Rejected(format!("no property {:?}", name)));
		}
		self.with_element(*node, |attributes, properties, _, _| {
			properties.insert(name.to_owned(), value.clone());
			if let Some((_, attribute)) = REFLECTED.iter().find(|(property, _)| *property == name) {
				attributes.insert((*attribute).to_owned(), value.to_string());
			}
		})?;
		self.log(Mutation::SetProperty {
			node: *node,
			name: name.to_owned(),
		});
		Ok(())
	}

	fn set_attribute(&self, node: &NodeId, namespace: Option<&str>, name: &str, value: &str) -> Result<(), HostError> {
		if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '"' || c == '=') {
			return Err(HostError::InvalidArgument(format!("invalid attribute name {:?}", name)));
		}
		let qualified = match namespace {
			Some(crate::host::XLINK_NAMESPACE) => format!("xlink:{}", name),
			_ => name.to_owned(),
		};
		self.with_element(*node, |attributes, _, _, _| {
			attributes.insert(qualified, value.to_owned());
		})?;
		self.log(Mutation::SetAttribute {
			node: *node,
			name: name.to_owned(),
		});
		Ok(())
	}

	fn remove_attribute(&self, node: &NodeId, name: &str) -> Result<(), HostError> {
		self.with_element(*node, |attributes, _, _, _| {
			attributes.remove(name);
		})?;
		self.log(Mutation::RemoveAttribute {
			node: *node,
			name: name.to_owned(),
		});
		Ok(())
	}

	fn set_style(&self, node: &NodeId, rule: &str, value: &str) {
		let applied = self.with_element(*node, |_, _, style, _| {
			if value.is_empty() {
				style.remove(rule);
			} else {
				style.insert(rule.to_owned(), value.to_owned());
			}
		});
		if applied.is_ok() {
			self.log(Mutation::SetStyle {
				node: *node,
				rule: rule.to_owned(),
			})
		}
	}

	fn set_listener(&self, node: &NodeId, event: &str, listener: Option<Listener>) {
		let bound = listener.is_some();
		let applied = self.with_element(*node, |_, _, _, listeners| match listener {
			Some(listener) => {
				listeners.insert(event.to_owned(), listener);
			}
			None => {
				listeners.remove(event);
			}
		});
		if applied.is_ok() {
			self.log(Mutation::SetListener {
				node: *node,
				event: event.to_owned(),
				bound,
			})
		}
	}

	fn release(&self, node: &NodeId) {
		let mut tree = self.0.borrow_mut();
		tree.released += 1;
		if let Ok(Entry {
			data: Data::Element { listeners, .. }, ..
		}) = tree.entry_mut(*node)
		{
			listeners.clear()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insertion_moves_and_rejects_cycles() {
		let document = MemoryDocument::new();
		let root = document.create_root("div");
		let a = document.create_element("p", None, None).unwrap();
		let b = document.create_text("b");
		document.insert_before(&root, &a, None).unwrap();
		document.insert_before(&root, &b, Some(&a)).unwrap();
		assert_eq!(document.children(root), vec![b, a]);
		document.insert_before(&root, &b, None).unwrap();
		assert_eq!(document.children(root), vec![a, b]);
		assert!(document.insert_before(&a, &root, None).is_err());
		assert_eq!(document.inner_html(root), "<p></p>b");
	}

	#[test]
	fn reflected_properties_show_up_as_attributes() {
		let document = MemoryDocument::new();
		let input = document.create_element("input", None, None).unwrap();
		document.set_property(&input, "className", &"wide".into()).unwrap();
		document.set_property(&input, "value", &"typed".into()).unwrap();
		assert_eq!(document.attribute(input, "class").as_deref(), Some("wide"));
		assert_eq!(document.attribute(input, "value"), None);
		assert_eq!(document.property(&input, "value"), Some("typed".into()));
		assert!(document.set_property(&input, "onclick", &"x".into()).is_err());
	}

	#[test]
	fn void_elements_serialize_without_closing_tag() {
		let document = MemoryDocument::new();
		let root = document.create_root("div");
		let br = document.create_element("br", None, None).unwrap();
		let text = document.create_text("<&>");
		document.insert_before(&root, &br, None).unwrap();
		document.insert_before(&root, &text, None).unwrap();
		assert_eq!(document.inner_html(root), "<br>&lt;&amp;&gt;");
	}
}
