//! The reconciliation engine.
//!
//! [`Renderer`] walks a new [`Node`] tree against its cache, mutating the host tree in place.
//! Insertion positions are always derived from cached node lists, never from live traversal,
//! and every host node the cache references is one the engine created.

use crate::{
	cache::{Arena, CacheId, Cached, CachedKind},
	component::{ComponentId, Controller, UnloadEvent},
	error::RenderError,
	host::{HostTree, Listener, Scalar, MATHML_NAMESPACE, SVG_NAMESPACE, XLINK_NAMESPACE},
	scheduler::{Scheduler, Strategy},
	vdom::{AttrValue, Config, ConfigContext, Element, EventHandler, Key, Node, NodeKind, Style},
};
use core::cell::RefCell;
use hashbrown::{hash_map::Entry, HashMap, HashSet};
use std::{
	collections::BTreeMap,
	rc::{Rc, Weak},
};
use tracing::{debug, error, instrument, level_filters::STATIC_MAX_LEVEL, trace, trace_span, warn, Level};

const VOID_ELEMENTS: &[&str] = &[
	"area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link", "meta", "param", "source", "track", "wbr",
];

/// Always written with `set_attribute`, since their properties diverge from the attribute.
const SET_ATTRIBUTE_NAMES: &[&str] = &["list", "style", "form", "type", "width", "height"];

/// Keyed list actions of the last pass.
///
/// A move counts every key found at a different index than before, while a relocation counts
/// the host insertions actually needed to restore order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
	pub deletions: usize,
	pub insertions: usize,
	pub moves: usize,
	pub relocations: usize,
}

/// Scheduler state sampled once per pass.
#[derive(Clone)]
pub(crate) struct PassContext {
	pub strategy: Strategy,
	/// Requests are pending and the pass was not forced.
	pub suspended: bool,
	pub scheduler: Option<Weak<Scheduler>>,
}
impl Default for PassContext {
	fn default() -> Self {
		Self {
			strategy: Strategy::Diff,
			suspended: false,
			scheduler: None,
		}
	}
}

struct PendingConfig<N> {
	config: Config,
	node: N,
	initialized: bool,
	context: Rc<RefCell<ConfigContext>>,
}

struct Pass<N> {
	context: PassContext,
	configs: Vec<PendingConfig<N>>,
	controllers: Vec<Controller>,
	stats: DiffStats,
}

/// Work left over once the host tree has been mutated.
pub(crate) struct PassOutput<N> {
	configs: Vec<PendingConfig<N>>,
	controllers: Vec<Controller>,
}
impl<N> Default for PassOutput<N> {
	fn default() -> Self {
		Self {
			configs: Vec::new(),
			controllers: Vec::new(),
		}
	}
}
impl<N: 'static> PassOutput<N> {
	/// Runs the collected config hooks and returns the controllers that carry unload hooks.
	pub(crate) fn finish(self) -> Vec<Controller> {
		for PendingConfig { config, node, initialized, context } in self.configs {
			let span = trace_span!("config", initialized);
			let _enter = span.enter();
			config.call(&node, initialized, &mut context.borrow_mut());
		}
		self.controllers
	}
}

/// A build that stopped on a configuration error.
///
/// `salvaged` is the cache entry that still describes the live host nodes of the failed slot, if any.
struct Failed {
	salvaged: Option<CacheId>,
	error: RenderError,
}
impl From<RenderError> for Failed {
	fn from(error: RenderError) -> Self {
		Self { salvaged: None, error }
	}
}

type Built = Result<Option<CacheId>, Failed>;

#[derive(Clone)]
struct Place<N> {
	parent: N,
	parent_tag: Option<Rc<str>>,
	namespace: Option<Rc<str>>,
}

#[derive(Debug, Clone, Copy)]
enum Action {
	Delete { index: usize, id: CacheId },
	Insert { index: usize },
	Move { index: usize, from: usize },
}
impl Action {
	fn order(&self) -> (u8, usize) {
		match *self {
			Action::Delete { index, .. } => (0, index),
			Action::Insert { index } => (1, index),
			Action::Move { index, .. } => (2, index),
		}
	}
}

/// Renders [`Node`] trees into one or more roots of a host document.
pub struct Renderer<H: HostTree> {
	host: H,
	arena: Arena<H::Node>,
	roots: Vec<(H::Node, Option<CacheId>)>,
	stats: DiffStats,
}
impl<H: HostTree> Renderer<H> {
	#[must_use]
	pub fn new(host: H) -> Self {
		Self {
			host,
			arena: Arena::default(),
			roots: Vec::new(),
			stats: DiffStats::default(),
		}
	}

	pub fn host(&self) -> &H {
		&self.host
	}

	#[must_use]
	pub fn last_stats(&self) -> DiffStats {
		self.stats
	}

	/// Number of live cache entries across all roots.
	#[must_use]
	pub fn cached_entries(&self) -> usize {
		self.arena.len()
	}

	/// Renders `tree` into `root`.
	///
	/// The first render on a root clears its existing content.
	/// `force_recreate` discards the root's cache so everything is rebuilt.
	///
	/// # Errors
	///
	/// Iff `root` is [`None`] or the tree contains a configuration error.
	#[instrument(skip_all, fields(force_recreate = force_recreate))]
	pub fn render(&mut self, root: Option<&H::Node>, tree: impl Into<Node>, force_recreate: bool) -> Result<(), RenderError> {
		let (output, result) = self.render_pass(root, tree.into(), force_recreate, PassContext::default());
		output.finish();
		result
	}

	/// Discards everything rendered into `root` and forgets it.
	#[instrument(skip_all)]
	pub fn reset(&mut self, root: &H::Node) {
		if let Some(slot) = self.roots.iter().position(|(known, _)| known == root) {
			let (root, cached) = self.roots.remove(slot);
			if let Some(id) = cached {
				self.discard(id)
			}
			self.clear_host_children(&root);
		}
		self.host.flush();
	}

	/// Reconciles one root.
	///
	/// The output is returned even when the pass fails, since whatever was built before the error is live.
	pub(crate) fn render_pass(&mut self, root: Option<&H::Node>, tree: Node, force_recreate: bool, context: PassContext) -> (PassOutput<H::Node>, Result<(), RenderError>) {
		let root = match root {
			Some(root) => root.clone(),
			None => return (PassOutput::default(), Err(RenderError::MissingRoot)),
		};
		let slot = match self.roots.iter().position(|(known, _)| *known == root) {
			Some(slot) => slot,
			None => {
				trace!("First render into this root; clearing its content.");
				self.clear_host_children(&root);
				self.roots.push((root.clone(), None));
				self.roots.len() - 1
			}
		};
		if force_recreate {
			if let Some(id) = self.roots[slot].1.take() {
				self.discard(id)
			}
			self.clear_host_children(&root);
		}

		let mut pass = Pass {
			context,
			configs: Vec::new(),
			controllers: Vec::new(),
			stats: DiffStats::default(),
		};
		let place = Place {
			parent: root,
			parent_tag: None,
			namespace: None,
		};
		let cached = self.roots[slot].1;
		let built = self.build(&mut pass, &place, tree, cached, 0);
		self.stats = pass.stats;
		let result = match built {
			Ok(built) => {
				self.roots[slot].1 = built;
				Ok(())
			}
			Err(Failed { salvaged, error }) => {
				self.roots[slot].1 = self.alive(salvaged);
				Err(error)
			}
		};
		self.host.flush();

		if STATIC_MAX_LEVEL >= Level::TRACE {
			trace!("Pass done: {:?}, {} cache entries.", pass.stats, self.arena.len());
		}
		let output = PassOutput {
			configs: pass.configs,
			controllers: pass.controllers,
		};
		(output, result)
	}

	fn alive(&self, id: Option<CacheId>) -> Option<CacheId> {
		id.filter(|&id| self.arena.get(id).is_some())
	}

	fn build(&mut self, pass: &mut Pass<H::Node>, place: &Place<H::Node>, data: Node, cached: Option<CacheId>, index: usize) -> Built {
		let kind = match data.kind() {
			Some(kind) => kind,
			None => return Ok(cached),
		};
		let cached = self.same_kind(cached, kind);

		match data {
			Node::List(items) => self.build_list(pass, place, items, cached, index).map(Some),
			Node::Text(text) => Ok(Some(self.build_text(place, text, false, cached, index))),
			Node::Trusted(markup) => Ok(Some(self.build_text(place, markup, true, cached, index))),
			Node::Element(_) | Node::Component(_) => self.build_element(pass, place, data, cached, index),
			Node::Retain => Ok(cached),
		}
	}

	/// Keeps `cached` only if it has the shape `kind`, discarding it otherwise.
	fn same_kind(&mut self, cached: Option<CacheId>, kind: NodeKind) -> Option<CacheId> {
		let id = cached?;
		match self.arena.get(id).map(Cached::node_kind) {
			Some(existing) if existing == kind => Some(id),
			Some(existing) => {
				trace!(?existing, ?kind, "Shape changed; rebuilding.");
				self.discard(id);
				None
			}
			None => None,
		}
	}

	/// Builds a list and always commits what was built, so its entry matches the live host nodes even on failure.
	fn build_list(&mut self, pass: &mut Pass<H::Node>, place: &Place<H::Node>, items: Vec<Node>, cached: Option<CacheId>, index: usize) -> Result<CacheId, Failed> {
		let mut flat = Vec::with_capacity(items.len());
		flatten_into(&mut flat, items);

		let old = match cached.and_then(|id| self.arena.get(id)) {
			Some(Cached {
				kind: CachedKind::List { items }, ..
			}) => items.clone(),
			_ => Vec::new(),
		};

		let mut items = Vec::with_capacity(flat.len());
		let result = match is_keyed(&flat) {
			Ok(true) => self.diff_keyed(pass, place, flat, old, index, &mut items),
			Ok(false) => self.diff_positional(pass, place, flat, old, index, &mut items),
			Err(error) => return Err(Failed { salvaged: self.alive(cached), error }),
		};

		let nodes: Vec<H::Node> = items.iter().filter_map(|&id| self.arena.get(id)).flat_map(|entry| entry.nodes.iter().cloned()).collect();
		let id = match self.alive(cached) {
			Some(id) => {
				if let Some(entry) = self.arena.get_mut(id) {
					entry.kind = CachedKind::List { items };
					entry.nodes = nodes;
				}
				id
			}
			None => self.arena.insert(Cached::new(CachedKind::List { items }, nodes)),
		};
		result.map(|()| id).map_err(|error| Failed { salvaged: Some(id), error })
	}

	#[instrument(level = "trace", skip_all, fields(old = old.len(), new = items.len()))]
	fn diff_keyed(
		&mut self,
		pass: &mut Pass<H::Node>,
		place: &Place<H::Node>,
		items: Vec<Node>,
		old: Vec<CacheId>,
		index: usize,
		built: &mut Vec<CacheId>,
	) -> Result<(), RenderError> {
		let mut actions = Vec::new();
		let mut existing: HashMap<Key, (usize, CacheId)> = HashMap::with_capacity(old.len());
		for (position, &id) in old.iter().enumerate() {
			match self.arena.get(id).and_then(Cached::key).cloned() {
				Some(key) => match existing.entry(key) {
					Entry::Vacant(vacant) => {
						vacant.insert((position, id));
					}
					Entry::Occupied(_) => actions.push(Action::Delete { index: position, id }),
				},
				None => actions.push(Action::Delete { index: position, id }),
			}
		}

		let mut targets = Vec::with_capacity(items.len());
		for (position, item) in items.iter().enumerate() {
			match item.key().and_then(|key| existing.remove(key)) {
				Some((from, id)) => {
					if from != position {
						actions.push(Action::Move { index: position, from });
					}
					targets.push(Some(id));
				}
				None => {
					actions.push(Action::Insert { index: position });
					targets.push(None);
				}
			}
		}
		actions.extend(existing.into_iter().map(|(_, (index, id))| Action::Delete { index, id }));
		actions.sort_by_key(Action::order);

		for action in &actions {
			match *action {
				Action::Delete { id, .. } => {
					pass.stats.deletions += 1;
					self.discard(id);
				}
				Action::Insert { .. } => pass.stats.insertions += 1,
				Action::Move { index, from } => {
					trace!(from, to = index, "Key moved.");
					pass.stats.moves += 1;
				}
			}
		}

		let mut dom_index = index;
		let mut pending = items.into_iter().zip(targets);
		while let Some((item, target)) = pending.next() {
			if let Some(id) = target {
				if self.relocate(&place.parent, id, dom_index) {
					pass.stats.relocations += 1;
				}
			}
			match self.build(pass, place, item, target, dom_index) {
				Ok(Some(id)) => {
					dom_index += self.node_count(id);
					built.push(id);
				}
				Ok(None) => (),
				Err(Failed { salvaged, error }) => {
					// Matched entries further on are still attached, so they stay cached.
					built.extend(self.alive(salvaged));
					built.extend(pending.by_ref().filter_map(|(_, target)| target).filter(|&id| self.arena.get(id).is_some()));
					return Err(error);
				}
			}
		}
		Ok(())
	}

	fn diff_positional(
		&mut self,
		pass: &mut Pass<H::Node>,
		place: &Place<H::Node>,
		items: Vec<Node>,
		old: Vec<CacheId>,
		index: usize,
		built: &mut Vec<CacheId>,
	) -> Result<(), RenderError> {
		let mut old = old.into_iter();
		let mut dom_index = index;
		for item in items {
			match self.build(pass, place, item, old.next(), dom_index) {
				Ok(Some(id)) => {
					dom_index += self.node_count(id);
					built.push(id);
				}
				Ok(None) => (),
				Err(Failed { salvaged, error }) => {
					built.extend(self.alive(salvaged));
					built.extend(old.by_ref().filter(|&id| self.arena.get(id).is_some()));
					return Err(error);
				}
			}
		}
		for surplus in old {
			self.discard(surplus)
		}
		Ok(())
	}

	/// Moves `id`'s nodes to start at `dom_index` if they are not there already.
	fn relocate(&self, parent: &H::Node, id: CacheId, dom_index: usize) -> bool {
		let nodes = match self.arena.get(id) {
			Some(entry) => &entry.nodes,
			None => return false,
		};
		let mut moved = false;
		for (offset, node) in nodes.iter().enumerate() {
			let current = self.host.child_at(parent, dom_index + offset);
			if current.as_ref() != Some(node) {
				moved = true;
				if let Err(error) = self.host.insert_before(parent, node, current.as_ref()) {
					error!("Could not move node into place: {}", error)
				}
			}
		}
		moved
	}

	fn node_count(&self, id: CacheId) -> usize {
		self.arena.get(id).map_or(0, |entry| entry.nodes.len())
	}

	fn build_text(&mut self, place: &Place<H::Node>, value: Rc<str>, trusted: bool, cached: Option<CacheId>, index: usize) -> CacheId {
		let span = if cfg!(feature = "dangerous-logging") {
			trace_span!("build_text", trusted, index, value = &*value)
		} else {
			trace_span!("build_text", trusted, index)
		};
		let _enter = span.enter();

		let old = cached.and_then(|id| match self.arena.get(id) {
			Some(Cached {
				kind: CachedKind::Text { value, trusted },
				nodes,
				..
			}) => Some((id, value.clone(), *trusted, nodes.clone())),
			_ => None,
		});
		let (id, old_value, old_trusted, old_nodes) = match old {
			Some(old) => old,
			None => {
				let nodes = self.create_text_nodes(place, &value, trusted, index);
				return self.arena.insert(Cached::new(CachedKind::Text { value, trusted }, nodes));
			}
		};
		if old_value == value && old_trusted == trusted {
			return id;
		}

		let nodes = if trusted || old_trusted || old_nodes.len() != 1 {
			for node in &old_nodes {
				self.detach(node)
			}
			self.create_text_nodes(place, &value, trusted, index)
		} else if place.parent_tag.as_deref() == Some("textarea") {
			if let Err(error) = self.host.set_property(&place.parent, "value", &Scalar::Str(value.clone())) {
				debug!("Could not update textarea value: {}", error)
			}
			old_nodes
		} else {
			for node in &old_nodes {
				self.host.set_text(node, &value)
			}
			old_nodes
		};
		if let Some(entry) = self.arena.get_mut(id) {
			entry.kind = CachedKind::Text { value, trusted };
			entry.nodes = nodes;
		}
		id
	}

	fn create_text_nodes(&self, place: &Place<H::Node>, value: &str, trusted: bool, index: usize) -> Vec<H::Node> {
		if trusted {
			let before = self.host.child_at(&place.parent, index);
			return self.host.insert_markup(&place.parent, before.as_ref(), value).unwrap_or_else(|error| {
				warn!("Could not inject trusted markup: {}", error);
				Vec::new()
			});
		}

		let node = self.host.create_text(value);
		if !place.parent_tag.as_deref().map_or(false, |tag| VOID_ELEMENTS.contains(&tag)) {
			self.insert_at(&place.parent, &node, index);
		}
		vec![node]
	}

	fn build_element(&mut self, pass: &mut Pass<H::Node>, place: &Place<H::Node>, data: Node, cached: Option<CacheId>, index: usize) -> Built {
		let (old_views, old_controllers) = cached
			.and_then(|id| self.arena.get(id))
			.map_or_else(Default::default, |entry| (entry.views.clone(), entry.controllers.clone()));

		let mut views: Vec<ComponentId> = Vec::new();
		let mut controllers: Vec<Controller> = Vec::new();
		let mut slot_key = None;
		let mut data = data;
		let mut element = loop {
			match data {
				Node::Element(element) => break element,
				Node::Component(component) => {
					let reused = if pass.context.strategy == Strategy::Diff {
						old_views.iter().position(|&view| view == component.id()).and_then(|i| old_controllers.get(i).cloned())
					} else {
						None
					};
					let is_reused = reused.is_some();
					let controller = reused.unwrap_or_else(|| component.construct());
					data = if !pass.context.suspended || is_reused {
						component.view(&controller)
					} else {
						trace!(component = ?component.id(), "Requests pending; rendering a placeholder.");
						Node::Element(Element::new("placeholder"))
					};
					if slot_key.is_none() {
						slot_key = component.key_ref().cloned();
					}
					views.push(component.id());
					controllers.push(controller);
				}
				Node::Retain => return Ok(cached),
				other => {
					return Err(Failed {
						salvaged: self.alive(cached),
						error: RenderError::InvalidComponentRoot(other.describe()),
					})
				}
			}
		};
		if slot_key.is_some() {
			element.key = slot_key;
		}

		let cached = match cached {
			Some(id) if self.is_different_enough(&element, id, pass.context.strategy) => {
				trace!(tag = &*element.tag, "Recreating element.");
				self.discard_except(id, &controllers);
				None
			}
			other => other,
		};

		let namespace = match element.attrs.get("xmlns") {
			Some(AttrValue::Str(namespace)) => Some(namespace.clone()),
			_ => match &*element.tag {
				"svg" => Some(SVG_NAMESPACE.into()),
				"math" => Some(MATHML_NAMESPACE.into()),
				_ => place.namespace.clone(),
			},
		};

		pass.controllers.extend(controllers.iter().filter(|controller| controller.has_onunload()).cloned());
		match cached {
			Some(id) => self.update_element(pass, id, element, namespace, views, controllers).map(Some),
			None => self.create_element(pass, place, element, namespace, index, views, controllers).map(Some),
		}
	}

	fn is_different_enough(&self, element: &Element, id: CacheId, strategy: Strategy) -> bool {
		let entry = match self.arena.get(id) {
			Some(entry) => entry,
			None => return true,
		};
		let (tag, attrs, key, has_config) = match &entry.kind {
			CachedKind::Element { tag, attrs, key, has_config, .. } => (tag, attrs, key, *has_config),
			CachedKind::Text { .. } | CachedKind::List { .. } => return true,
		};
		if *tag != element.tag
			|| !attrs.keys().eq(element.attrs.keys())
			|| has_config != element.config.is_some()
			|| attrs.get("id") != element.attrs.get("id")
			|| *key != element.key
			|| entry.nodes.is_empty()
		{
			return true;
		}

		let retain = entry.config_context.as_ref().and_then(|context| context.borrow().retain());
		match strategy {
			Strategy::All => retain != Some(true),
			Strategy::Diff => retain == Some(false),
			Strategy::None => false,
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn create_element(
		&mut self,
		pass: &mut Pass<H::Node>,
		place: &Place<H::Node>,
		element: Element,
		namespace: Option<Rc<str>>,
		index: usize,
		views: Vec<ComponentId>,
		controllers: Vec<Controller>,
	) -> Result<CacheId, Failed> {
		let Element { tag, attrs, key, config, children } = element;
		let span = trace_span!("create_element", tag = &*tag, index);
		let _enter = span.enter();

		let is = match attrs.get("is") {
			Some(AttrValue::Str(is)) => Some(is.clone()),
			_ => None,
		};
		let node = self
			.host
			.create_element(&tag, namespace.as_deref(), is.as_deref())
			.map_err(|source| RenderError::CreateElement { tag: tag.to_string(), source })?;

		let mut cached_attrs = BTreeMap::new();
		self.set_attributes(&pass.context, &node, &tag, attrs, &mut cached_attrs, namespace.as_deref());

		let child_place = Place {
			parent: node.clone(),
			parent_tag: Some(tag.clone()),
			namespace: namespace.clone(),
		};
		let children = match self.build_list(pass, &child_place, children, None, 0) {
			Ok(children) => children,
			Err(Failed { salvaged, error }) => {
				// The element was never attached, so nothing of it stays live.
				if let Some(salvaged) = salvaged {
					self.discard(salvaged)
				}
				return Err(error.into());
			}
		};

		if &*tag == "select" {
			if let Some(value) = cached_attrs.get("value") {
				self.set_attribute(&pass.context, &node, &tag, "value", value, None, namespace.as_deref());
			}
		}
		self.insert_at(&place.parent, &node, index);

		let context = config.as_ref().map(|_| Rc::new(RefCell::new(ConfigContext::default())));
		let mut entry = Cached::new(
			CachedKind::Element {
				tag,
				attrs: cached_attrs,
				key,
				has_config: config.is_some(),
				children: Some(children),
			},
			vec![node.clone()],
		);
		entry.views = views;
		entry.controllers = controllers;
		entry.config_context = context.clone();
		let id = self.arena.insert(entry);

		if let (Some(config), Some(context)) = (config, context) {
			pass.configs.push(PendingConfig {
				config,
				node,
				initialized: false,
				context,
			});
		}
		Ok(id)
	}

	fn update_element(
		&mut self,
		pass: &mut Pass<H::Node>,
		id: CacheId,
		element: Element,
		namespace: Option<Rc<str>>,
		views: Vec<ComponentId>,
		controllers: Vec<Controller>,
	) -> Result<CacheId, Failed> {
		let Element { tag, attrs, key, config, children } = element;
		let span = trace_span!("update_element", tag = &*tag);
		let _enter = span.enter();

		let (node, mut cached_attrs, cached_children, old_controllers) = match self.arena.get(id) {
			Some(Cached {
				kind: CachedKind::Element { attrs, children, .. },
				nodes,
				controllers,
				..
			}) => match nodes.first() {
				Some(node) => (node.clone(), attrs.clone(), *children, controllers.clone()),
				None => return Ok(id),
			},
			_ => return Ok(id),
		};

		self.set_attributes(&pass.context, &node, &tag, attrs, &mut cached_attrs, namespace.as_deref());
		if let Some(Cached {
			kind: CachedKind::Element { attrs, .. }, ..
		}) = self.arena.get_mut(id)
		{
			*attrs = cached_attrs;
		}

		let child_place = Place {
			parent: node.clone(),
			parent_tag: Some(tag),
			namespace,
		};
		let children = match self.build_list(pass, &child_place, children, cached_children, 0) {
			Ok(children) => children,
			Err(Failed { salvaged, error }) => {
				if let Some(Cached {
					kind: CachedKind::Element { children, .. },
					..
				}) = self.arena.get_mut(id)
				{
					*children = salvaged;
				}
				return Err(Failed { salvaged: Some(id), error });
			}
		};

		let event = UnloadEvent::teardown();
		for stale in old_controllers.iter().filter(|old| !controllers.iter().any(|controller| controller.ptr_eq(old))) {
			stale.unload(&event)
		}

		let mut context = None;
		if let Some(entry) = self.arena.get_mut(id) {
			if let CachedKind::Element {
				key: cached_key,
				has_config,
				children: cached_children,
				..
			} = &mut entry.kind
			{
				*cached_key = key;
				*has_config = config.is_some();
				*cached_children = Some(children);
			}
			entry.views = views;
			entry.controllers = controllers;
			if config.is_some() {
				context = Some(entry.config_context.get_or_insert_with(Rc::default).clone());
			}
		}

		if let (Some(config), Some(context)) = (config, context) {
			pass.configs.push(PendingConfig {
				config,
				node,
				initialized: true,
				context,
			});
		}
		Ok(id)
	}

	fn set_attributes(
		&self,
		context: &PassContext,
		node: &H::Node,
		tag: &str,
		attrs: BTreeMap<Rc<str>, AttrValue>,
		cached: &mut BTreeMap<Rc<str>, AttrValue>,
		namespace: Option<&str>,
	) {
		let removed: Vec<Rc<str>> = cached.keys().filter(|name| !attrs.contains_key(*name)).cloned().collect();
		for name in removed {
			if let Some(previous) = cached.remove(&name) {
				self.clear_attribute(node, &name, &previous)
			}
		}

		for (name, value) in attrs {
			let previous = cached.get(&name).cloned();
			if previous.as_ref() == Some(&value) {
				if &*name == "value" && tag == "input" {
					self.sync_value(node, &value)
				}
				continue;
			}
			self.set_attribute(context, node, tag, &name, &value, previous.as_ref(), namespace);
			cached.insert(name, value);
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn set_attribute(&self, context: &PassContext, node: &H::Node, tag: &str, name: &str, value: &AttrValue, previous: Option<&AttrValue>, namespace: Option<&str>) {
		if cfg!(feature = "dangerous-logging") {
			trace!(name, ?value, "Setting attribute.");
		} else {
			trace!(name, "Setting attribute.");
		}

		let scalar = match value {
			AttrValue::Handler(handler) => {
				return match name.strip_prefix("on") {
					Some(event) => self.host.set_listener(node, event, Some(listener_for(handler, context.scheduler.as_ref()))),
					None => warn!(name, "Ignoring an event handler bound to a non-event attribute."),
				};
			}
			AttrValue::Style(style) => {
				let empty = Style::new();
				let previous = match previous {
					Some(AttrValue::Style(previous)) => previous,
					_ => &empty,
				};
				for (rule, value) in style.iter() {
					if previous.get(rule) != Some(value) {
						self.host.set_style(node, rule, value)
					}
				}
				for (rule, _) in previous.iter() {
					if style.get(rule).is_none() {
						self.host.set_style(node, rule, "")
					}
				}
				return;
			}
			AttrValue::Str(_) | AttrValue::Number(_) | AttrValue::Bool(_) => match value.as_scalar() {
				Some(scalar) => scalar,
				None => return,
			},
		};

		if let (Some(AttrValue::Handler(_)), Some(event)) = (previous, name.strip_prefix("on")) {
			self.host.set_listener(node, event, None);
		}

		let result = if namespace.is_some() {
			if name == "href" {
				self.host.set_attribute(node, Some(XLINK_NAMESPACE), "href", &scalar.to_string())
			} else {
				self.host.set_attribute(node, None, if name == "className" { "class" } else { name }, &scalar.to_string())
			}
		} else if self.host.has_property(node, name) && !SET_ATTRIBUTE_NAMES.contains(&name) {
			if tag == "input" && self.host.property(node, name).as_ref() == Some(&scalar) {
				return;
			}
			self.host.set_property(node, name, &scalar).or_else(|error| {
				debug!(name, "Property assignment rejected ({}); falling back to an attribute.", error);
				self.host.set_attribute(node, None, name, &scalar.to_string())
			})
		} else {
			self.host.set_attribute(node, None, name, &scalar.to_string())
		};
		if let Err(error) = result {
			debug!(name, "Ignoring rejected attribute: {}", error)
		}
	}

	fn clear_attribute(&self, node: &H::Node, name: &str, previous: &AttrValue) {
		trace!(name, "Clearing attribute.");
		match previous {
			AttrValue::Handler(_) => {
				if let Some(event) = name.strip_prefix("on") {
					self.host.set_listener(node, event, None)
				}
			}
			AttrValue::Style(style) => {
				for (rule, _) in style.iter() {
					self.host.set_style(node, rule, "")
				}
			}
			AttrValue::Str(_) | AttrValue::Number(_) | AttrValue::Bool(_) => {
				if self.host.has_property(node, name) && !SET_ATTRIBUTE_NAMES.contains(&name) {
					let blank = match previous {
						AttrValue::Bool(_) => Scalar::Bool(false),
						_ => Scalar::Str("".into()),
					};
					if let Err(error) = self.host.set_property(node, name, &blank) {
						debug!(name, "Could not clear property: {}", error)
					}
				}
				if let Err(error) = self.host.remove_attribute(node, name) {
					debug!(name, "Could not remove attribute: {}", error)
				}
			}
		}
	}

	/// Restores an input's live `value` if the user changed it since it was last rendered.
	fn sync_value(&self, node: &H::Node, value: &AttrValue) {
		if let Some(scalar) = value.as_scalar() {
			if self.host.property(node, "value").as_ref() != Some(&scalar) {
				if let Err(error) = self.host.set_property(node, "value", &scalar) {
					debug!("Could not restore input value: {}", error)
				}
			}
		}
	}

	fn insert_at(&self, parent: &H::Node, node: &H::Node, index: usize) {
		let before = self.host.child_at(parent, index);
		if before.as_ref() == Some(node) {
			return;
		}
		if let Err(error) = self.host.insert_before(parent, node, before.as_ref()) {
			error!("Could not insert node: {}", error)
		}
	}

	/// Best-effort removal; a node that is already gone is fine.
	fn detach(&self, node: &H::Node) {
		if let Some(parent) = self.host.parent(node) {
			if let Err(error) = self.host.remove_child(&parent, node) {
				trace!("Ignoring failed removal: {}", error)
			}
		}
	}

	fn clear_host_children(&self, parent: &H::Node) {
		while let Some(child) = self.host.child_at(parent, 0) {
			if let Err(error) = self.host.remove_child(parent, &child) {
				warn!("Could not clear root content: {}", error);
				break;
			}
			self.host.release(&child);
		}
	}

	fn discard(&mut self, id: CacheId) {
		self.discard_except(id, &[])
	}

	/// Removes `id`'s host nodes, fires unload hooks except those of `keep`, and frees its subtree.
	fn discard_except(&mut self, id: CacheId, keep: &[Controller]) {
		if let Some(entry) = self.arena.remove(id) {
			for node in &entry.nodes {
				self.detach(node)
			}
			self.unload(entry, keep)
		}
	}

	fn unload(&mut self, entry: Cached<H::Node>, keep: &[Controller]) {
		let onunload = entry.config_context.as_ref().and_then(|context| context.borrow_mut().take_onunload());
		if let Some(onunload) = onunload {
			onunload()
		}
		let event = UnloadEvent::teardown();
		for controller in entry.controllers.iter().filter(|controller| !keep.iter().any(|kept| kept.ptr_eq(controller))) {
			controller.unload(&event)
		}

		match entry.kind {
			CachedKind::Element { children, .. } => {
				if let Some(child) = children.and_then(|children| self.arena.remove(children)) {
					self.unload(child, &[])
				}
				for node in &entry.nodes {
					self.host.release(node)
				}
			}
			CachedKind::List { items } => {
				for item in items {
					if let Some(child) = self.arena.remove(item) {
						self.unload(child, &[])
					}
				}
			}
			CachedKind::Text { .. } => (),
		}
	}
}

fn flatten_into(flat: &mut Vec<Node>, items: Vec<Node>) {
	for item in items {
		match item {
			Node::List(inner) => flatten_into(flat, inner),
			other => flat.push(other),
		}
	}
}

/// Whether a flattened list is diffed by key. Every item must carry one.
fn is_keyed(items: &[Node]) -> Result<bool, RenderError> {
	let keyed = items.iter().filter(|item| item.key().is_some()).count();
	if keyed == 0 {
		return Ok(false);
	}
	if keyed != items.len() {
		warn!("{} of {} siblings are keyed; diffing them by position instead.", keyed, items.len());
		return Ok(false);
	}

	let mut seen = HashSet::with_capacity(items.len());
	for key in items.iter().filter_map(Node::key) {
		if !seen.insert(key) {
			return Err(RenderError::DuplicateKey(key.clone()));
		}
	}
	Ok(true)
}

/// Wraps `handler` so that invoking it counts as a computation and redraws afterwards.
fn listener_for(handler: &EventHandler, scheduler: Option<&Weak<Scheduler>>) -> Listener {
	let scheduler = match scheduler {
		Some(scheduler) => scheduler.clone(),
		None => return handler.listener(),
	};
	let handler = handler.clone();
	Rc::new(move |event| {
		let scheduler = scheduler.upgrade();
		if let Some(scheduler) = &scheduler {
			scheduler.set_strategy(Strategy::Diff);
			scheduler.start_computation();
		}
		handler.call(event);
		if let Some(scheduler) = scheduler {
			if let Err(error) = scheduler.end_first_computation() {
				error!("Redraw after `{}` handler failed: {}", event.name(), error)
			}
		}
	})
}
