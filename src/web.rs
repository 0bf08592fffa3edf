//! The browser host, over [`web_sys`].
//!
//! Event listeners are bound through one shared [`Closure`]: each distinct [`Listener`] gets a
//! bound copy of it (`Function.prototype.bind`) keyed by the listener's address, reference-counted
//! per element binding and freed at the end of the pass that dropped its last binding.

use crate::{
	host::{Event, EventTarget, HostError, HostTree, Listener, NodeInfo, Scalar},
	rc_hash_map::RcHashMap,
	router::{History, RouteMode},
	scheduler::{FrameClock, FrameId},
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use js_sys::{Function, Object, Reflect};
use std::rc::Rc;
use tracing::{error, info, trace, trace_span, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};

/// Expando property holding an element's bound listener keys by event name.
const LISTENERS: &str = "__tendril_listeners";

type Handles = RcHashMap<usize, u16, (Function, Listener)>;

fn js_error(error: &JsValue) -> HostError {
	HostError::Rejected(error.as_string().unwrap_or_else(|| format!("{:?}", error)))
}

fn listener_key(listener: &Listener) -> usize {
	Rc::as_ptr(listener).cast::<()>() as usize
}

/// A [`HostTree`] over a live [`web_sys::Document`].
#[derive(Clone)]
pub struct WebDocument {
	document: web_sys::Document,
	handles: Rc<RefCell<Handles>>,
	common_handler: Rc<Closure<dyn Fn(JsValue, web_sys::Event)>>,
}
impl Debug for WebDocument {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("WebDocument")
			.field("listeners", &self.handles.borrow().len())
			.finish_non_exhaustive()
	}
}

impl WebDocument {
	#[must_use]
	pub fn new(document: web_sys::Document) -> Self {
		let handles = Rc::new(RefCell::new(Handles::new()));
		let registry = Rc::downgrade(&handles);
		let common_handler = Closure::wrap(Box::new(move |key: JsValue, event: web_sys::Event| {
			let span = trace_span!("common_handler", key = ?&key, event = ?event.type_());
			let _enter = span.enter();

			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let key = match key.as_f64() {
				Some(key) => key as usize,
				None => return error!("Event listener invoked with an invalid key."),
			};
			let handles = match registry.upgrade() {
				Some(handles) => handles,
				None => return warn!("Event listener fired after its document was dropped."),
			};
			let listener = handles.borrow().get(&key).map(|(_, listener)| listener.clone());
			let listener = match listener {
				Some(listener) => listener,
				None => return warn!("Event listener fired after its binding was freed."),
			};

			let target = event.current_target().and_then(|target| target.dyn_into::<web_sys::Node>().ok());
			let mut wrapped = Event::new(event.type_()).with_raw(Rc::new(event.clone()));
			if let Some(target) = target {
				wrapped = wrapped.with_target(Rc::new(WebTarget(target)));
			}
			listener(&wrapped);
			if wrapped.is_default_prevented() {
				event.prevent_default()
			}
		}) as Box<dyn Fn(JsValue, web_sys::Event)>);

		Self {
			document,
			handles,
			common_handler: Rc::new(common_handler),
		}
	}

	/// The window's document.
	///
	/// # Errors
	///
	/// Iff there is no window or it has no document.
	pub fn from_window() -> Result<Self, HostError> {
		web_sys::window()
			.and_then(|window| window.document())
			.map(Self::new)
			.ok_or(HostError::NotFound)
	}

	#[must_use]
	pub fn document(&self) -> &web_sys::Document {
		&self.document
	}

	/// The `<body>`, as a render root.
	#[must_use]
	pub fn body(&self) -> Option<web_sys::Node> {
		self.document.body().map(Into::into)
	}

	fn element(node: &web_sys::Node) -> Result<&web_sys::Element, HostError> {
		node.dyn_ref::<web_sys::Element>()
			.ok_or_else(|| HostError::InvalidArgument("not an element".to_owned()))
	}

	/// The per-element map from event name to bound listener key.
	fn bindings(node: &web_sys::Node, create: bool) -> Option<Object> {
		let name = JsValue::from_str(LISTENERS);
		match Reflect::get(node, &name) {
			Ok(bindings) if bindings.is_object() => Some(bindings.unchecked_into()),
			_ if create => {
				let bindings = Object::new();
				Reflect::set(node, &name, &bindings).ok()?;
				Some(bindings)
			}
			_ => None,
		}
	}

	fn unbind(&self, node: &web_sys::Node, bindings: &Object, event: &str) {
		let event_name = JsValue::from_str(event);
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let key = match Reflect::get(bindings, &event_name).ok().and_then(|key| key.as_f64()) {
			Some(key) => key as usize,
			None => return,
		};
		if let Err(error) = Reflect::delete_property(bindings, &event_name) {
			trace!("Could not clear listener key: {:?}", error)
		}

		let mut handles = self.handles.borrow_mut();
		match handles.weak_decrement(&key) {
			Ok(Some((function, _))) => {
				if let Err(error) = node.remove_event_listener_with_callback(event, function) {
					error!("Failed to remove event listener {:?}: {:?}", event, error)
				}
			}
			Ok(None) => warn!("Tried to unbind a listener that isn't registered."),
			Err(error) => warn!("Tried to unbind a listener more often than bound: {}", error),
		}
	}
}

struct WebTarget(web_sys::Node);
impl EventTarget for WebTarget {
	fn property(&self, name: &str) -> Option<Scalar> {
		Reflect::get(&self.0, &JsValue::from_str(name)).ok().and_then(|value| to_scalar(&value))
	}
}

fn to_scalar(value: &JsValue) -> Option<Scalar> {
	if let Some(s) = value.as_string() {
		Some(s.into())
	} else if let Some(n) = value.as_f64() {
		Some(n.into())
	} else {
		value.as_bool().map(Into::into)
	}
}

fn to_js(value: &Scalar) -> JsValue {
	match value {
		Scalar::Str(s) => JsValue::from_str(s),
		Scalar::Number(n) => JsValue::from_f64(*n),
		Scalar::Bool(b) => JsValue::from_bool(*b),
	}
}

impl HostTree for WebDocument {
	type Node = web_sys::Node;

	fn create_element(&self, tag: &str, namespace: Option<&str>, is: Option<&str>) -> Result<web_sys::Node, HostError> {
		let element = match (namespace, is) {
			(Some(namespace), Some(is)) => self.document.create_element_ns_with_str(Some(namespace), tag, is),
			(Some(namespace), None) => self.document.create_element_ns(Some(namespace), tag),
			(None, Some(is)) => self.document.create_element_with_str(tag, is),
			(None, None) => self.document.create_element(tag),
		};
		element.map(Into::into).map_err(|error| js_error(&error))
	}

	fn create_text(&self, data: &str) -> web_sys::Node {
		self.document.create_text_node(data).into()
	}

	fn insert_markup(&self, parent: &web_sys::Node, before: Option<&web_sys::Node>, markup: &str) -> Result<Vec<web_sys::Node>, HostError> {
		let staging = self.document.create_element("div").map_err(|error| js_error(&error))?;
		staging.set_inner_html(markup);
		let parsed = staging.child_nodes();
		let nodes: Vec<web_sys::Node> = (0..parsed.length()).filter_map(|i| parsed.item(i)).collect();
		for node in &nodes {
			parent.insert_before(node, before).map_err(|error| js_error(&error))?;
		}
		Ok(nodes)
	}

	fn child_count(&self, parent: &web_sys::Node) -> usize {
		parent.child_nodes().length() as usize
	}

	fn child_at(&self, parent: &web_sys::Node, index: usize) -> Option<web_sys::Node> {
		parent.child_nodes().item(u32::try_from(index).ok()?)
	}

	fn parent(&self, node: &web_sys::Node) -> Option<web_sys::Node> {
		node.parent_node()
	}

	fn insert_before(&self, parent: &web_sys::Node, node: &web_sys::Node, before: Option<&web_sys::Node>) -> Result<(), HostError> {
		if before == Some(node) {
			return Ok(());
		}
		parent.insert_before(node, before).map(drop).map_err(|error| js_error(&error))
	}

	fn remove_child(&self, parent: &web_sys::Node, node: &web_sys::Node) -> Result<(), HostError> {
		parent.remove_child(node).map(drop).map_err(|error| js_error(&error))
	}

	fn set_text(&self, node: &web_sys::Node, data: &str) {
		node.set_node_value(Some(data))
	}

	fn inspect(&self, node: &web_sys::Node) -> NodeInfo {
		if let Some(element) = node.dyn_ref::<web_sys::Element>() {
			let map = element.attributes();
			let attributes = (0..map.length())
				.filter_map(|i| map.item(i))
				.map(|attribute| (attribute.local_name(), attribute.value()))
				.collect();
			NodeInfo::Element {
				tag: element.local_name(),
				attributes,
			}
		} else if let Some(text) = node.dyn_ref::<web_sys::Text>() {
			NodeInfo::Text(text.data())
		} else {
			NodeInfo::Other
		}
	}

	fn has_property(&self, node: &web_sys::Node, name: &str) -> bool {
		Reflect::has(node, &JsValue::from_str(name)).unwrap_or(false)
	}

	fn property(&self, node: &web_sys::Node, name: &str) -> Option<Scalar> {
		Reflect::get(node, &JsValue::from_str(name)).ok().and_then(|value| to_scalar(&value))
	}

	fn set_property(&self, node: &web_sys::Node, name: &str, value: &Scalar) -> Result<(), HostError> {
		match Reflect::set(node, &JsValue::from_str(name), &to_js(value)) {
			Ok(true) => Ok(()),
			Ok(false) => Err(HostError::Rejected(format!("property {:?} is read-only", name))),
			Err(error) => Err(js_error(&error)),
		}
	}

	fn set_attribute(&self, node: &web_sys::Node, namespace: Option<&str>, name: &str, value: &str) -> Result<(), HostError> {
		let element = Self::element(node)?;
		match namespace {
			Some(namespace) => element.set_attribute_ns(Some(namespace), name, value),
			None => element.set_attribute(name, value),
		}
		.map_err(|error| js_error(&error))
	}

	fn remove_attribute(&self, node: &web_sys::Node, name: &str) -> Result<(), HostError> {
		Self::element(node)?.remove_attribute(name).map_err(|error| js_error(&error))
	}

	fn set_style(&self, node: &web_sys::Node, rule: &str, value: &str) {
		let style = match Reflect::get(node, &JsValue::from_str("style"))
			.ok()
			.and_then(|style| style.dyn_into::<web_sys::CssStyleDeclaration>().ok())
		{
			Some(style) => style,
			None => return warn!("Node has no inline style; ignoring rule."),
		};
		let result = if value.is_empty() {
			style.remove_property(rule).map(drop)
		} else {
			style.set_property(rule, value)
		};
		if let Err(error) = result {
			trace!("Style rule rejected: {:?}", error)
		}
	}

	fn set_listener(&self, node: &web_sys::Node, event: &str, listener: Option<Listener>) {
		let bindings = match Self::bindings(node, listener.is_some()) {
			Some(bindings) => bindings,
			None if listener.is_none() => return,
			None => return error!("Could not store listener bindings on node."),
		};
		self.unbind(node, &bindings, event);

		let listener = match listener {
			Some(listener) => listener,
			None => return,
		};
		let key = listener_key(&listener);
		let function = {
			let mut handles = self.handles.borrow_mut();
			let common_handler: &JsValue = (*self.common_handler).as_ref();
			match handles.increment_or_insert_with(key, |&key| {
				#[allow(clippy::cast_precision_loss)]
				let bound: Function = common_handler.unchecked_ref::<Function>().bind1(&JsValue::UNDEFINED, &JsValue::from_f64(key as f64)).unchecked_into();
				(bound, listener)
			}) {
				Ok((function, _)) => function.clone(),
				Err(error) => return error!("Could not bind listener: {}", error),
			}
		};

		#[allow(clippy::cast_precision_loss)]
		let stored = Reflect::set(&bindings, &JsValue::from_str(event), &JsValue::from_f64(key as f64));
		if stored.is_err() {
			error!("Could not record listener binding.")
		}
		if let Err(error) = node.add_event_listener_with_callback(event, &function) {
			error!("Failed to add event listener {:?}: {:?}", event, error)
		}
	}

	fn release(&self, node: &web_sys::Node) {
		let bindings = match Self::bindings(node, false) {
			Some(bindings) => bindings,
			None => return,
		};
		for event in Object::keys(&bindings).iter() {
			if let Some(event) = event.as_string() {
				self.unbind(node, &bindings, &event)
			}
		}
	}

	fn flush(&self) {
		let mut handles = self.handles.borrow_mut();
		let freed = handles.drain_weak().count();
		trace!("Freed {} event listener(s).", freed);
		info!("Event listener count/cached capacity: {}/{}", handles.len(), handles.capacity());
	}
}

/// A [`FrameClock`] on `requestAnimationFrame`, falling back to `setTimeout`.
#[derive(Debug, Clone)]
pub struct AnimationFrameClock {
	window: web_sys::Window,
}

const TIMEOUT_BIT: FrameId = 1 << 32;

impl AnimationFrameClock {
	#[must_use]
	pub fn new(window: web_sys::Window) -> Self {
		Self { window }
	}

	/// # Errors
	///
	/// Iff there is no window.
	pub fn from_window() -> Result<Self, HostError> {
		web_sys::window().map(Self::new).ok_or(HostError::NotFound)
	}
}
impl FrameClock for AnimationFrameClock {
	fn now(&self) -> f64 {
		js_sys::Date::now()
	}

	fn request_frame(&self, delay_ms: f64, callback: Box<dyn FnOnce()>) -> FrameId {
		let function: Function = Closure::once_into_js(move || callback()).unchecked_into();
		match self.window.request_animation_frame(&function) {
			#[allow(clippy::cast_sign_loss)]
			Ok(handle) => FrameId::from(handle as u32),
			Err(error) => {
				warn!("requestAnimationFrame failed ({:?}); falling back to setTimeout.", error);
				#[allow(clippy::cast_possible_truncation)]
				let delay = delay_ms as i32;
				match self.window.set_timeout_with_callback_and_timeout_and_arguments_0(&function, delay) {
					#[allow(clippy::cast_sign_loss)]
					Ok(handle) => TIMEOUT_BIT | FrameId::from(handle as u32),
					Err(error) => {
						error!("Could not schedule a frame: {:?}", error);
						FrameId::MAX
					}
				}
			}
		}
	}

	fn cancel_frame(&self, frame: FrameId) {
		if frame == FrameId::MAX {
			return;
		}
		#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
		let handle = frame as u32 as i32;
		if frame & TIMEOUT_BIT == 0 {
			if let Err(error) = self.window.cancel_animation_frame(handle) {
				warn!("Could not cancel animation frame: {:?}", error)
			}
		} else {
			self.window.clear_timeout_with_handle(handle)
		}
	}
}

/// [`History`] over `window.location` and `window.history`.
#[derive(Debug, Clone)]
pub struct WebHistory {
	window: web_sys::Window,
}
impl WebHistory {
	#[must_use]
	pub fn new(window: web_sys::Window) -> Self {
		Self { window }
	}

	/// # Errors
	///
	/// Iff there is no window.
	pub fn from_window() -> Result<Self, HostError> {
		web_sys::window().map(Self::new).ok_or(HostError::NotFound)
	}

	/// Calls `on_change` whenever the location changes outside of the router
	/// (`hashchange` in [`RouteMode::Hash`], `popstate` otherwise).
	///
	/// The subscription ends when the returned guard is dropped.
	///
	/// # Errors
	///
	/// Iff the listener can't be added.
	pub fn listen(&self, mode: RouteMode, on_change: impl Fn() + 'static) -> Result<LocationListener, HostError> {
		let event = match mode {
			RouteMode::Hash => "hashchange",
			RouteMode::Search | RouteMode::Pathname => "popstate",
		};
		let closure = Closure::wrap(Box::new(on_change) as Box<dyn Fn()>);
		self.window
			.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
			.map_err(|error| js_error(&error))?;
		Ok(LocationListener {
			window: self.window.clone(),
			event,
			closure,
		})
	}

	fn write(&self, mode: RouteMode, route: &str, replace: bool) {
		let history = match self.window.history() {
			Ok(history) => history,
			Err(error) => return error!("No history available: {:?}", error),
		};
		let url = format!("{}{}", mode.prefix(), route);
		let title = self.window.document().map(|document| document.title()).unwrap_or_default();
		let result = if replace {
			history.replace_state_with_url(&JsValue::NULL, &title, Some(&url))
		} else {
			history.push_state_with_url(&JsValue::NULL, &title, Some(&url))
		};
		if let Err(error) = result {
			error!("Could not update history: {:?}", error)
		}
	}
}
impl History for WebHistory {
	fn location(&self, mode: RouteMode) -> String {
		let location = self.window.location();
		let raw = match mode {
			RouteMode::Search => location.search(),
			RouteMode::Hash => location.hash(),
			RouteMode::Pathname => location.pathname().and_then(|path| location.search().map(|search| path + &search)),
		};
		match raw {
			Ok(raw) => mode.normalize(&raw),
			Err(error) => {
				error!("Could not read location: {:?}", error);
				String::new()
			}
		}
	}

	fn push(&self, mode: RouteMode, route: &str) {
		self.write(mode, route, false)
	}

	fn replace(&self, mode: RouteMode, route: &str) {
		self.write(mode, route, true)
	}

	fn scroll_to_top(&self) {
		self.window.scroll_to_with_x_and_y(0.0, 0.0)
	}
}

/// Keeps a [`WebHistory::listen`] subscription alive.
pub struct LocationListener {
	window: web_sys::Window,
	event: &'static str,
	closure: Closure<dyn Fn()>,
}
impl Debug for LocationListener {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("LocationListener").field("event", &self.event).finish_non_exhaustive()
	}
}
impl Drop for LocationListener {
	fn drop(&mut self) {
		if let Err(error) = self.window.remove_event_listener_with_callback(self.event, self.closure.as_ref().unchecked_ref()) {
			warn!("Could not remove location listener: {:?}", error)
		}
	}
}
