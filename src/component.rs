//! Components and their controllers.
//!
//! A [`Component`] pairs a controller constructor (per-mount state) with a view.
//! Its identity is the [`ComponentId`] assigned when it is created, so rebuilding a
//! [`ComponentRef`] with fresh arguments on every render keeps its controller alive.

use crate::vdom::{Key, Node};
use core::{
	any::Any,
	cell::{Cell, Ref, RefCell, RefMut},
	fmt::{self, Debug, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};
use std::rc::Rc;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);
impl ComponentId {
	fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(0);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

/// Passed to unload hooks. Only events raised by a mount transition are cancelable.
#[derive(Debug)]
pub struct UnloadEvent {
	cancelable: bool,
	prevented: Cell<bool>,
}
impl UnloadEvent {
	#[must_use]
	pub fn cancelable() -> Self {
		Self { cancelable: true, prevented: Cell::new(false) }
	}

	#[must_use]
	pub fn teardown() -> Self {
		Self { cancelable: false, prevented: Cell::new(false) }
	}

	#[must_use]
	pub fn is_cancelable(&self) -> bool {
		self.cancelable
	}

	/// Vetoes the transition, if it is cancelable.
	pub fn prevent_default(&self) {
		if self.cancelable {
			self.prevented.set(true)
		}
	}

	#[must_use]
	pub fn is_default_prevented(&self) -> bool {
		self.prevented.get()
	}
}

pub type UnloadHook = Rc<dyn Fn(&UnloadEvent)>;

struct ControllerInner {
	state: Box<dyn Any>,
	onunload: RefCell<Option<UnloadHook>>,
}

/// Type-erased per-mount state of a component instance.
#[derive(Clone)]
pub struct Controller(Rc<ControllerInner>);
impl Controller {
	pub fn new<S: 'static>(state: S) -> Self {
		Self(Rc::new(ControllerInner {
			state: Box::new(Rc::new(RefCell::new(state))),
			onunload: RefCell::new(None),
		}))
	}

	/// Typed access to the state, if it is an `S`.
	#[must_use]
	pub fn state<S: 'static>(&self) -> Option<State<S>> {
		self.0.state.downcast_ref::<Rc<RefCell<S>>>().map(|cell| State {
			cell: cell.clone(),
			controller: self.clone(),
		})
	}

	pub fn set_onunload(&self, hook: impl Fn(&UnloadEvent) + 'static) {
		*self.0.onunload.borrow_mut() = Some(Rc::new(hook));
	}

	#[must_use]
	pub fn has_onunload(&self) -> bool {
		self.0.onunload.borrow().is_some()
	}

	pub(crate) fn take_onunload(&self) -> Option<UnloadHook> {
		self.0.onunload.borrow_mut().take()
	}

	pub(crate) fn restore_onunload(&self, hook: UnloadHook) {
		self.0.onunload.borrow_mut().get_or_insert(hook);
	}

	/// Fires the unload hook once. Later calls are no-ops until a hook is registered again.
	pub(crate) fn unload(&self, event: &UnloadEvent) {
		if let Some(hook) = self.take_onunload() {
			hook(event)
		}
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}
impl Debug for Controller {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Controller")
			.field("at", &Rc::as_ptr(&self.0))
			.field("onunload", &self.has_onunload())
			.finish()
	}
}

/// Typed handle to a controller's state.
pub struct State<S> {
	cell: Rc<RefCell<S>>,
	controller: Controller,
}
impl<S> Clone for State<S> {
	fn clone(&self) -> Self {
		Self {
			cell: self.cell.clone(),
			controller: self.controller.clone(),
		}
	}
}
impl<S> State<S> {
	#[must_use]
	pub fn borrow(&self) -> Ref<'_, S> {
		self.cell.borrow()
	}

	#[must_use]
	pub fn borrow_mut(&self) -> RefMut<'_, S> {
		self.cell.borrow_mut()
	}

	pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
		f(&mut self.cell.borrow_mut())
	}

	pub fn on_unload(&self, hook: impl Fn(&UnloadEvent) + 'static) {
		self.controller.set_onunload(hook)
	}

	#[must_use]
	pub fn controller(&self) -> &Controller {
		&self.controller
	}
}

type Construct<A> = Rc<dyn Fn(&A) -> Controller>;
type View<A> = Rc<dyn Fn(&Controller, &A) -> Node>;

/// A component taking bound arguments of type `A`.
pub struct Component<A = ()> {
	id: ComponentId,
	construct: Construct<A>,
	view: View<A>,
}
impl<A> Clone for Component<A> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			construct: self.construct.clone(),
			view: self.view.clone(),
		}
	}
}
impl<A: 'static> Component<A> {
	pub fn new<S: 'static>(controller: impl Fn(&A) -> S + 'static, view: impl Fn(&State<S>, &A) -> Node + 'static) -> Self {
		Self {
			id: ComponentId::next(),
			construct: Rc::new(move |args| Controller::new(controller(args))),
			view: Rc::new(move |controller, args| match controller.state::<S>() {
				Some(state) => view(&state, args),
				None => {
					error!("Controller state type mismatch for component view; rendering nothing.");
					Node::empty()
				}
			}),
		}
	}

	/// A component without per-mount state.
	pub fn stateless(view: impl Fn(&A) -> Node + 'static) -> Self {
		Self::new(|_| (), move |_: &State<()>, args| view(args))
	}

	/// Installs `hook` as the unload hook of every controller this component constructs.
	#[must_use]
	pub fn on_unload<S: 'static>(self, hook: impl Fn(&State<S>, &UnloadEvent) + 'static) -> Self {
		let hook = Rc::new(hook);
		let construct = self.construct;
		Self {
			id: self.id,
			construct: Rc::new(move |args| {
				let controller = construct(args);
				let hook = hook.clone();
				let weak = Rc::downgrade(&controller.0);
				controller.set_onunload(move |event| {
					if let Some(state) = weak.upgrade().map(Controller).and_then(|controller| controller.state::<S>()) {
						hook(&state, event)
					}
				});
				controller
			}),
			view: self.view,
		}
	}

	#[must_use]
	pub fn id(&self) -> ComponentId {
		self.id
	}

	/// Binds `args`, producing a renderable reference.
	#[must_use]
	pub fn with(&self, args: A) -> ComponentRef {
		let args = Rc::new(args);
		let construct = self.construct.clone();
		let view = self.view.clone();
		let view_args = args.clone();
		ComponentRef {
			id: self.id,
			key: None,
			construct: Rc::new(move || construct(&args)),
			view: Rc::new(move |controller| view(controller, &view_args)),
		}
	}
}
impl Component<()> {
	#[must_use]
	pub fn reference(&self) -> ComponentRef {
		self.with(())
	}
}
impl<A> Debug for Component<A> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Component").field(&self.id).finish()
	}
}

/// A component with its arguments bound, as placed into a tree.
#[derive(Clone)]
pub struct ComponentRef {
	id: ComponentId,
	key: Option<Key>,
	construct: Rc<dyn Fn() -> Controller>,
	view: Rc<dyn Fn(&Controller) -> Node>,
}
impl ComponentRef {
	/// Keys the element this component renders to.
	#[must_use]
	pub fn key(mut self, key: impl Into<Key>) -> Self {
		self.key = Some(key.into());
		self
	}

	#[must_use]
	pub fn id(&self) -> ComponentId {
		self.id
	}

	#[must_use]
	pub fn key_ref(&self) -> Option<&Key> {
		self.key.as_ref()
	}

	#[must_use]
	pub fn construct(&self) -> Controller {
		(self.construct)()
	}

	#[must_use]
	pub fn view(&self, controller: &Controller) -> Node {
		(self.view)(controller)
	}
}
impl PartialEq for ComponentRef {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id && self.key == other.key
	}
}
impl Debug for ComponentRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComponentRef").field("id", &self.id).field("key", &self.key).finish_non_exhaustive()
	}
}

/// Controllers with unload hooks that must be consulted before the next mount transition.
#[derive(Debug, Default)]
pub(crate) struct Unloaders(Vec<Controller>);
impl Unloaders {
	pub(crate) fn register(&mut self, controller: &Controller) {
		if controller.has_onunload() && !self.0.iter().any(|registered| registered.ptr_eq(controller)) {
			self.0.push(controller.clone())
		}
	}

	pub(crate) fn take(&mut self) -> Vec<Controller> {
		core::mem::take(&mut self.0)
	}

	pub(crate) fn restore(&mut self, controllers: Vec<Controller>) {
		for controller in controllers {
			self.register(&controller)
		}
	}

	/// Forgets controllers whose hook already fired.
	pub(crate) fn prune(&mut self) {
		self.0.retain(Controller::has_onunload)
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.0.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unloaders_deduplicate() {
		let controller = Controller::new(1_u8);
		controller.set_onunload(|_| ());
		let mut unloaders = Unloaders::default();
		unloaders.register(&controller);
		unloaders.register(&controller.clone());
		unloaders.register(&Controller::new(2_u8));
		assert_eq!(unloaders.len(), 1);
		controller.unload(&UnloadEvent::teardown());
		unloaders.prune();
		assert_eq!(unloaders.len(), 0);
	}

	#[test]
	fn unload_fires_once() {
		let count = Rc::new(Cell::new(0));
		let controller = Controller::new(());
		let counter = count.clone();
		controller.set_onunload(move |event| {
			assert!(!event.is_cancelable());
			counter.set(counter.get() + 1)
		});
		controller.unload(&UnloadEvent::teardown());
		controller.unload(&UnloadEvent::teardown());
		assert_eq!(count.get(), 1);
	}

	#[test]
	fn component_identity_survives_rebinding() {
		let component = Component::new(|start: &u32| *start, |state, step: &u32| Node::from(*state.borrow() + step));
		let a = component.with(1);
		let b = component.with(2);
		assert_eq!(a.id(), b.id());
		let controller = a.construct();
		assert_eq!(b.view(&controller), Node::from(3_u32));
	}

	#[test]
	fn non_cancelable_events_ignore_prevention() {
		let event = UnloadEvent::teardown();
		event.prevent_default();
		assert!(!event.is_default_prevented());
	}
}
