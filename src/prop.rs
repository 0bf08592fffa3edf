use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use serde::{Serialize, Serializer};
use std::rc::Rc;

/// A shared getter/setter cell, handy as form state bound through
/// [`EventHandler::with_attr`](`crate::vdom::EventHandler::with_attr`).
///
/// Serializes as its current value.
pub struct Prop<T>(Rc<RefCell<T>>);
impl<T> Clone for Prop<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
impl<T> Prop<T> {
	pub fn new(value: T) -> Self {
		Self(Rc::new(RefCell::new(value)))
	}

	pub fn set(&self, value: T) {
		*self.0.borrow_mut() = value;
	}

	pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		f(&mut self.0.borrow_mut())
	}

	pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		f(&self.0.borrow())
	}
}
impl<T: Clone> Prop<T> {
	#[must_use]
	pub fn get(&self) -> T {
		self.0.borrow().clone()
	}
}
impl<T: Default> Default for Prop<T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}
impl<T: Serialize> Serialize for Prop<T> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.0.borrow().serialize(serializer)
	}
}
impl<T: Debug> Debug for Prop<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Prop").field(&*self.0.borrow()).finish()
	}
}
