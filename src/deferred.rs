//! A synchronous deferred value.
//!
//! Continuations run at the moment a [`Deferred`] settles, in the same call, rather than on a
//! later turn. Request completion relies on this: user continuations have already run (and
//! mutated state) by the time the pending-request counter is decremented and a redraw starts.

use crate::prop::Prop;
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Display, Formatter},
	mem,
};
use std::rc::Rc;
use tracing::{error, warn};

/// Classifies rejection values.
///
/// Fatal rejections are programmer errors: left unhandled, they reset the pending-request
/// counter and are re-raised. Non-fatal ones are data errors and only logged.
pub trait Rejection: Display {
	fn is_fatal(&self) -> bool {
		false
	}
}

/// Receives rejections that were never observed by any continuation.
pub trait ErrorHook<E> {
	fn unhandled(&self, error: &E);
}

/// The fallback hook: logs and swallows.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUnhandled;
impl<E: Display> ErrorHook<E> for LogUnhandled {
	fn unhandled(&self, error: &E) {
		warn!("Unhandled rejection: {}", error)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
	Pending,
	Resolved,
	Rejected,
}

type Callback<T, E> = Box<dyn FnOnce(Result<T, E>)>;

enum Slot<T, E> {
	Pending(Vec<Callback<T, E>>),
	Resolved(T),
	Rejected(E),
}

struct Shared<T, E> {
	slot: RefCell<Slot<T, E>>,
	observed: Cell<bool>,
	hook: Option<Rc<dyn ErrorHook<E>>>,
}
impl<T, E> Drop for Shared<T, E> {
	fn drop(&mut self) {
		if let Slot::Rejected(error) = self.slot.get_mut() {
			if !self.observed.get() {
				if let Some(hook) = &self.hook {
					hook.unhandled(error)
				}
			}
		}
	}
}

/// The read side of a [`Deferred`].
pub struct Promise<T, E> {
	shared: Rc<Shared<T, E>>,
}
impl<T, E> Clone for Promise<T, E> {
	fn clone(&self) -> Self {
		Self { shared: self.shared.clone() }
	}
}

/// The write side: settles its [`Promise`] at most once.
pub struct Deferred<T, E> {
	promise: Promise<T, E>,
}
impl<T, E> Clone for Deferred<T, E> {
	fn clone(&self) -> Self {
		Self { promise: self.promise.clone() }
	}
}

/// What a continuation resolves its link with.
pub enum Chain<T, E> {
	Resolve(T),
	Reject(E),
	/// Adopt another promise's outcome once it settles.
	Follow(Promise<T, E>),
}
impl<T, E> From<Result<T, E>> for Chain<T, E> {
	fn from(result: Result<T, E>) -> Self {
		match result {
			Ok(value) => Chain::Resolve(value),
			Err(error) => Chain::Reject(error),
		}
	}
}
impl<T, E> From<Promise<T, E>> for Chain<T, E> {
	fn from(promise: Promise<T, E>) -> Self {
		Chain::Follow(promise)
	}
}

impl<T: Clone + 'static, E: Clone + Display + 'static> Default for Deferred<T, E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Clone + 'static, E: Clone + 'static> Deferred<T, E> {
	/// A deferred whose unobserved rejections are logged.
	#[must_use]
	pub fn new() -> Self
	where
		E: Display,
	{
		Self::with_hook(Rc::new(LogUnhandled))
	}

	/// A deferred whose unobserved rejections go to `hook`.
	///
	/// Links created through [`Promise::then_with`] and friends inherit the hook.
	#[must_use]
	pub fn with_hook(hook: Rc<dyn ErrorHook<E>>) -> Self {
		Self::with_hook_option(Some(hook))
	}

	fn with_hook_option(hook: Option<Rc<dyn ErrorHook<E>>>) -> Self {
		Self {
			promise: Promise {
				shared: Rc::new(Shared {
					slot: RefCell::new(Slot::Pending(Vec::new())),
					observed: Cell::new(false),
					hook,
				}),
			},
		}
	}

	#[must_use]
	pub fn promise(&self) -> Promise<T, E> {
		self.promise.clone()
	}

	/// Returns whether this call settled the promise.
	pub fn resolve(&self, value: T) -> bool {
		self.settle(Ok(value))
	}

	/// Returns whether this call settled the promise.
	pub fn reject(&self, error: E) -> bool {
		self.settle(Err(error))
	}

	pub fn settle(&self, outcome: Result<T, E>) -> bool {
		let callbacks = {
			let mut slot = self.promise.shared.slot.borrow_mut();
			let callbacks = match &mut *slot {
				Slot::Pending(callbacks) => mem::take(callbacks),
				Slot::Resolved(_) | Slot::Rejected(_) => return false,
			};
			*slot = match &outcome {
				Ok(value) => Slot::Resolved(value.clone()),
				Err(error) => Slot::Rejected(error.clone()),
			};
			callbacks
		};
		for callback in callbacks {
			callback(outcome.clone())
		}
		true
	}

	fn follow(&self, chain: Chain<T, E>) {
		match chain {
			Chain::Resolve(value) => {
				self.resolve(value);
			}
			Chain::Reject(error) => {
				self.reject(error);
			}
			Chain::Follow(promise) => {
				if Rc::ptr_eq(&promise.shared, &self.promise.shared) {
					return error!("A promise cannot follow itself; leaving it pending.");
				}
				let this = self.clone();
				promise.subscribe(Box::new(move |outcome| {
					this.settle(outcome);
				}));
			}
		}
	}
}

impl<T: Clone + 'static, E: Clone + 'static> Promise<T, E> {
	#[must_use]
	pub fn resolved(value: T) -> Self
	where
		E: Display,
	{
		let deferred = Deferred::new();
		deferred.resolve(value);
		deferred.promise()
	}

	#[must_use]
	pub fn rejected(error: E) -> Self
	where
		E: Display,
	{
		let deferred = Deferred::new();
		deferred.reject(error);
		deferred.promise()
	}

	#[must_use]
	pub fn state(&self) -> PromiseState {
		match &*self.shared.slot.borrow() {
			Slot::Pending(_) => PromiseState::Pending,
			Slot::Resolved(_) => PromiseState::Resolved,
			Slot::Rejected(_) => PromiseState::Rejected,
		}
	}

	/// The resolved value, if any.
	#[must_use]
	pub fn value(&self) -> Option<T> {
		match &*self.shared.slot.borrow() {
			Slot::Resolved(value) => Some(value.clone()),
			Slot::Pending(_) | Slot::Rejected(_) => None,
		}
	}

	/// The rejection value, if any. Reading it counts as handling it.
	#[must_use]
	pub fn error(&self) -> Option<E> {
		match &*self.shared.slot.borrow() {
			Slot::Rejected(error) => {
				self.shared.observed.set(true);
				Some(error.clone())
			}
			Slot::Pending(_) | Slot::Resolved(_) => None,
		}
	}

	fn subscribe(&self, callback: Callback<T, E>) {
		self.shared.observed.set(true);
		let outcome = match &mut *self.shared.slot.borrow_mut() {
			Slot::Pending(callbacks) => return callbacks.push(callback),
			Slot::Resolved(value) => Ok(value.clone()),
			Slot::Rejected(error) => Err(error.clone()),
		};
		callback(outcome)
	}

	/// Chains both outcomes into a new link.
	pub fn then_with<U, A, B>(&self, on_resolve: impl FnOnce(T) -> A + 'static, on_reject: impl FnOnce(E) -> B + 'static) -> Promise<U, E>
	where
		U: Clone + 'static,
		A: Into<Chain<U, E>>,
		B: Into<Chain<U, E>>,
	{
		let next = Deferred::with_hook_option(self.shared.hook.clone());
		let promise = next.promise();
		self.subscribe(Box::new(move |outcome| {
			let chain = match outcome {
				Ok(value) => on_resolve(value).into(),
				Err(error) => on_reject(error).into(),
			};
			next.follow(chain);
		}));
		promise
	}

	/// Maps the resolved value. An `Err` returned from `f` rejects the next link.
	pub fn then<U: Clone + 'static>(&self, f: impl FnOnce(T) -> Result<U, E> + 'static) -> Promise<U, E> {
		self.then_with(f, Chain::Reject)
	}

	/// Continues with another promise, adopting its outcome.
	pub fn and_then<U: Clone + 'static>(&self, f: impl FnOnce(T) -> Promise<U, E> + 'static) -> Promise<U, E> {
		self.then_with(f, Chain::Reject)
	}

	/// Recovers from a rejection.
	pub fn catch(&self, f: impl FnOnce(E) -> Result<T, E> + 'static) -> Promise<T, E> {
		self.then_with(Chain::Resolve, f)
	}

	/// Runs `f` on resolution for its side effects.
	pub fn tap(&self, f: impl FnOnce(&T) + 'static) -> Promise<T, E> {
		self.then_with(
			move |value| {
				f(&value);
				Chain::Resolve(value)
			},
			Chain::Reject,
		)
	}

	/// A getter/setter that holds `initial` until this promise resolves, then the resolved value.
	pub fn to_prop(&self, initial: T) -> Prop<T> {
		let prop = Prop::new(self.value().unwrap_or(initial));
		let target = prop.clone();
		drop(self.tap(move |value| target.set(value.clone())));
		prop
	}
}

impl<T, E> Debug for Promise<T, E> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let state = match &*self.shared.slot.borrow() {
			Slot::Pending(_) => PromiseState::Pending,
			Slot::Resolved(_) => PromiseState::Resolved,
			Slot::Rejected(_) => PromiseState::Rejected,
		};
		f.debug_struct("Promise").field("state", &state).finish_non_exhaustive()
	}
}

/// Resolves with every value in order once all `promises` resolve,
/// or rejects with the first rejection once all of them have settled.
pub fn sync<T, E>(promises: Vec<Promise<T, E>>) -> Promise<Vec<T>, E>
where
	T: Clone + 'static,
	E: Clone + 'static,
{
	let hook = promises.first().and_then(|promise| promise.shared.hook.clone());
	let deferred = Deferred::with_hook_option(hook);
	if promises.is_empty() {
		deferred.resolve(Vec::new());
		return deferred.promise();
	}

	let outstanding = Rc::new(Cell::new(promises.len()));
	let values = Rc::new(RefCell::new(vec![None; promises.len()]));
	let first_error = Rc::new(RefCell::new(None));
	for (i, promise) in promises.into_iter().enumerate() {
		let (deferred, outstanding, values, first_error) = (deferred.clone(), outstanding.clone(), values.clone(), first_error.clone());
		promise.subscribe(Box::new(move |outcome| {
			match outcome {
				Ok(value) => values.borrow_mut()[i] = Some(value),
				Err(error) => {
					first_error.borrow_mut().get_or_insert(error);
				}
			}
			outstanding.set(outstanding.get() - 1);
			if outstanding.get() == 0 {
				match first_error.borrow_mut().take() {
					Some(error) => deferred.reject(error),
					None => deferred.resolve(values.borrow_mut().drain(..).flatten().collect()),
				};
			}
		}));
	}
	deferred.promise()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq)]
	struct Fault(&'static str);
	impl Display for Fault {
		fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
			f.write_str(self.0)
		}
	}

	#[test]
	fn settles_once() {
		let deferred = Deferred::<u8, Fault>::new();
		assert!(deferred.resolve(1));
		assert!(!deferred.resolve(2));
		assert!(!deferred.reject(Fault("late")));
		assert_eq!(deferred.promise().value(), Some(1));
	}

	#[test]
	fn continuations_run_synchronously() {
		let deferred = Deferred::<u8, Fault>::new();
		let seen = Rc::new(Cell::new(0));
		let sink = seen.clone();
		drop(deferred.promise().tap(move |value| sink.set(*value)));
		assert_eq!(seen.get(), 0);
		deferred.resolve(5);
		assert_eq!(seen.get(), 5);
	}

	#[test]
	fn self_follow_stays_pending() {
		let deferred = Deferred::<u8, Fault>::new();
		deferred.follow(Chain::Follow(deferred.promise()));
		assert_eq!(deferred.promise().state(), PromiseState::Pending);
	}
}
