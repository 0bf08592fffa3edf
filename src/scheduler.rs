//! Redraw scheduling.
//!
//! One [`Scheduler`] exists per [`App`](`crate::app::App`). It owns the pending-computation
//! counter that suspends automatic redraws while requests are in flight, the redraw strategy,
//! and frame-budget batching: a redraw requested while idle runs immediately and opens a frame
//! window, and every further request inside that window collapses into a single pass at its end.

use crate::{
	deferred::{ErrorHook, Rejection},
	error::RenderError,
};
use core::cell::{Cell, RefCell};
use std::{
	rc::{Rc, Weak},
	thread,
};
use tracing::{debug, error, instrument, trace, warn};

/// Length of a batching window.
pub const FRAME_BUDGET_MS: f64 = 16.0;

/// Upper bound for passes queued by redraw requests made during a pass.
const MAX_REQUEUED_PASSES: usize = 100;

/// How the next render pass treats existing elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
	/// Recreate every element unless its config context retains it.
	All,
	/// Patch in place, recreating only elements that opted out of retention.
	Diff,
	/// Skip the redraw an event handler would otherwise trigger.
	None,
}

pub type FrameId = u64;

/// Schedules frame callbacks.
pub trait FrameClock {
	/// Milliseconds on a monotonic scale.
	fn now(&self) -> f64;
	fn request_frame(&self, delay_ms: f64, callback: Box<dyn FnOnce()>) -> FrameId;
	fn cancel_frame(&self, frame: FrameId);
}

/// Whatever the scheduler redraws.
pub trait RedrawTarget {
	fn redraw_now(&self) -> Result<(), RenderError>;
}

pub struct Scheduler {
	this: Weak<Scheduler>,
	clock: Rc<dyn FrameClock>,
	target: RefCell<Option<Weak<dyn RedrawTarget>>>,
	pending: Cell<usize>,
	strategy: Cell<Strategy>,
	frame: Cell<Option<FrameId>>,
	trailing: Cell<bool>,
	redrawing: Cell<bool>,
	requeue: Cell<bool>,
	forcing: Cell<bool>,
	passes: Cell<u64>,
	last_redraw: Cell<Option<f64>>,
}
impl Scheduler {
	#[must_use]
	pub fn new(clock: Rc<dyn FrameClock>) -> Rc<Self> {
		Rc::new_cyclic(|this| Self {
			this: this.clone(),
			clock,
			target: RefCell::new(None),
			pending: Cell::new(0),
			strategy: Cell::new(Strategy::Diff),
			frame: Cell::new(None),
			trailing: Cell::new(false),
			redrawing: Cell::new(false),
			requeue: Cell::new(false),
			forcing: Cell::new(false),
			passes: Cell::new(0),
			last_redraw: Cell::new(None),
		})
	}

	pub fn start(&self, target: Weak<dyn RedrawTarget>) {
		*self.target.borrow_mut() = Some(target);
	}

	/// Detaches the target and cancels any scheduled frame.
	pub fn stop(&self) {
		if let Some(frame) = self.frame.take() {
			self.clock.cancel_frame(frame)
		}
		self.trailing.set(false);
		self.target.borrow_mut().take();
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.target().is_some()
	}

	fn target(&self) -> Option<Rc<dyn RedrawTarget>> {
		self.target.borrow().as_ref().and_then(Weak::upgrade)
	}

	#[must_use]
	pub fn pending_requests(&self) -> usize {
		self.pending.get()
	}

	pub fn start_computation(&self) {
		self.pending.set(self.pending.get() + 1)
	}

	/// Ends a computation, redrawing once the last one ends.
	pub fn end_computation(&self) -> Result<(), RenderError> {
		if self.pending.get() > 1 {
			self.pending.set(self.pending.get() - 1);
			Ok(())
		} else {
			self.pending.set(0);
			self.redraw(false)
		}
	}

	/// Ends the computation an event handler started, honoring [`Strategy::None`].
	pub(crate) fn end_first_computation(&self) -> Result<(), RenderError> {
		if self.strategy.get() == Strategy::None {
			self.pending.set(self.pending.get().saturating_sub(1));
			self.strategy.set(Strategy::Diff);
			Ok(())
		} else {
			self.end_computation()
		}
	}

	/// Forces the pending-computation counter back to zero without redrawing.
	pub fn reset_pending(&self) {
		if self.pending.replace(0) != 0 {
			debug!("Pending computation counter reset.");
		}
	}

	#[must_use]
	pub fn strategy(&self) -> Strategy {
		self.strategy.get()
	}

	pub fn set_strategy(&self, strategy: Strategy) {
		self.strategy.set(strategy)
	}

	/// Whether the pass currently running was forced.
	#[must_use]
	pub fn is_forcing(&self) -> bool {
		self.forcing.get()
	}

	/// Number of passes run so far.
	#[must_use]
	pub fn passes(&self) -> u64 {
		self.passes.get()
	}

	#[must_use]
	pub fn last_redraw(&self) -> Option<f64> {
		self.last_redraw.get()
	}

	/// Requests a redraw.
	///
	/// Runs a pass immediately if no frame window is open or `force` is set,
	/// otherwise defers to a single pass at the end of the current window.
	#[instrument(level = "trace", skip(self))]
	pub fn redraw(&self, force: bool) -> Result<(), RenderError> {
		if self.redrawing.get() {
			trace!("Redraw requested during a pass; queueing another.");
			self.requeue.set(true);
			return Ok(());
		}

		if self.frame.get().is_some() && !force {
			trace!("Deferring redraw to the end of the current frame.");
			self.trailing.set(true);
			return Ok(());
		}

		self.redrawing.set(true);
		self.forcing.set(force);
		let result = self.run_passes();
		self.redrawing.set(false);
		self.forcing.set(false);

		if self.frame.get().is_none() && self.is_running() {
			let this = self.this.clone();
			let frame = self.clock.request_frame(
				FRAME_BUDGET_MS,
				Box::new(move || {
					if let Some(this) = this.upgrade() {
						this.on_frame()
					}
				}),
			);
			self.frame.set(Some(frame));
		}
		result
	}

	fn run_passes(&self) -> Result<(), RenderError> {
		let target = match self.target() {
			Some(target) => target,
			None => {
				debug!("Redraw requested while the scheduler is stopped.");
				return Ok(());
			}
		};

		for _ in 0..MAX_REQUEUED_PASSES {
			self.requeue.set(false);
			let strategy = self.strategy.get();
			target.redraw_now()?;
			self.passes.set(self.passes.get() + 1);
			self.last_redraw.set(Some(self.clock.now()));
			if self.strategy.get() == strategy {
				self.strategy.set(Strategy::Diff);
			}
			if !self.requeue.get() {
				return Ok(());
			}
		}
		warn!("Gave up after {} consecutive requeued passes.", MAX_REQUEUED_PASSES);
		Ok(())
	}

	fn on_frame(&self) {
		self.frame.set(None);
		if self.trailing.replace(false) {
			if let Err(error) = self.redraw(false) {
				error!("Deferred redraw failed: {}", error)
			}
		}
	}

	/// An [`ErrorHook`] that fails fast on unhandled fatal rejections.
	///
	/// The pending counter is reset first, so a failed request cannot suspend redraws permanently.
	#[must_use]
	pub fn error_hook<E: Rejection + 'static>(&self) -> Rc<dyn ErrorHook<E>> {
		Rc::new(ResetOnFatal(self.this.clone()))
	}
}

struct ResetOnFatal(Weak<Scheduler>);
impl<E: Rejection> ErrorHook<E> for ResetOnFatal {
	fn unhandled(&self, error: &E) {
		if !error.is_fatal() {
			return warn!("Unhandled rejection: {}", error);
		}

		if let Some(scheduler) = self.0.upgrade() {
			scheduler.reset_pending()
		}
		if thread::panicking() {
			error!("Unhandled fatal rejection while unwinding: {}", error)
		} else {
			panic!("Unhandled fatal rejection: {}", error)
		}
	}
}

/// A [`FrameClock`] advanced by hand.
#[derive(Default)]
pub struct ManualClock {
	now: Cell<f64>,
	next: Cell<FrameId>,
	#[allow(clippy::type_complexity)]
	queue: RefCell<Vec<(FrameId, f64, Box<dyn FnOnce()>)>>,
}
impl ManualClock {
	#[must_use]
	pub fn new() -> Rc<Self> {
		Rc::new(Self::default())
	}

	/// Moves time forward by `ms`, running every frame callback that became due. Returns how many ran.
	pub fn advance(&self, ms: f64) -> usize {
		self.now.set(self.now.get() + ms);
		let mut fired = 0;
		loop {
			let due = {
				let mut queue = self.queue.borrow_mut();
				let now = self.now.get();
				queue.iter().position(|(_, at, _)| *at <= now).map(|i| queue.remove(i))
			};
			match due {
				Some((_, _, callback)) => {
					callback();
					fired += 1;
				}
				None => return fired,
			}
		}
	}

	#[must_use]
	pub fn pending_frames(&self) -> usize {
		self.queue.borrow().len()
	}
}
impl FrameClock for ManualClock {
	fn now(&self) -> f64 {
		self.now.get()
	}

	fn request_frame(&self, delay_ms: f64, callback: Box<dyn FnOnce()>) -> FrameId {
		let frame = self.next.get();
		self.next.set(frame + 1);
		self.queue.borrow_mut().push((frame, self.now.get() + delay_ms, callback));
		frame
	}

	fn cancel_frame(&self, frame: FrameId) {
		self.queue.borrow_mut().retain(|(id, _, _)| *id != frame)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default)]
	struct Counter(Cell<usize>);
	impl RedrawTarget for Counter {
		fn redraw_now(&self) -> Result<(), RenderError> {
			self.0.set(self.0.get() + 1);
			Ok(())
		}
	}

	fn started() -> (Rc<ManualClock>, Rc<Scheduler>, Rc<Counter>) {
		let clock = ManualClock::new();
		let scheduler = Scheduler::new(clock.clone());
		let counter = Rc::new(Counter::default());
		let target: Rc<dyn RedrawTarget> = counter.clone();
		scheduler.start(Rc::downgrade(&target));
		(clock, scheduler, counter)
	}

	#[test]
	fn counter_collapses_to_one_redraw() {
		let (_clock, scheduler, counter) = started();
		scheduler.start_computation();
		scheduler.start_computation();
		assert!(scheduler.end_computation().is_ok());
		assert_eq!(counter.0.get(), 0);
		assert!(scheduler.end_computation().is_ok());
		assert_eq!(counter.0.get(), 1);
		assert_eq!(scheduler.pending_requests(), 0);
	}

	#[test]
	fn strategy_none_skips_handler_redraw() {
		let (_clock, scheduler, counter) = started();
		scheduler.start_computation();
		scheduler.set_strategy(Strategy::None);
		assert!(scheduler.end_first_computation().is_ok());
		assert_eq!(counter.0.get(), 0);
		assert_eq!(scheduler.strategy(), Strategy::Diff);
	}

	#[test]
	fn stopped_scheduler_does_not_redraw() {
		let (clock, scheduler, counter) = started();
		scheduler.stop();
		assert!(scheduler.redraw(true).is_ok());
		assert_eq!(counter.0.get(), 0);
		assert_eq!(clock.pending_frames(), 0);
	}
}
