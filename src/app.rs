//! The application object.
//!
//! An [`App`] owns one [`Renderer`], one [`Scheduler`] and the list of mounted roots. Mounting
//! consults every registered unload hook first, so a transition can be vetoed before anything
//! is torn down, and routing is a thin layer that resolves a path and mounts the result.

use crate::{
	component::{ComponentRef, Controller, UnloadEvent, UnloadHook, Unloaders},
	diff::{DiffStats, PassContext, Renderer},
	error::{RenderError, RouteError},
	host::HostTree,
	query::{build_query_string, parse_query_string, Params},
	request::{Requests, Transport},
	router::{History, RouteMode, RouteTable},
	scheduler::{FrameClock, RedrawTarget, Scheduler, Strategy},
	vdom::{h, Element, Node},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{debug, error, instrument, trace, warn};

type RedrawHook = Box<dyn FnOnce()>;

struct Router<N> {
	root: N,
	default: String,
	table: RouteTable,
	history: Rc<dyn History>,
	current: Option<String>,
	params: Params,
}

struct AppInner<H: HostTree> {
	scheduler: Rc<Scheduler>,
	renderer: RefCell<Renderer<H>>,
	mounts: RefCell<Vec<(H::Node, ComponentRef)>>,
	unloaders: RefCell<Unloaders>,
	pre_redraw: RefCell<Option<RedrawHook>>,
	post_redraw: RefCell<Option<RedrawHook>>,
	router: RefCell<Option<Router<H::Node>>>,
	route_mode: Cell<RouteMode>,
	in_default_route: Cell<bool>,
}

/// A mounted application: renderer, scheduler and router for one host document.
pub struct App<H: HostTree>(Rc<AppInner<H>>);
impl<H: HostTree> Clone for App<H> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
impl<H: HostTree> Debug for App<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("App")
			.field("mounts", &self.0.mounts.borrow().len())
			.field("pending_requests", &self.0.scheduler.pending_requests())
			.finish_non_exhaustive()
	}
}

/// A non-owning [`App`] handle, for closures stored inside the rendered tree.
pub struct WeakApp<H: HostTree>(Weak<AppInner<H>>);
impl<H: HostTree> Clone for WeakApp<H> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
impl<H: HostTree + 'static> WeakApp<H> {
	#[must_use]
	pub fn upgrade(&self) -> Option<App<H>> {
		self.0.upgrade().map(App)
	}
}

impl<H: HostTree + 'static> App<H> {
	/// Creates an app and starts its scheduler.
	pub fn new(host: H, clock: Rc<dyn FrameClock>) -> Self {
		let inner = Rc::new(AppInner {
			scheduler: Scheduler::new(clock),
			renderer: RefCell::new(Renderer::new(host)),
			mounts: RefCell::default(),
			unloaders: RefCell::default(),
			pre_redraw: RefCell::default(),
			post_redraw: RefCell::default(),
			router: RefCell::default(),
			route_mode: Cell::default(),
			in_default_route: Cell::new(false),
		});
		let target: Rc<dyn RedrawTarget> = inner.clone();
		inner.scheduler.start(Rc::downgrade(&target));
		Self(inner)
	}

	#[must_use]
	pub fn downgrade(&self) -> WeakApp<H> {
		WeakApp(Rc::downgrade(&self.0))
	}

	#[must_use]
	pub fn scheduler(&self) -> &Rc<Scheduler> {
		&self.0.scheduler
	}

	/// Stops scheduling redraws. Mounted content stays as is.
	pub fn stop(&self) {
		self.0.scheduler.stop()
	}

	/// Runs `f` with the host document.
	///
	/// # Errors
	///
	/// [`RenderError::Busy`] if called from within a render pass.
	pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> Result<R, RenderError> {
		let renderer = self.0.renderer.try_borrow().map_err(|_| RenderError::Busy)?;
		Ok(f(renderer.host()))
	}

	/// Keyed-list statistics of the most recent pass.
	#[must_use]
	pub fn stats(&self) -> DiffStats {
		self.0.renderer.try_borrow().map(|renderer| renderer.last_stats()).unwrap_or_default()
	}

	/// Renders `tree` directly into `root`, outside of the mount list.
	///
	/// Event handlers in the tree still trigger redraws of mounted roots.
	///
	/// # Errors
	///
	/// Iff `root` is missing, the tree is malformed or a pass is already running.
	#[instrument(skip_all, fields(force_recreate = force_recreate))]
	pub fn render(&self, root: Option<&H::Node>, tree: impl Into<Node>, force_recreate: bool) -> Result<(), RenderError> {
		let (output, result) = {
			let mut renderer = self.0.renderer.try_borrow_mut().map_err(|_| RenderError::Busy)?;
			renderer.render_pass(root, tree.into(), force_recreate, self.0.pass_context())
		};
		self.0.register(output.finish());
		result
	}

	/// Requests a redraw of every mounted root. See [`Scheduler::redraw`].
	///
	/// # Errors
	///
	/// Iff the pass fails.
	pub fn redraw(&self, force: bool) -> Result<(), RenderError> {
		self.0.scheduler.redraw(force)
	}

	pub fn set_strategy(&self, strategy: Strategy) {
		self.0.scheduler.set_strategy(strategy)
	}

	pub fn start_computation(&self) {
		self.0.scheduler.start_computation()
	}

	/// # Errors
	///
	/// Iff this ended the last computation and the resulting redraw failed.
	pub fn end_computation(&self) -> Result<(), RenderError> {
		self.0.scheduler.end_computation()
	}

	#[must_use]
	pub fn requests(&self, transport: Rc<dyn Transport>) -> Requests {
		Requests::new(self.0.scheduler.clone(), transport)
	}

	/// Mounts `component` at `root`, replacing whatever was mounted there.
	///
	/// Every registered unload hook runs first with a cancelable event. If any of them prevents
	/// the default, nothing changes and this returns `Ok(false)`. With [`None`], the root is
	/// unmounted and its content removed.
	///
	/// # Errors
	///
	/// Iff the resulting redraw fails.
	#[instrument(skip_all, fields(unmount = component.is_none()))]
	pub fn mount(&self, root: &H::Node, component: Option<ComponentRef>) -> Result<bool, RenderError> {
		if !self.0.run_unloaders() {
			debug!("Mount canceled by an unload hook.");
			return Ok(false);
		}

		match component {
			Some(component) => {
				let scheduler = &self.0.scheduler;
				scheduler.set_strategy(Strategy::All);
				scheduler.start_computation();
				{
					let mut mounts = self.0.mounts.borrow_mut();
					match mounts.iter_mut().find(|slot| slot.0 == *root) {
						Some(slot) => slot.1 = component,
						None => mounts.push((root.clone(), component)),
					}
				}
				scheduler.end_first_computation()?;
			}
			None => {
				self.0.mounts.borrow_mut().retain(|(mounted, _)| mounted != root);
				self.0.renderer.try_borrow_mut().map_err(|_| RenderError::Busy)?.reset(root);
			}
		}
		Ok(true)
	}

	pub fn set_route_mode(&self, mode: RouteMode) {
		self.0.route_mode.set(mode)
	}

	#[must_use]
	pub fn route_mode(&self) -> RouteMode {
		self.0.route_mode.get()
	}

	/// Starts routing into `root` and mounts the route `history` currently points at.
	///
	/// Paths that match nothing redirect to `default`, which must itself match.
	///
	/// # Errors
	///
	/// Iff the initial route can't be mounted.
	#[instrument(skip_all, fields(default = &*default))]
	pub fn route_start(&self, root: &H::Node, default: &str, table: RouteTable, history: Rc<dyn History>) -> Result<(), RenderError> {
		*self.0.router.borrow_mut() = Some(Router {
			root: root.clone(),
			default: default.to_owned(),
			table,
			history: history.clone(),
			current: None,
			params: Params::new(),
		});
		*self.0.pre_redraw.borrow_mut() = Some(scroll_hook(&history));
		let location = history.location(self.route_mode());
		self.redirect(&location).map(drop)
	}

	/// Re-reads the history location, as after the user navigated back or forward.
	///
	/// # Errors
	///
	/// [`RouteError::NotStarted`], or iff mounting the new route fails.
	pub fn location_changed(&self) -> Result<(), RenderError> {
		let (location, current) = {
			let router = self.0.router.borrow();
			let router = router.as_ref().ok_or(RouteError::NotStarted)?;
			(router.history.location(self.route_mode()), router.current.clone())
		};
		if current.as_deref() != Some(&*location) {
			self.redirect(&location)?;
		}
		Ok(())
	}

	/// Navigates to `route`, merging `params` into its query string.
	///
	/// The history entry is written after the redraw. It replaces the current entry if `replace`
	/// is set or the route did not change. Returns whether the transition went through.
	///
	/// # Errors
	///
	/// [`RouteError::NotStarted`], or iff mounting the new route fails.
	#[instrument(skip_all, fields(route = route))]
	pub fn navigate(&self, route: &str, params: Params, replace: bool) -> Result<bool, RenderError> {
		let (history, previous) = {
			let router = self.0.router.borrow();
			let router = router.as_ref().ok_or(RouteError::NotStarted)?;
			(router.history.clone(), router.current.clone())
		};

		let (path, mut merged) = match route.split_once('?') {
			Some((path, query)) => (path, parse_query_string(query)),
			None => (route, Params::new()),
		};
		merged.extend(params);
		let query = build_query_string(merged.as_map());
		let target = if query.is_empty() {
			path.to_owned()
		} else {
			format!("{}?{}", path, query)
		};

		let replace = replace || previous.as_deref() == Some(route);
		let mode = self.route_mode();
		*self.0.pre_redraw.borrow_mut() = Some(scroll_hook(&history));
		let written = target.clone();
		*self.0.post_redraw.borrow_mut() = Some(Box::new(move || {
			if replace {
				history.replace(mode, &written)
			} else {
				history.push(mode, &written)
			}
		}));

		let mounted = self.redirect(&target)?;
		if !mounted {
			self.0.pre_redraw.borrow_mut().take();
			self.0.post_redraw.borrow_mut().take();
		}
		Ok(mounted)
	}

	/// Resolves `path` and mounts the match, falling back to the default route once.
	fn redirect(&self, path: &str) -> Result<bool, RenderError> {
		let (root, resolved, previous, default) = {
			let mut router = self.0.router.borrow_mut();
			let router = router.as_mut().ok_or(RouteError::NotStarted)?;
			let previous = router.current.replace(path.to_owned());
			(router.root.clone(), router.table.resolve(path), previous, router.default.clone())
		};

		let resolved = match resolved {
			Some(resolved) => resolved,
			None => {
				if self.0.in_default_route.get() {
					return Err(RouteError::DefaultRouteUnmatched(default).into());
				}
				trace!(path, "No route matched; falling back to the default.");
				self.0.in_default_route.set(true);
				let result = self.navigate(&default, Params::new(), true);
				self.0.in_default_route.set(false);
				if result == Ok(false) {
					self.0.with_router(|router| router.current = previous);
				}
				return result;
			}
		};

		let previous_params = self.0.with_router(|router| core::mem::replace(&mut router.params, resolved.params));
		let mounted = self.mount(&root, Some(resolved.component))?;
		if !mounted {
			self.0.with_router(|router| {
				router.current = previous;
				if let Some(params) = previous_params {
					router.params = params;
				}
			});
		}
		Ok(mounted)
	}

	/// The current route, without its mode prefix.
	#[must_use]
	pub fn current_route(&self) -> Option<String> {
		self.0.router.borrow().as_ref().and_then(|router| router.current.clone())
	}

	/// A parameter of the current route, from its path captures or query string.
	///
	/// # Errors
	///
	/// [`RouteError::NotStarted`].
	pub fn param(&self, key: &str) -> Result<Option<Value>, RouteError> {
		let router = self.0.router.borrow();
		let router = router.as_ref().ok_or(RouteError::NotStarted)?;
		Ok(router.params.get(key).cloned())
	}

	/// # Errors
	///
	/// [`RouteError::NotStarted`].
	pub fn params(&self) -> Result<Params, RouteError> {
		let router = self.0.router.borrow();
		Ok(router.as_ref().ok_or(RouteError::NotStarted)?.params.clone())
	}

	/// An anchor to `route` that navigates without leaving the page.
	///
	/// Clicking it clears pending requests first, so the route change renders immediately.
	#[must_use]
	pub fn link(&self, route: &str) -> Element {
		let app = self.downgrade();
		let target = route.to_owned();
		h("a").attr("href", format!("{}{}", self.route_mode().prefix(), route)).on("click", move |event| {
			event.prevent_default();
			if let Some(app) = app.upgrade() {
				app.0.scheduler.reset_pending();
				if let Err(error) = app.navigate(&target, Params::new(), false) {
					error!("Link navigation to {:?} failed: {}", target, error)
				}
			}
		})
	}
}

fn scroll_hook(history: &Rc<dyn History>) -> RedrawHook {
	let history = history.clone();
	Box::new(move || history.scroll_to_top())
}

impl<H: HostTree + 'static> AppInner<H> {
	fn pass_context(&self) -> PassContext {
		PassContext {
			strategy: self.scheduler.strategy(),
			suspended: self.scheduler.pending_requests() > 0 && !self.scheduler.is_forcing(),
			scheduler: Some(Rc::downgrade(&self.scheduler)),
		}
	}

	fn register(&self, controllers: Vec<Controller>) {
		let mut unloaders = self.unloaders.borrow_mut();
		unloaders.prune();
		for controller in &controllers {
			unloaders.register(controller)
		}
	}

	/// Fires every registered unload hook with one cancelable event.
	///
	/// Returns `false` and restores all hooks if one of them prevented the default.
	fn run_unloaders(&self) -> bool {
		let taken: Vec<(Controller, UnloadHook)> = self
			.unloaders
			.borrow_mut()
			.take()
			.into_iter()
			.filter_map(|controller| controller.take_onunload().map(|hook| (controller, hook)))
			.collect();
		if taken.is_empty() {
			return true;
		}

		let event = UnloadEvent::cancelable();
		for (_, hook) in &taken {
			hook(&event)
		}
		if !event.is_default_prevented() {
			return true;
		}

		let mut restored = Vec::with_capacity(taken.len());
		for (controller, hook) in taken {
			controller.restore_onunload(hook);
			restored.push(controller);
		}
		self.unloaders.borrow_mut().restore(restored);
		false
	}

	fn with_router<R>(&self, f: impl FnOnce(&mut Router<H::Node>) -> R) -> Option<R> {
		self.router.borrow_mut().as_mut().map(f)
	}
}

impl<H: HostTree + 'static> RedrawTarget for AppInner<H> {
	fn redraw_now(&self) -> Result<(), RenderError> {
		let pre_redraw = self.pre_redraw.borrow_mut().take();
		if let Some(hook) = pre_redraw {
			hook()
		}

		let context = self.pass_context();
		let mounts = self.mounts.borrow().clone();
		let (outputs, result) = {
			let mut renderer = match self.renderer.try_borrow_mut() {
				Ok(renderer) => renderer,
				Err(_) => {
					warn!("Redraw requested while the renderer is busy.");
					return Err(RenderError::Busy);
				}
			};
			let mut outputs = Vec::with_capacity(mounts.len());
			let mut result = Ok(());
			for (root, component) in mounts {
				let (output, pass) = renderer.render_pass(Some(&root), Node::Component(component), false, context.clone());
				outputs.push(output);
				if let Err(error) = pass {
					result = Err(error);
					break;
				}
			}
			(outputs, result)
		};
		// Roots rendered before a failure are live, so their hooks still run.
		for output in outputs {
			self.register(output.finish())
		}
		result?;

		let post_redraw = self.post_redraw.borrow_mut().take();
		if let Some(hook) = post_redraw {
			hook()
		}
		Ok(())
	}
}
