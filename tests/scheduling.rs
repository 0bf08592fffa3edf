use std::{cell::Cell, rc::Rc};
use tendril_dom::{
	h,
	memory::{MemoryDocument, NodeId},
	scheduler::{ManualClock, FRAME_BUDGET_MS},
	App, Component, Node, RenderError, Strategy,
};

struct Fixture {
	document: MemoryDocument,
	root: NodeId,
	clock: Rc<ManualClock>,
	app: App<MemoryDocument>,
	views: Rc<Cell<usize>>,
}

/// Mounts a component that counts its views and renders a button whose click handler optionally opts out of redrawing.
fn mounted() -> Fixture {
	let document = MemoryDocument::new();
	let root = document.create_root("body");
	let clock = ManualClock::new();
	let app = App::new(document.clone(), clock.clone());
	let views = Rc::new(Cell::new(0));

	let weak = app.downgrade();
	let counter = views.clone();
	let component = Component::stateless(move |_: &()| {
		counter.set(counter.get() + 1);
		let weak = weak.clone();
		h("div")
			.child(h("button.quiet").on("click", move |_| {
				if let Some(app) = weak.upgrade() {
					app.set_strategy(Strategy::None)
				}
			}))
			.child(h("button.loud").on("click", |_| ()))
			.into()
	});
	app.mount(&root, Some(component.reference())).unwrap();
	Fixture {
		document,
		root,
		clock,
		app,
		views,
	}
}

#[test]
fn requests_inside_a_frame_collapse() {
	let Fixture { clock, app, views, .. } = mounted();
	assert_eq!(views.get(), 1);

	for _ in 0..5 {
		app.redraw(false).unwrap();
	}
	assert_eq!(views.get(), 1);

	assert_eq!(clock.advance(FRAME_BUDGET_MS), 1);
	assert_eq!(views.get(), 2);

	// The trailing pass opened another window, which closes without work.
	assert_eq!(clock.advance(FRAME_BUDGET_MS), 1);
	assert_eq!(views.get(), 2);
	assert_eq!(clock.pending_frames(), 0);
}

#[test]
fn idle_redraw_runs_immediately() {
	let Fixture { clock, app, views, .. } = mounted();
	clock.advance(FRAME_BUDGET_MS);
	app.redraw(false).unwrap();
	assert_eq!(views.get(), 2);
}

#[test]
fn forced_redraw_skips_batching() {
	let Fixture { app, views, .. } = mounted();
	app.redraw(true).unwrap();
	app.redraw(true).unwrap();
	assert_eq!(views.get(), 3);
	assert_eq!(app.scheduler().passes(), 3);
}

#[test]
fn pending_computations_suspend_redraws() {
	let Fixture { clock, app, views, .. } = mounted();
	clock.advance(FRAME_BUDGET_MS);

	app.start_computation();
	app.start_computation();
	app.end_computation().unwrap();
	assert_eq!(views.get(), 1);
	app.end_computation().unwrap();
	assert_eq!(views.get(), 2);
	assert_eq!(app.scheduler().pending_requests(), 0);
}

#[test]
fn handlers_redraw_unless_they_opt_out() {
	let Fixture {
		document,
		root,
		clock,
		views,
		..
	} = mounted();
	clock.advance(FRAME_BUDGET_MS);
	let container = document.children(root)[0];
	let (quiet, loud) = (document.children(container)[0], document.children(container)[1]);

	document.dispatch(quiet, "click").unwrap();
	assert_eq!(views.get(), 1);

	document.dispatch(loud, "click").unwrap();
	assert_eq!(views.get(), 2);
}

#[test]
fn strategy_resets_after_a_pass() {
	let Fixture { clock, app, .. } = mounted();
	clock.advance(FRAME_BUDGET_MS);
	app.set_strategy(Strategy::All);
	app.redraw(false).unwrap();
	assert_eq!(app.scheduler().strategy(), Strategy::Diff);
}

#[test]
fn stopped_app_does_not_redraw() {
	let Fixture { clock, app, views, .. } = mounted();
	app.stop();
	assert_eq!(clock.pending_frames(), 0);
	app.redraw(true).unwrap();
	assert_eq!(views.get(), 1);
}

#[test]
fn failing_root_still_finishes_earlier_roots() {
	let document = MemoryDocument::new();
	let (first, second) = (document.create_root("header"), document.create_root("main"));
	let clock = ManualClock::new();
	let app = App::new(document.clone(), clock.clone());

	let configured = Rc::new(Cell::new(0));
	let counter = configured.clone();
	let healthy = Component::stateless(move |_: &()| {
		let counter = counter.clone();
		h("nav").config(move |_, _, _| counter.set(counter.get() + 1)).into()
	});
	let broken = Rc::new(Cell::new(false));
	let flag = broken.clone();
	let flaky = Component::stateless(move |_: &()| if flag.get() { Node::from("loose text") } else { h("section").into() });

	app.mount(&first, Some(healthy.reference())).unwrap();
	app.mount(&second, Some(flaky.reference())).unwrap();
	clock.advance(FRAME_BUDGET_MS);
	let before = configured.get();

	broken.set(true);
	assert!(matches!(app.redraw(true), Err(RenderError::InvalidComponentRoot(_))));
	assert_eq!(configured.get(), before + 1);
	assert_eq!(document.inner_html(second), "<section></section>");
}
