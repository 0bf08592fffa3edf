use std::{cell::RefCell, rc::Rc};
use tendril_dom::{
	component::{State, UnloadEvent},
	h,
	memory::{MemoryDocument, NodeId},
	scheduler::{ManualClock, FRAME_BUDGET_MS},
	App, Component, Renderer,
};

type Log = Rc<RefCell<Vec<String>>>;

fn page(name: &'static str, veto: bool, log: &Log) -> Component {
	let log = log.clone();
	Component::stateless(move |_: &()| h("div").child(name).into()).on_unload(move |_: &State<()>, event: &UnloadEvent| {
		log.borrow_mut().push(format!("{} cancelable={}", name, event.is_cancelable()));
		if veto {
			event.prevent_default()
		}
	})
}

fn setup() -> (MemoryDocument, NodeId, Rc<ManualClock>, App<MemoryDocument>) {
	let document = MemoryDocument::new();
	let root = document.create_root("body");
	let clock = ManualClock::new();
	let app = App::new(document.clone(), clock.clone());
	(document, root, clock, app)
}

#[test]
fn mount_fires_previous_unload_once() {
	let (document, root, clock, app) = setup();
	let log = Log::default();
	let a = page("a", false, &log);
	let b = page("b", false, &log);

	assert_eq!(app.mount(&root, Some(a.reference())), Ok(true));
	assert_eq!(document.inner_html(root), "<div>a</div>");

	assert_eq!(app.mount(&root, Some(b.reference())), Ok(true));
	assert_eq!(*log.borrow(), vec!["a cancelable=true"]);
	// Still inside the first pass's frame window.
	assert_eq!(document.inner_html(root), "<div>a</div>");

	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<div>b</div>");
	assert_eq!(*log.borrow(), vec!["a cancelable=true"]);
}

#[test]
fn previous_unload_precedes_next_construction() {
	let (_document, root, clock, app) = setup();
	let log = Log::default();
	app.mount(&root, Some(page("old", false, &log).reference())).unwrap();

	let constructed = log.clone();
	let next = Component::new(
		move |_: &()| constructed.borrow_mut().push("new constructed".to_owned()),
		|_: &State<()>, _: &()| h("div").into(),
	);
	app.mount(&root, Some(next.reference())).unwrap();
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(*log.borrow(), vec!["old cancelable=true", "new constructed"]);
}

#[test]
fn vetoed_mount_changes_nothing() {
	let (document, root, clock, app) = setup();
	let log = Log::default();
	let stubborn = page("stubborn", true, &log);
	let next = page("next", false, &log);

	app.mount(&root, Some(stubborn.reference())).unwrap();
	assert_eq!(app.mount(&root, Some(next.reference())), Ok(false));
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<div>stubborn</div>");

	// The hook is consulted again on the next attempt.
	assert_eq!(app.mount(&root, Some(next.reference())), Ok(false));
	assert_eq!(log.borrow().len(), 2);
}

#[test]
fn repeated_redraws_register_hooks_once() {
	let (_document, root, _clock, app) = setup();
	let log = Log::default();
	let a = page("a", false, &log);

	app.mount(&root, Some(a.reference())).unwrap();
	app.redraw(true).unwrap();
	app.redraw(true).unwrap();
	app.mount(&root, Some(page("b", false, &log).reference())).unwrap();
	assert_eq!(*log.borrow(), vec!["a cancelable=true"]);
}

#[test]
fn unmount_clears_root() {
	let (document, root, _clock, app) = setup();
	let log = Log::default();
	app.mount(&root, Some(page("a", false, &log).reference())).unwrap();
	assert_eq!(app.mount(&root, None), Ok(true));
	assert_eq!(document.inner_html(root), "");
	assert_eq!(*log.borrow(), vec!["a cancelable=true"]);
}

#[test]
fn removed_subcomponent_unloads_without_veto() {
	let document = MemoryDocument::new();
	let root = document.create_root("body");
	let mut renderer = Renderer::new(document.clone());
	let log = Log::default();
	let child = page("child", true, &log);

	renderer.render(Some(&root), h("div").child(child.reference()), false).unwrap();
	renderer.render(Some(&root), h("div"), false).unwrap();
	assert_eq!(*log.borrow(), vec!["child cancelable=false"]);
	assert_eq!(document.inner_html(root), "<div></div>");
}

#[test]
fn controller_state_survives_redraws() {
	let (document, root, _clock, app) = setup();
	let counter = Component::new(
		|start: &u32| *start,
		|state: &State<u32>, _: &u32| {
			let state = state.clone();
			let count = *state.borrow();
			h("button").child(count).on("click", move |_| *state.borrow_mut() += 1).into()
		},
	);

	app.mount(&root, Some(counter.with(5))).unwrap();
	let button = document.children(root)[0];
	assert_eq!(document.text(button), "5");

	document.dispatch(button, "click").unwrap();
	document.dispatch(button, "click").unwrap();
	app.redraw(true).unwrap();
	assert_eq!(document.text(document.children(root)[0]), "7");
}
