use serde_json::json;
use std::{
	cell::{Cell, RefCell},
	panic::{self, AssertUnwindSafe},
	rc::Rc,
};
use tendril_dom::{
	deferred::PromiseState,
	h,
	memory::{MemoryDocument, NodeId},
	request::{Completion, PreparedRequest, RequestError, RequestOptions, Response, Transport},
	scheduler::{ManualClock, FRAME_BUDGET_MS},
	App, Component, Promise,
};

/// Holds requests until the test completes them.
#[derive(Default)]
struct Manual {
	queue: RefCell<Vec<(PreparedRequest, Completion)>>,
}
impl Transport for Manual {
	fn send(&self, request: PreparedRequest, complete: Completion) {
		self.queue.borrow_mut().push((request, complete))
	}
}
impl Manual {
	fn complete_next(&self, outcome: Result<Response, String>) -> PreparedRequest {
		let (request, complete) = self.queue.borrow_mut().remove(0);
		complete(outcome);
		request
	}
}

struct Fixture {
	document: MemoryDocument,
	root: NodeId,
	clock: Rc<ManualClock>,
	app: App<MemoryDocument>,
	transport: Rc<Manual>,
	views: Rc<Cell<usize>>,
}

fn setup() -> Fixture {
	let document = MemoryDocument::new();
	let root = document.create_root("body");
	let clock = ManualClock::new();
	let app = App::new(document.clone(), clock.clone());
	let views = Rc::new(Cell::new(0));
	let counter = views.clone();
	let component = Component::stateless(move |_: &()| {
		counter.set(counter.get() + 1);
		h("div").into()
	});
	app.mount(&root, Some(component.reference())).unwrap();
	clock.advance(FRAME_BUDGET_MS);
	Fixture {
		document,
		root,
		clock,
		app,
		transport: Rc::new(Manual::default()),
		views,
	}
}

#[test]
fn concurrent_requests_redraw_once() {
	let Fixture { app, transport, views, .. } = setup();
	let requests = app.requests(transport.clone());
	let users: Promise<Vec<String>, RequestError> = requests.send(RequestOptions::get("/api/users"));
	let count: Promise<u32, RequestError> = requests.send(RequestOptions::get("/api/count"));
	assert_eq!(app.scheduler().pending_requests(), 2);

	let seen = Rc::new(Cell::new(0));
	let sink = seen.clone();
	let views_at_continuation = Rc::new(Cell::new(0));
	let (probe, counter) = (views_at_continuation.clone(), views.clone());
	drop(count.tap(move |count| {
		sink.set(*count);
		probe.set(counter.get());
	}));

	transport.complete_next(Ok(Response::new(200, r#"["ada","brendan"]"#)));
	assert_eq!(views.get(), 1);
	assert_eq!(users.value(), Some(vec!["ada".to_owned(), "brendan".to_owned()]));

	transport.complete_next(Ok(Response::new(200, "3")));
	assert_eq!(seen.get(), 3);
	// Continuations run before the redraw.
	assert_eq!(views_at_continuation.get(), 1);
	assert_eq!(views.get(), 2);
	assert_eq!(app.scheduler().pending_requests(), 0);
}

#[test]
fn background_requests_do_not_suspend() {
	let Fixture { app, transport, views, .. } = setup();
	let requests = app.requests(transport.clone());
	let value: Promise<u8, RequestError> = requests.send(RequestOptions::get("/api/poll").background(true));
	assert_eq!(app.scheduler().pending_requests(), 0);
	transport.complete_next(Ok(Response::new(200, "1")));
	assert_eq!(value.value(), Some(1));
	assert_eq!(views.get(), 1);
}

#[test]
fn url_parameters_and_query_are_bound() {
	let Fixture { app, transport, .. } = setup();
	let requests = app.requests(transport.clone());
	let _ignored: Promise<serde_json::Value, RequestError> = requests.send(RequestOptions::get("/api/plugins/:id").data(json!({ "id": 42, "tab": "info" })));
	let request = transport.complete_next(Ok(Response::new(200, "{}")));
	assert_eq!(request.method, "GET");
	assert_eq!(request.url, "/api/plugins/42?tab=info");
}

#[test]
fn error_status_rejects_with_body() {
	let Fixture { app, transport, .. } = setup();
	let requests = app.requests(transport.clone());
	let promise: Promise<u8, RequestError> = requests.send(RequestOptions::post("/api/things").data(json!({ "name": "" })));
	transport.complete_next(Ok(Response::new(422, r#"{"error":"name required"}"#)));
	assert_eq!(promise.state(), PromiseState::Rejected);
	assert_eq!(
		promise.error(),
		Some(RequestError::Status {
			status: 422,
			body: json!({ "error": "name required" })
		})
	);
	assert_eq!(app.scheduler().pending_requests(), 0);
}

#[test]
fn transport_failures_reject() {
	let Fixture { app, transport, .. } = setup();
	let requests = app.requests(transport.clone());
	let promise: Promise<u8, RequestError> = requests.send(RequestOptions::get("/api/down"));
	transport.complete_next(Err("connection reset".to_owned()));
	assert_eq!(promise.error(), Some(RequestError::Transport("connection reset".to_owned())));
}

#[test]
fn unhandled_fatal_rejection_resets_pending_and_panics() {
	let Fixture { app, transport, .. } = setup();
	let requests = app.requests(transport.clone());
	app.start_computation();

	let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
		let promise: Promise<u8, RequestError> = requests.send(RequestOptions::post("/api/things").data(json!({})).serialize(|_| Err("unserializable".to_owned())));
		drop(promise);
	}));
	assert!(outcome.is_err());
	assert_eq!(app.scheduler().pending_requests(), 0);
	assert!(transport.queue.borrow().is_empty());
}

#[test]
fn handled_fatal_rejection_is_quiet() {
	let Fixture { app, transport, .. } = setup();
	let requests = app.requests(transport.clone());
	let promise: Promise<u8, RequestError> = requests.send(RequestOptions::post("/api/things").data(json!({})).serialize(|_| Err("unserializable".to_owned())));
	assert_eq!(promise.error(), Some(RequestError::Invalid("unserializable".to_owned())));
}

#[test]
fn suspended_mount_renders_placeholder() {
	let Fixture {
		document,
		root,
		clock,
		app,
		transport,
		..
	} = setup();
	let requests = app.requests(transport.clone());
	let pending: Promise<u8, RequestError> = requests.send(RequestOptions::get("/api/slow"));

	let page = Component::stateless(|_: &()| h("article").child("loaded").into());
	app.mount(&root, Some(page.reference())).unwrap();
	assert_eq!(document.inner_html(root), "<div></div>");

	app.redraw(false).unwrap();
	assert_eq!(document.inner_html(root), "<placeholder></placeholder>");

	transport.complete_next(Ok(Response::new(200, "1")));
	assert_eq!(pending.value(), Some(1));
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<article>loaded</article>");
}

#[test]
fn forced_redraw_ignores_pending_requests() {
	let Fixture {
		document, root, app, transport, ..
	} = setup();
	let requests = app.requests(transport.clone());
	let _pending: Promise<u8, RequestError> = requests.send(RequestOptions::get("/api/slow"));

	let page = Component::stateless(|_: &()| h("article").into());
	app.mount(&root, Some(page.reference())).unwrap();
	app.redraw(true).unwrap();
	assert_eq!(document.inner_html(root), "<article></article>");
	assert_eq!(app.scheduler().pending_requests(), 1);
}
