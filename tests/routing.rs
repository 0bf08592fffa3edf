use rstest::rstest;
use serde_json::json;
use std::rc::Rc;
use tendril_dom::{
	component::{State, UnloadEvent},
	h,
	memory::{MemoryDocument, NodeId},
	query::Params,
	router::{MemoryHistory, RouteMode, RouteTable},
	scheduler::{ManualClock, FRAME_BUDGET_MS},
	vdom::AttrValue,
	App, Component, ComponentRef, RenderError, RouteError,
};

fn labeled(label: &'static str) -> ComponentRef {
	Component::stateless(move |_: &()| h("main").child(label).into()).reference()
}

fn table() -> RouteTable {
	RouteTable::new()
		.route("/", labeled("home"))
		.route("/plugins/:id", labeled("plugin"))
		.route("/plugins/new", labeled("new plugin"))
		.route("/files/:path.../raw", labeled("raw file"))
}

#[rstest]
#[case("/plugins/42?tab=info", "/plugins/:id", &[("id", "42"), ("tab", "info")])]
#[case("/plugins/new", "/plugins/new", &[])]
#[case("/plugins/42/", "/plugins/:id", &[("id", "42")])]
#[case("/plugins/a%20b", "/plugins/:id", &[("id", "a b")])]
#[case("/files/docs/a%20b.txt/raw", "/files/:path.../raw", &[("path", "docs/a b.txt")])]
#[case("/plugins/7?id=ignored", "/plugins/:id", &[("id", "7")])]
fn resolves(#[case] path: &str, #[case] pattern: &str, #[case] params: &[(&str, &str)]) {
	let resolved = table().resolve(path).unwrap();
	assert_eq!(resolved.pattern, pattern);
	for (name, value) in params {
		assert_eq!(resolved.params.get_str(name), Some(*value), "parameter {}", name);
	}
}

#[rstest]
#[case("/nowhere")]
#[case("/plugins")]
#[case("/plugins/1/2")]
fn unmatched(#[case] path: &str) {
	assert!(table().resolve(path).is_none());
}

struct Fixture {
	document: MemoryDocument,
	root: NodeId,
	clock: Rc<ManualClock>,
	app: App<MemoryDocument>,
}

fn setup() -> Fixture {
	let document = MemoryDocument::new();
	let root = document.create_root("body");
	let clock = ManualClock::new();
	let app = App::new(document.clone(), clock.clone());
	Fixture { document, root, clock, app }
}

#[test]
fn starts_on_the_current_location() {
	let Fixture { document, root, app, .. } = setup();
	let history = MemoryHistory::new("?/plugins/42?tab=info");
	app.route_start(&root, "/", table(), history.clone()).unwrap();

	assert_eq!(document.inner_html(root), "<main>plugin</main>");
	assert_eq!(app.current_route().as_deref(), Some("/plugins/42?tab=info"));
	assert_eq!(app.param("id"), Ok(Some(json!("42"))));
	assert_eq!(app.param("tab"), Ok(Some(json!("info"))));
	assert_eq!(app.param("missing"), Ok(None));
	assert_eq!(history.scrolls(), 1);
}

#[test]
fn unmatched_start_falls_back_to_default() {
	let Fixture { document, root, app, .. } = setup();
	let history = MemoryHistory::new("?/nowhere");
	app.route_start(&root, "/", table(), history.clone()).unwrap();

	assert_eq!(document.inner_html(root), "<main>home</main>");
	assert_eq!(app.current_route().as_deref(), Some("/"));
	assert_eq!(history.entries(), vec!["?/"]);
}

#[test]
fn unmatched_default_is_an_error() {
	let Fixture { root, app, .. } = setup();
	let history = MemoryHistory::new("?/nowhere");
	assert_eq!(
		app.route_start(&root, "/missing", table(), history),
		Err(RenderError::Route(RouteError::DefaultRouteUnmatched("/missing".to_owned())))
	);
}

#[test]
fn navigation_writes_history_after_redraw() {
	let Fixture { document, root, clock, app } = setup();
	let history = MemoryHistory::new("?/");
	app.route_start(&root, "/", table(), history.clone()).unwrap();

	let mut params = Params::new();
	params.insert("tab", "deps");
	assert_eq!(app.navigate("/plugins/7", params, false), Ok(true));
	assert_eq!(history.entries(), vec!["?/"]);

	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<main>plugin</main>");
	assert_eq!(history.entries(), vec!["?/", "?/plugins/7?tab=deps"]);
	assert_eq!(app.param("id"), Ok(Some(json!("7"))));
	assert_eq!(app.param("tab"), Ok(Some(json!("deps"))));
}

#[test]
fn back_button_is_followed() {
	let Fixture { document, root, clock, app } = setup();
	let history = MemoryHistory::new("?/");
	app.route_start(&root, "/", table(), history.clone()).unwrap();
	app.navigate("/plugins/new", Params::new(), false).unwrap();
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<main>new plugin</main>");

	history.back();
	app.location_changed().unwrap();
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<main>home</main>");
	assert_eq!(app.current_route().as_deref(), Some("/"));
}

#[test]
fn links_navigate_in_place() {
	let Fixture { document, root, clock, app } = setup();
	let weak = app.downgrade();
	let home = Component::stateless(move |_: &()| {
		h("nav")
			.child(weak.upgrade().map(|app| app.link("/plugins/9").child("nine")))
			.into()
	});
	let table = RouteTable::new().route("/", home.reference()).route("/plugins/:id", labeled("plugin"));
	let history = MemoryHistory::new("?/");
	app.route_start(&root, "/", table, history.clone()).unwrap();

	let nav = document.children(root)[0];
	let anchor = document.children(nav)[0];
	assert_eq!(document.attribute(anchor, "href").as_deref(), Some("?/plugins/9"));

	let event = document.dispatch(anchor, "click").unwrap();
	assert!(event.is_default_prevented());
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<main>plugin</main>");
	assert_eq!(history.entries(), vec!["?/", "?/plugins/9"]);
}

fn stubborn_table() -> RouteTable {
	let editor = Component::stateless(|_: &()| h("main").child("edit").into()).on_unload(|_: &State<()>, event: &UnloadEvent| event.prevent_default());
	table().route("/edit/:id", editor.reference())
}

#[test]
fn vetoed_navigation_restores_route_and_params() {
	let Fixture { document, root, clock, app } = setup();
	let history = MemoryHistory::new("?/edit/5");
	app.route_start(&root, "/", stubborn_table(), history.clone()).unwrap();

	let mut params = Params::new();
	params.insert("tab", "deps");
	assert_eq!(app.navigate("/plugins/7", params, false), Ok(false));
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<main>edit</main>");
	assert_eq!(app.current_route().as_deref(), Some("/edit/5"));
	assert_eq!(app.param("id"), Ok(Some(json!("5"))));
	assert_eq!(app.param("tab"), Ok(None));
	assert_eq!(history.entries(), vec!["?/edit/5"]);
}

#[test]
fn vetoed_fallback_restores_route() {
	let Fixture { document, root, clock, app } = setup();
	let history = MemoryHistory::new("?/edit/5");
	app.route_start(&root, "/", stubborn_table(), history.clone()).unwrap();

	assert_eq!(app.navigate("/nowhere", Params::new(), false), Ok(false));
	clock.advance(FRAME_BUDGET_MS);
	assert_eq!(document.inner_html(root), "<main>edit</main>");
	assert_eq!(app.current_route().as_deref(), Some("/edit/5"));
	assert_eq!(app.param("id"), Ok(Some(json!("5"))));
	assert_eq!(history.entries(), vec!["?/edit/5"]);
}

#[test]
fn routing_requires_start() {
	let Fixture { app, .. } = setup();
	assert_eq!(app.param("id"), Err(RouteError::NotStarted));
	assert_eq!(app.navigate("/", Params::new(), false), Err(RenderError::Route(RouteError::NotStarted)));
}

#[test]
fn hash_mode_links() {
	let Fixture { app, .. } = setup();
	app.set_route_mode(RouteMode::Hash);
	assert_eq!(app.link("/a").attribute("href"), Some(&AttrValue::from("#/a")));
}
