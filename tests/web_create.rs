#![cfg(target_arch = "wasm32")]

use tendril_dom::{h, trust, web::WebDocument, Node, Renderer};
use wasm_bindgen::JsCast;
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::{window, HtmlBodyElement};

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn text() {
	test_create("Hello tendril-dom!".into(), "Hello tendril-dom!");
}

#[wasm_bindgen_test]
fn trusted() {
	test_create(trust("<b>Hello</b> tendril-dom!"), "<b>Hello</b> tendril-dom!");
}

#[wasm_bindgen_test]
fn element() {
	test_create(h("p").child("Hello").into(), "<p>Hello</p>");
}

fn test_create(vdom: Node, expected: &str) {
	let body: web_sys::Node = window()
		.unwrap()
		.document()
		.unwrap()
		.body()
		.unwrap()
		.dyn_into::<HtmlBodyElement>()
		.unwrap()
		.into();

	let document = WebDocument::from_window().unwrap();
	let mut renderer = Renderer::new(document);
	renderer.render(Some(&body), h("div#create").child(vdom), false).unwrap();

	let container = window().unwrap().document().unwrap().get_element_by_id("create").unwrap();
	assert_eq!(container.inner_html(), expected);
	renderer.reset(&body);
}
