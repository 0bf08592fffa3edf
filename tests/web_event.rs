#![cfg(target_arch = "wasm32")]

use std::{cell::RefCell, rc::Rc};
use tendril_dom::{h, scheduler::FrameClock, web::{AnimationFrameClock, WebDocument}, App};
use wasm_bindgen::JsCast;
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};
use web_sys::{window, HtmlBodyElement, HtmlElement};

wasm_bindgen_test_configure!(run_in_browser);

static mut LOG_INITIALIZED: bool = false;

#[wasm_bindgen_test]
fn click() {
	unsafe {
		if !LOG_INITIALIZED {
			tracing_wasm::set_as_global_default();
			LOG_INITIALIZED = true;
		}
	}

	let body: web_sys::Node = window().unwrap().document().unwrap().body().unwrap().dyn_into::<HtmlBodyElement>().unwrap().into();
	let clock: Rc<dyn FrameClock> = Rc::new(AnimationFrameClock::from_window().unwrap());
	let app = App::new(WebDocument::from_window().unwrap(), clock);

	let click_count = Rc::new(RefCell::new(0));
	let counter = click_count.clone();
	let button = h("button#test-button").on("click", move |event| {
		event
			.raw::<web_sys::Event>()
			.expect("Expected Event but received something else.");
		*counter.borrow_mut() += 1;
	});

	assert_eq!(*click_count.borrow(), 0);
	app.render(Some(&body), button, false).unwrap();
	assert_eq!(*click_count.borrow(), 0);

	let button: HtmlElement = window().unwrap().document().unwrap().get_element_by_id("test-button").unwrap().dyn_into().unwrap();
	button.click();
	assert_eq!(*click_count.borrow(), 1);

	app.render(Some(&body), h("button#test-button"), false).unwrap();
	let button: HtmlElement = window().unwrap().document().unwrap().get_element_by_id("test-button").unwrap().dyn_into().unwrap();
	button.click();
	assert_eq!(*click_count.borrow(), 1);
	app.stop();
}
