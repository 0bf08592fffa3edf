#![doc(html_root_url = "https://docs.rs/tendril-dom/0.1.0")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! A virtual tree reconciler with components, synchronous deferreds, a redraw scheduler and a
//! route-driven mount controller.
//!
//! The engine is host-agnostic: [`Renderer`] drives any [`HostTree`]. [`WebDocument`](`web::WebDocument`)
//! targets a browser document, [`MemoryDocument`](`memory::MemoryDocument`) an in-memory tree that
//! records every mutation.
//!
//! [`App`] ties one host to a [`Scheduler`](`scheduler::Scheduler`) and manages mounted
//! components, routing and requests on top of that.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod app;
mod cache;
pub mod component;
pub mod deferred;
pub mod diff;
pub mod error;
pub mod host;
pub mod load;
pub mod memory;
pub mod prop;
pub mod query;
mod rc_hash_map;
pub mod request;
pub mod router;
pub mod scheduler;
pub mod vdom;
pub mod web;

pub use app::App;
pub use component::{Component, ComponentRef};
pub use deferred::{Deferred, Promise};
pub use diff::{DiffStats, Renderer};
pub use error::{RenderError, RouteError};
pub use host::HostTree;
pub use prop::Prop;
pub use scheduler::Strategy;
pub use vdom::{h, trust, Element, Key, Node};
