use crate::{host::HostError, vdom::Key};
use thiserror::Error;

/// Configuration errors surfaced by [`Renderer`](`crate::diff::Renderer`) and [`App`](`crate::app::App`).
///
/// These indicate a programming mistake rather than a runtime condition,
/// so the affected pass is abandoned as soon as one is encountered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
	#[error("the render root is missing")]
	MissingRoot,
	#[error("a component view must produce a single element, but produced {0}")]
	InvalidComponentRoot(&'static str),
	#[error("duplicate key {0} among siblings")]
	DuplicateKey(Key),
	#[error("could not create <{tag}>: {source}")]
	CreateElement { tag: String, source: HostError },
	#[error("a render pass is already in progress")]
	Busy,
	#[error(transparent)]
	Route(#[from] RouteError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
	#[error("the default route {0:?} does not match any registered route")]
	DefaultRouteUnmatched(String),
	#[error("routing has not been started")]
	NotStarted,
}
