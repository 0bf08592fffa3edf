//! Reading existing host content back into [`Node`]s, for example to take over server-rendered markup.

use crate::{
	host::{HostTree, NodeInfo},
	vdom::{Element, Node},
};
use tracing::{trace, warn};

/// Loads the children of `parent`.
///
/// Comments and other non-element, non-text nodes are skipped.
pub fn load_child_nodes<H: HostTree>(host: &H, parent: &H::Node) -> Vec<Node> {
	let count = host.child_count(parent);
	let mut nodes = Vec::with_capacity(count);
	for i in 0..count {
		match host.child_at(parent, i) {
			Some(child) => nodes.extend(load_node(host, &child)),
			None => {
				warn!("Child {} of {} vanished while loading.", i, count);
				break;
			}
		}
	}
	nodes
}

/// Loads a single node and its subtree.
pub fn load_node<H: HostTree>(host: &H, node: &H::Node) -> Option<Node> {
	match host.inspect(node) {
		NodeInfo::Element { tag, attributes } => {
			let mut element = Element::new(tag.to_lowercase());
			for (name, value) in attributes {
				element = element.attr(name, value);
			}
			Some(element.children(load_child_nodes(host, node)).into())
		}
		NodeInfo::Text(text) => Some(text.into()),
		NodeInfo::Other => {
			trace!("Skipping unrecognized node {:?}.", node);
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{diff::Renderer, memory::MemoryDocument, vdom::h};

	#[test]
	fn loads_rendered_content() {
		let document = MemoryDocument::new();
		let root = document.create_root("main");
		let mut renderer = Renderer::new(document.clone());
		let tree = h("ul.list").child(h("li#first").child("one")).child(h("li").child("two"));
		renderer.render(Some(&root), tree.clone(), false).unwrap();

		let loaded = load_child_nodes(&document, &root);
		assert_eq!(loaded, vec![Node::Element(tree)]);
	}
}
