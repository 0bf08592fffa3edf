//! The renderer's shadow of what is currently realized in the host tree.
//!
//! Entries live in a generational arena and refer to each other by [`CacheId`], so the
//! differ never holds host handles outside the entry that owns them.

use crate::{
	component::{ComponentId, Controller},
	vdom::{AttrValue, ConfigContext, Key, NodeKind},
};
use core::cell::RefCell;
use std::{collections::BTreeMap, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CacheId {
	index: u32,
	generation: u32,
}

#[derive(Debug)]
pub(crate) enum CachedKind {
	Text {
		value: Rc<str>,
		trusted: bool,
	},
	Element {
		tag: Rc<str>,
		attrs: BTreeMap<Rc<str>, AttrValue>,
		key: Option<Key>,
		has_config: bool,
		children: Option<CacheId>,
	},
	List {
		items: Vec<CacheId>,
	},
}

#[derive(Debug)]
pub(crate) struct Cached<N> {
	pub kind: CachedKind,
	/// The live host nodes representing this entry, in document order.
	pub nodes: Vec<N>,
	pub config_context: Option<Rc<RefCell<ConfigContext>>>,
	pub controllers: Vec<Controller>,
	pub views: Vec<ComponentId>,
}
impl<N> Cached<N> {
	pub fn new(kind: CachedKind, nodes: Vec<N>) -> Self {
		Self {
			kind,
			nodes,
			config_context: None,
			controllers: Vec::new(),
			views: Vec::new(),
		}
	}

	pub fn node_kind(&self) -> NodeKind {
		match self.kind {
			CachedKind::Text { .. } => NodeKind::Text,
			CachedKind::Element { .. } => NodeKind::Element,
			CachedKind::List { .. } => NodeKind::List,
		}
	}

	pub fn key(&self) -> Option<&Key> {
		match &self.kind {
			CachedKind::Element { key, .. } => key.as_ref(),
			CachedKind::Text { .. } | CachedKind::List { .. } => None,
		}
	}
}

struct Slot<N> {
	generation: u32,
	entry: Option<Cached<N>>,
}

pub(crate) struct Arena<N> {
	slots: Vec<Slot<N>>,
	free: Vec<u32>,
	live: usize,
}
impl<N> Default for Arena<N> {
	fn default() -> Self {
		Self {
			slots: Vec::new(),
			free: Vec::new(),
			live: 0,
		}
	}
}
impl<N> Arena<N> {
	pub fn insert(&mut self, entry: Cached<N>) -> CacheId {
		self.live += 1;
		if let Some(index) = self.free.pop() {
			let slot = &mut self.slots[index as usize];
			slot.entry = Some(entry);
			return CacheId {
				index,
				generation: slot.generation,
			};
		}

		#[allow(clippy::cast_possible_truncation)]
		let index = self.slots.len() as u32;
		self.slots.push(Slot {
			generation: 0,
			entry: Some(entry),
		});
		CacheId { index, generation: 0 }
	}

	pub fn get(&self, id: CacheId) -> Option<&Cached<N>> {
		self.slots
			.get(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.entry.as_ref())
	}

	pub fn get_mut(&mut self, id: CacheId) -> Option<&mut Cached<N>> {
		self.slots
			.get_mut(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.entry.as_mut())
	}

	/// Frees `id`'s slot. Stale ids never alias the slot's next occupant.
	pub fn remove(&mut self, id: CacheId) -> Option<Cached<N>> {
		let slot = self.slots.get_mut(id.index as usize).filter(|slot| slot.generation == id.generation)?;
		let entry = slot.entry.take()?;
		slot.generation = slot.generation.wrapping_add(1);
		self.free.push(id.index);
		self.live -= 1;
		Some(entry)
	}

	pub fn len(&self) -> usize {
		self.live
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn text(value: &str) -> Cached<u8> {
		Cached::new(
			CachedKind::Text {
				value: value.into(),
				trusted: false,
			},
			vec![0],
		)
	}

	#[test]
	fn stale_ids_do_not_alias() {
		let mut arena = Arena::default();
		let a = arena.insert(text("a"));
		assert!(arena.remove(a).is_some());
		let b = arena.insert(text("b"));
		assert!(arena.get(a).is_none());
		assert!(arena.remove(a).is_none());
		assert!(matches!(arena.get(b).map(|entry| &entry.kind), Some(CachedKind::Text { value, .. }) if &**value == "b"));
		assert_eq!(arena.len(), 1);
	}
}
