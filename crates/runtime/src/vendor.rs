//! Per-session coupon table and reachability arena.
//!
//! The [`Vendor`] owns one node per live coupon. Each node holds its
//! [`Payload`], the coupons it keeps alive, and a pin count. Liveness is decided
//! by a mark pass from the root (plus pinned nodes); everything unmarked is
//! finalized by the sweep. Collection runs only at defined points: after a
//! call result is processed, on [`Vendor::destroy`], and on disconnect.
//!
//! All operations take the single arena lock, so the dispatch loop and
//! application tasks may use the vendor concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tether_protocol::Coupon;

use crate::coupon::CouponRegistry;
use crate::error::{Error, Result};
use crate::remote_ptr::{Payload, RemotePtr};

/// Coupon of every session root.
pub const ROOT_COUPON: &str = "root";

struct Node {
	serial: u64,
	payload: Payload,
	edges: HashSet<Coupon>,
	pins: usize,
}

struct Arena {
	root: Coupon,
	nodes: HashMap<Coupon, Node>,
	next_serial: u64,
	closed: bool,
}

impl Arena {
	fn node(&self, ptr: &RemotePtr) -> Result<&Node> {
		self.nodes
			.get(ptr.coupon())
			.filter(|n| n.serial == ptr.serial())
			.ok_or_else(|| Error::Finalized(ptr.coupon().clone()))
	}

	fn node_mut(&mut self, ptr: &RemotePtr) -> Result<&mut Node> {
		self.nodes
			.get_mut(ptr.coupon())
			.filter(|n| n.serial == ptr.serial())
			.ok_or_else(|| Error::Finalized(ptr.coupon().clone()))
	}

	fn mark(&self) -> HashSet<Coupon> {
		let mut marked = HashSet::with_capacity(self.nodes.len());
		let mut stack: Vec<&Coupon> = Vec::new();

		if self.nodes.contains_key(&self.root) {
			stack.push(&self.root);
		}
		stack.extend(self.nodes.iter().filter(|(_, n)| n.pins > 0).map(|(c, _)| c));

		while let Some(coupon) = stack.pop() {
			if !marked.insert(coupon.clone()) {
				continue;
			}
			if let Some(node) = self.nodes.get(coupon) {
				stack.extend(
					node.edges
						.iter()
						.filter(|c| self.nodes.contains_key(*c) && !marked.contains(*c)),
				);
			}
		}

		marked
	}

	fn sweep(&mut self, marked: &HashSet<Coupon>) -> Vec<(Coupon, Payload)> {
		let dead: Vec<Coupon> = self
			.nodes
			.keys()
			.filter(|c| !marked.contains(*c))
			.cloned()
			.collect();

		let finalized: Vec<(Coupon, Payload)> = dead
			.into_iter()
			.filter_map(|c| self.nodes.remove(&c).map(|n| (c, n.payload)))
			.collect();

		if !finalized.is_empty() {
			self.prune_edges();
		}

		finalized
	}

	/// Drops edges pointing at coupons that are no longer registered.
	fn prune_edges(&mut self) {
		let nodes = &mut self.nodes;
		let live: HashSet<Coupon> = nodes.keys().cloned().collect();
		for node in nodes.values_mut() {
			node.edges.retain(|c| live.contains(c));
		}
	}
}

/// Shared arena behind a vendor; remote pointers hold it weakly.
pub(crate) struct Heap {
	arena: Mutex<Arena>,
}

impl Heap {
	pub(crate) fn is_live(&self, ptr: &RemotePtr) -> bool {
		self.arena.lock().node(ptr).is_ok()
	}

	pub(crate) fn add_reachable(&self, from: &RemotePtr, to: &RemotePtr) -> Result<()> {
		let mut arena = self.arena.lock();
		arena.node(to)?;
		arena.node_mut(from)?.edges.insert(to.coupon().clone());
		Ok(())
	}

	pub(crate) fn clear_reachable(&self, from: &RemotePtr) -> Result<()> {
		self.arena.lock().node_mut(from)?.edges.clear();
		Ok(())
	}

	pub(crate) fn pin(&self, ptr: &RemotePtr) -> Result<Payload> {
		let mut arena = self.arena.lock();
		let node = arena.node_mut(ptr)?;
		node.pins += 1;
		Ok(node.payload.clone())
	}

	pub(crate) fn unpin(&self, ptr: &RemotePtr) {
		if let Ok(node) = self.arena.lock().node_mut(ptr) {
			node.pins = node.pins.saturating_sub(1);
		}
	}
}

/// Per-session mapping from coupon to remote pointer, with mark-sweep collection.
pub struct Vendor {
	heap: Arc<Heap>,
	coupons: CouponRegistry,
	root: RemotePtr,
}

impl Default for Vendor {
	fn default() -> Self {
		Self::new()
	}
}

impl Vendor {
	/// Creates a vendor holding only the root.
	pub fn new() -> Self {
		let root_coupon = Coupon::new(ROOT_COUPON);
		let mut nodes = HashMap::new();
		nodes.insert(
			root_coupon.clone(),
			Node {
				serial: 0,
				payload: Payload::Root,
				edges: HashSet::new(),
				pins: 0,
			},
		);
		let heap = Arc::new(Heap {
			arena: Mutex::new(Arena {
				root: root_coupon.clone(),
				nodes,
				next_serial: 1,
				closed: false,
			}),
		});
		let root = RemotePtr::new(root_coupon, 0, Arc::downgrade(&heap));

		Self {
			heap,
			coupons: CouponRegistry::new(),
			root,
		}
	}

	/// The always-reachable root pointer.
	pub fn root(&self) -> &RemotePtr {
		&self.root
	}

	/// Returns a fresh coupon, unique for this session.
	pub fn issue(&self) -> Coupon {
		self.coupons.issue()
	}

	/// Registers `payload` under `coupon` and returns its pointer.
	///
	/// The new pointer is unreachable until linked with
	/// [`RemotePtr::add_reachable`].
	///
	/// # Errors
	///
	/// [`Error::DuplicateCoupon`] if a live pointer already holds the coupon,
	/// [`Error::SessionClosed`] after [`release_all`](Self::release_all).
	pub fn register(&self, coupon: Coupon, payload: Payload) -> Result<RemotePtr> {
		let mut arena = self.heap.arena.lock();
		if arena.closed {
			return Err(Error::SessionClosed);
		}
		if arena.nodes.contains_key(&coupon) {
			return Err(Error::DuplicateCoupon(coupon));
		}
		let serial = arena.next_serial;
		arena.next_serial += 1;
		arena.nodes.insert(
			coupon.clone(),
			Node {
				serial,
				payload,
				edges: HashSet::new(),
				pins: 0,
			},
		);
		tracing::trace!(%coupon, serial, "registered remote pointer");
		Ok(RemotePtr::new(coupon, serial, Arc::downgrade(&self.heap)))
	}

	/// Issues a coupon and registers `payload` under it.
	pub fn create(&self, payload: Payload) -> Result<RemotePtr> {
		self.register(self.issue(), payload)
	}

	/// Creates a pointer already reachable from `owner`.
	///
	/// Registration and linking happen under one lock, so no collection pass
	/// can observe the new pointer unlinked.
	pub fn create_linked(&self, owner: &RemotePtr, payload: Payload) -> Result<RemotePtr> {
		let coupon = self.issue();
		let mut arena = self.heap.arena.lock();
		if arena.closed {
			return Err(Error::SessionClosed);
		}
		arena.node(owner)?;
		let serial = arena.next_serial;
		arena.next_serial += 1;
		arena.nodes.insert(
			coupon.clone(),
			Node {
				serial,
				payload,
				edges: HashSet::new(),
				pins: 0,
			},
		);
		arena.node_mut(owner)?.edges.insert(coupon.clone());
		Ok(RemotePtr::new(coupon, serial, Arc::downgrade(&self.heap)))
	}

	/// Returns the live pointer for a coupon, if any.
	pub fn lookup(&self, coupon: &Coupon) -> Option<RemotePtr> {
		let arena = self.heap.arena.lock();
		arena
			.nodes
			.get(coupon)
			.map(|n| RemotePtr::new(coupon.clone(), n.serial, Arc::downgrade(&self.heap)))
	}

	/// Returns the live pointer for a coupon, registering `make()` on a miss.
	pub fn lookup_or_create(&self, coupon: &Coupon, make: impl FnOnce() -> Payload) -> Result<RemotePtr> {
		match self.lookup(coupon) {
			Some(ptr) => Ok(ptr),
			None => match self.register(coupon.clone(), make()) {
				// Lost a race against a concurrent registration of the same coupon.
				Err(Error::DuplicateCoupon(c)) => self.lookup(&c).ok_or(Error::Finalized(c)),
				other => other,
			},
		}
	}

	/// Like [`lookup_or_create`](Self::lookup_or_create), but the pointer is
	/// linked from `owner` under the same lock, so no collection pass can
	/// finalize it between resolution and linking.
	///
	/// # Errors
	///
	/// [`Error::Finalized`] if `owner` is gone, [`Error::SessionClosed`] after
	/// [`release_all`](Self::release_all).
	pub fn lookup_or_create_linked(
		&self,
		owner: &RemotePtr,
		coupon: &Coupon,
		make: impl FnOnce() -> Payload,
	) -> Result<RemotePtr> {
		let mut arena = self.heap.arena.lock();
		if arena.closed {
			return Err(Error::SessionClosed);
		}
		arena.node(owner)?;
		let serial = match arena.nodes.get(coupon) {
			Some(node) => node.serial,
			None => {
				let serial = arena.next_serial;
				arena.next_serial += 1;
				arena.nodes.insert(
					coupon.clone(),
					Node {
						serial,
						payload: make(),
						edges: HashSet::new(),
						pins: 0,
					},
				);
				tracing::trace!(%coupon, serial, "registered remote pointer");
				serial
			}
		};
		arena.node_mut(owner)?.edges.insert(coupon.clone());
		Ok(RemotePtr::new(coupon.clone(), serial, Arc::downgrade(&self.heap)))
	}

	/// Deletes the entry for `coupon` without collecting. Idempotent.
	///
	/// Returns false if nothing was removed; the root is never removed.
	pub fn remove(&self, coupon: &Coupon) -> bool {
		let removed = {
			let mut arena = self.heap.arena.lock();
			if *coupon == arena.root {
				return false;
			}
			let removed = arena.nodes.remove(coupon);
			if removed.is_some() {
				arena.prune_edges();
			}
			removed
		};
		removed.is_some()
	}

	/// Finalizes `ptr` immediately, regardless of reachability.
	///
	/// # Errors
	///
	/// [`Error::CannotDestroyRoot`] for the root, [`Error::Finalized`] if
	/// already gone.
	pub fn destroy(&self, ptr: &RemotePtr) -> Result<Coupon> {
		let payload = {
			let mut arena = self.heap.arena.lock();
			if *ptr.coupon() == arena.root {
				return Err(Error::CannotDestroyRoot);
			}
			arena.node(ptr)?;
			let removed = arena.nodes.remove(ptr.coupon());
			arena.prune_edges();
			removed
		};
		drop(payload);
		tracing::debug!(coupon = %ptr.coupon(), "destroyed remote pointer");
		Ok(ptr.coupon().clone())
	}

	/// Runs one mark-sweep pass and returns the finalized coupons.
	///
	/// Payloads are released after the arena lock is dropped.
	pub fn collect(&self) -> Vec<Coupon> {
		let finalized = {
			let mut arena = self.heap.arena.lock();
			let marked = arena.mark();
			arena.sweep(&marked)
		};
		if !finalized.is_empty() {
			tracing::debug!(count = finalized.len(), "collected unreachable remote pointers");
		}
		finalized.into_iter().map(|(coupon, _payload)| coupon).collect()
	}

	/// Finalizes every pointer, the root included, and refuses new registrations.
	pub fn release_all(&self) -> Vec<Coupon> {
		let drained: Vec<(Coupon, Node)> = {
			let mut arena = self.heap.arena.lock();
			arena.closed = true;
			arena.nodes.drain().collect()
		};
		drained.into_iter().map(|(coupon, _node)| coupon).collect()
	}

	/// Number of live pointers, the root included.
	pub fn len(&self) -> usize {
		self.heap.arena.lock().nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
