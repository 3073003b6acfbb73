//! Remote pointers: handles to nodes of a session's reachability graph.
//!
//! A [`RemotePtr`] names a node in its [`Vendor`](crate::Vendor)'s arena by
//! coupon. The node owns the [`Payload`] and the set of coupons it keeps
//! alive. Handles are cheap to clone and do not keep the node alive: only
//! reachability from the session root (or an active [`PinGuard`]) does.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use serde::{Serialize, Serializer};
use tether_protocol::Coupon;

use crate::error::{Error, Result};
use crate::events::ClientObject;
use crate::handler::Handler;
use crate::vendor::Heap;

/// Arbitrary server-side data attached to a remote pointer.
pub trait LocalValue: DowncastSync + fmt::Debug {}

impl_downcast!(sync LocalValue);

/// Value owned by a remote pointer, released on finalization.
#[derive(Clone, Debug)]
pub enum Payload {
	/// The session root. Never finalized by collection.
	Root,
	/// Exported callback invoked by matching event messages.
	Handler(Handler),
	/// Stand-in for an object living in the browser.
	Object(Arc<ClientObject>),
	/// Application data with no browser counterpart.
	Local(Arc<dyn LocalValue>),
}

impl Payload {
	pub fn object() -> Self {
		Payload::Object(Arc::new(ClientObject::default()))
	}

	pub fn as_handler(&self) -> Option<&Handler> {
		match self {
			Payload::Handler(h) => Some(h),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&Arc<ClientObject>> {
		match self {
			Payload::Object(o) => Some(o),
			_ => None,
		}
	}

	/// Downcasts local data to a concrete type.
	pub fn downcast_local<T: LocalValue>(&self) -> Option<Arc<T>> {
		match self {
			Payload::Local(value) => Arc::clone(value).downcast_arc::<T>().ok(),
			_ => None,
		}
	}
}

/// Handle to a node in a session's reachability graph.
///
/// Two handles are equal when they name the same registration of the same
/// coupon in the same vendor.
#[derive(Clone)]
pub struct RemotePtr {
	coupon: Coupon,
	serial: u64,
	heap: Weak<Heap>,
}

impl RemotePtr {
	pub(crate) fn new(coupon: Coupon, serial: u64, heap: Weak<Heap>) -> Self {
		Self {
			coupon,
			serial,
			heap,
		}
	}

	pub fn coupon(&self) -> &Coupon {
		&self.coupon
	}

	pub(crate) fn serial(&self) -> u64 {
		self.serial
	}

	pub(crate) fn heap(&self) -> Result<Arc<Heap>> {
		self.heap
			.upgrade()
			.ok_or_else(|| Error::Finalized(self.coupon.clone()))
	}

	/// Returns true until the node is finalized.
	pub fn is_live(&self) -> bool {
		self.heap().is_ok_and(|heap| heap.is_live(self))
	}

	/// Records that `self` keeps `to` alive. Idempotent; cycles are fine.
	pub fn add_reachable(&self, to: &RemotePtr) -> Result<()> {
		self.heap()?.add_reachable(self, to)
	}

	/// Drops every outgoing edge of `self`.
	pub fn clear_reachable(&self) -> Result<()> {
		self.heap()?.clear_reachable(self)
	}

	/// Pins the node and returns a guard granting access to its payload.
	///
	/// A pinned node is treated as a root by collection until the guard drops.
	///
	/// # Errors
	///
	/// [`Error::Finalized`] if the node is already gone.
	pub fn pin(&self) -> Result<PinGuard> {
		let payload = self.heap()?.pin(self)?;
		Ok(PinGuard {
			ptr: self.clone(),
			payload,
		})
	}

	/// Runs `f` with the coupon and payload; the node cannot be finalized meanwhile.
	pub fn with<R>(&self, f: impl FnOnce(&Coupon, &Payload) -> R) -> Result<R> {
		let guard = self.pin()?;
		Ok(f(&self.coupon, guard.payload()))
	}
}

impl PartialEq for RemotePtr {
	fn eq(&self, other: &Self) -> bool {
		self.coupon == other.coupon
			&& self.serial == other.serial
			&& Weak::ptr_eq(&self.heap, &other.heap)
	}
}

impl Eq for RemotePtr {}

impl Hash for RemotePtr {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.coupon.hash(state);
		self.serial.hash(state);
	}
}

impl fmt::Debug for RemotePtr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RemotePtr")
			.field("coupon", &self.coupon)
			.field("serial", &self.serial)
			.finish()
	}
}

/// Serializes as a coupon reference, never inline.
impl Serialize for RemotePtr {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.coupon.to_reference().serialize(serializer)
	}
}

/// RAII pin on a remote pointer's node.
pub struct PinGuard {
	ptr: RemotePtr,
	payload: Payload,
}

impl PinGuard {
	pub fn ptr(&self) -> &RemotePtr {
		&self.ptr
	}

	pub fn payload(&self) -> &Payload {
		&self.payload
	}
}

impl Drop for PinGuard {
	fn drop(&mut self) {
		if let Some(heap) = self.ptr.heap.upgrade() {
			heap.unpin(&self.ptr);
		}
	}
}

impl fmt::Debug for PinGuard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PinGuard").field("ptr", &self.ptr).finish()
	}
}
