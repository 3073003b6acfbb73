//! Lazy per-name event streams on client objects.
//!
//! Each [`ClientObject`] carries a table of [`EventStream`]s keyed by event
//! name. A stream is created on first access only, together with the
//! exported handler feeding it; see [`Window::event`](crate::Window::event).
//! Handlers bound with [`Window::bind`](crate::Window::bind) are recorded per
//! name as well, so an event addressed to the object reaches all of them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::remote_ptr::RemotePtr;

/// Buffered events per subscriber before it starts lagging.
const STREAM_CAPACITY: usize = 64;

/// Server-side stand-in for an object living in the browser.
#[derive(Default)]
pub struct ClientObject {
	pub(crate) events: Mutex<HashMap<String, EventStream>>,
	pub(crate) handlers: Mutex<HashMap<String, Vec<RemotePtr>>>,
}

impl ClientObject {
	/// Returns the stream for `name` if it was already created.
	pub fn stream(&self, name: &str) -> Option<EventStream> {
		self.events.lock().get(name).cloned()
	}

	/// Names with a live stream.
	pub fn event_names(&self) -> Vec<String> {
		self.events.lock().keys().cloned().collect()
	}

	/// Handlers bound to `name`, in binding order.
	pub fn handlers(&self, name: &str) -> Vec<RemotePtr> {
		self.handlers.lock().get(name).cloned().unwrap_or_default()
	}

	pub(crate) fn add_handler(&self, name: &str, handler: RemotePtr) {
		self.handlers
			.lock()
			.entry(name.to_string())
			.or_default()
			.push(handler);
	}

	pub(crate) fn remove_handler(&self, name: &str, handler: &RemotePtr) {
		if let Some(bound) = self.handlers.lock().get_mut(name) {
			bound.retain(|h| h != handler);
		}
	}
}

impl fmt::Debug for ClientObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClientObject")
			.field("events", &self.event_names())
			.finish()
	}
}

/// Broadcast stream of argument lists for one named event.
///
/// Clones share the same underlying channel.
#[derive(Clone)]
pub struct EventStream {
	name: Arc<str>,
	tx: broadcast::Sender<Vec<Value>>,
}

impl EventStream {
	pub fn new(name: &str) -> Self {
		let (tx, _) = broadcast::channel(STREAM_CAPACITY);
		Self {
			name: Arc::from(name),
			tx,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Subscribes to future occurrences.
	pub fn subscribe(&self) -> broadcast::Receiver<Vec<Value>> {
		self.tx.subscribe()
	}

	/// Publishes one occurrence; returns the number of subscribers reached.
	pub fn emit(&self, args: Vec<Value>) -> usize {
		self.tx.send(args).unwrap_or(0)
	}

	/// Returns true if both handles feed the same channel.
	pub fn same_stream(&self, other: &EventStream) -> bool {
		self.tx.same_channel(&other.tx)
	}
}

impl fmt::Debug for EventStream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventStream")
			.field("name", &self.name)
			.field("subscribers", &self.tx.receiver_count())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn emit_reaches_subscribers() {
		let stream = EventStream::new("click");
		let mut rx = stream.subscribe();
		assert_eq!(stream.emit(vec![json!(1)]), 1);
		assert_eq!(rx.recv().await.unwrap(), vec![json!(1)]);
	}

	#[test]
	fn emit_without_subscribers_is_dropped() {
		let stream = EventStream::new("click");
		assert_eq!(stream.emit(vec![]), 0);
	}

	#[test]
	fn handlers_are_kept_per_name_in_order() {
		let vendor = crate::vendor::Vendor::new();
		let object = ClientObject::default();
		let a = vendor.create(crate::remote_ptr::Payload::object()).unwrap();
		let b = vendor.create(crate::remote_ptr::Payload::object()).unwrap();

		object.add_handler("click", a.clone());
		object.add_handler("click", b.clone());
		assert_eq!(object.handlers("click"), vec![a.clone(), b.clone()]);
		assert!(object.handlers("input").is_empty());

		object.remove_handler("click", &a);
		assert_eq!(object.handlers("click"), vec![b]);
	}

	#[test]
	fn clones_share_channel() {
		let a = EventStream::new("keydown");
		let b = a.clone();
		let c = EventStream::new("keydown");
		assert!(a.same_stream(&b));
		assert!(!a.same_stream(&c));
	}
}
