//! Per-connection session and its duplex event loop.
//!
//! A [`Window`] is the handle application code uses to drive one connected
//! browser. It owns the outgoing channel, the table of pending calls and the
//! session's [`Vendor`]. The matching [`EventLoop`] reads inbound frames in
//! order and dispatches them.
//!
//! # Message Flow
//!
//! 1. Caller renders a [`JsFunction`] and sends `run` or `call`
//! 2. For `call`, a fresh id is registered with a oneshot sender before sending
//! 3. The writer task serializes outgoing messages one at a time
//! 4. The event loop receives `result` frames, runs a collection pass, then
//!    resolves the matching call
//! 5. `event` frames are routed by coupon: to the handler itself, or to the
//!    handlers bound to that event name on a client object; each runs on its
//!    own task
//! 6. When the transport closes or the peer violates the protocol, every
//!    pending call fails with [`Error::SessionClosed`] and the disconnect
//!    hooks fire once

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;
use tether_protocol::{CallId, ClientMessage, Coupon, ServerMessage};
use tokio::sync::{mpsc, oneshot};

use crate::coupon::SERVER_PREFIX;
use crate::error::{Error, Result};
use crate::events::EventStream;
use crate::handler::Handler;
use crate::marshal::{self, JsFunction};
use crate::remote_ptr::{Payload, PinGuard, RemotePtr};
use crate::transport::{Transport, TransportParts, TransportReceiver};
use crate::vendor::Vendor;


/// Unique identifier of a window within the process.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How long a closing session waits for queued messages to be written.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Browser-side call binding `%3` as the handler of event `%2` on object `%1`.
pub const BIND_EVENT: &str = "Tether.bind(%1, %2, %3)";

type DisconnectHook = Box<dyn FnOnce() + Send>;

struct PendingCalls {
	closed: bool,
	waiting: HashMap<CallId, oneshot::Sender<Result<Value>>>,
}

enum DisconnectHooks {
	Waiting(Vec<DisconnectHook>),
	Fired,
}

struct Shared {
	id: SessionId,
	last_id: AtomicU64,
	calls: Mutex<PendingCalls>,
	outbound_tx: Mutex<Option<mpsc::UnboundedSender<ServerMessage>>>,
	vendor: Vendor,
	hooks: Mutex<DisconnectHooks>,
}

/// Handle to one connected browser session. Cheap to clone.
#[derive(Clone)]
pub struct Window {
	inner: Arc<Shared>,
}

/// Inbound dispatch loop of a [`Window`]; run it exactly once.
pub struct EventLoop {
	window: Window,
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Window {
	/// Creates a connected window over `parts` and the loop that serves it.
	pub fn connect(parts: TransportParts) -> (Window, EventLoop) {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		let window = Window {
			inner: Arc::new(Shared {
				id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
				last_id: AtomicU64::new(0),
				calls: Mutex::new(PendingCalls {
					closed: false,
					waiting: HashMap::new(),
				}),
				outbound_tx: Mutex::new(Some(outbound_tx)),
				vendor: Vendor::new(),
				hooks: Mutex::new(DisconnectHooks::Waiting(Vec::new())),
			}),
		};
		tracing::debug!(session = window.id(), "window connected");

		let event_loop = EventLoop {
			window: window.clone(),
			sender,
			receiver,
			message_rx,
			outbound_rx,
		};
		(window, event_loop)
	}

	pub fn id(&self) -> SessionId {
		self.inner.id
	}

	pub fn vendor(&self) -> &Vendor {
		&self.inner.vendor
	}

	/// The session root; everything reachable from it stays alive.
	pub fn root(&self) -> &RemotePtr {
		self.inner.vendor.root()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.calls.lock().closed
	}

	/// Number of calls still waiting for a result.
	pub fn pending_calls(&self) -> usize {
		self.inner.calls.lock().waiting.len()
	}

	/// Evaluates `function` in the browser without waiting for a result.
	///
	/// Script failures are not observable here; the browser logs them.
	///
	/// # Errors
	///
	/// Local rendering errors, or [`Error::SessionClosed`].
	pub fn run(&self, function: JsFunction) -> Result<()> {
		let code = function.render()?;
		if self.is_closed() {
			return Err(Error::SessionClosed);
		}
		tracing::trace!(session = self.id(), %code, "run");
		self.send(ServerMessage::Run { code })
	}

	/// Evaluates `function` in the browser and decodes the result as `T`.
	///
	/// # Errors
	///
	/// - [`Error::PlaceholderArityMismatch`] / [`Error::Marshal`] for local
	///   construction or decoding problems
	/// - [`Error::RemoteEval`] if the script threw
	/// - [`Error::SessionClosed`] if the session ends before the result arrives
	pub async fn call<T: DeserializeOwned>(&self, function: JsFunction) -> Result<T> {
		let value = self.call_value(function).await?;
		marshal::decode(value)
	}

	/// Like [`call`](Self::call), returning the raw wire value.
	pub async fn call_value(&self, function: JsFunction) -> Result<Value> {
		let code = function.render()?;
		let id = self.inner.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();

		{
			let mut calls = self.inner.calls.lock();
			if calls.closed {
				return Err(Error::SessionClosed);
			}
			calls.waiting.insert(id, tx);
		}

		tracing::debug!(session = self.id(), id, "sending call");
		if let Err(e) = self.send(ServerMessage::Call { id, code }) {
			self.inner.calls.lock().waiting.remove(&id);
			return Err(e);
		}

		rx.await.map_err(|_| Error::SessionClosed)?
	}

	/// Calls `function` and resolves its coupon-reference result to a pointer.
	///
	/// The pointer is unreachable until linked; prefer
	/// [`call_ptr_on`](Self::call_ptr_on) when another task may be collecting.
	pub async fn call_ptr(&self, function: JsFunction) -> Result<RemotePtr> {
		let value = self.call_value(function).await?;
		self.decode_ptr(value)
	}

	/// Calls `function` and resolves its result to a pointer kept alive by
	/// `owner`. Resolution and linking happen under one vendor lock.
	pub async fn call_ptr_on(&self, owner: &RemotePtr, function: JsFunction) -> Result<RemotePtr> {
		let value = self.call_value(function).await?;
		self.decode_ptr_on(owner, value)
	}

	/// Resolves a coupon reference from the browser to a live pointer,
	/// creating a client-object stand-in on first sight.
	///
	/// The pointer is unreachable until linked; link it before the next
	/// collection point or it will be finalized.
	///
	/// # Errors
	///
	/// [`Error::Marshal`] if `value` is not a coupon reference,
	/// [`Error::UnknownCoupon`] for a server-issued coupon that is not live.
	pub fn decode_ptr(&self, value: Value) -> Result<RemotePtr> {
		let coupon = reference_coupon(&value)?;
		if is_server_coupon(&coupon) {
			return self.registered(coupon);
		}
		self.inner.vendor.lookup_or_create(&coupon, Payload::object)
	}

	/// Like [`decode_ptr`](Self::decode_ptr), linking the pointer from `owner`
	/// before any collection pass can see it.
	pub fn decode_ptr_on(&self, owner: &RemotePtr, value: Value) -> Result<RemotePtr> {
		let coupon = reference_coupon(&value)?;
		if is_server_coupon(&coupon) {
			let ptr = self.registered(coupon)?;
			owner.add_reachable(&ptr)?;
			return Ok(ptr);
		}
		self.inner
			.vendor
			.lookup_or_create_linked(owner, &coupon, Payload::object)
	}

	/// Server-issued coupons are never created on the browser's word.
	fn registered(&self, coupon: Coupon) -> Result<RemotePtr> {
		self.inner
			.vendor
			.lookup(&coupon)
			.ok_or(Error::UnknownCoupon(coupon))
	}

	/// Exports `handler` and links it from the root.
	///
	/// Root-linked handlers live until [`destroy`](Self::destroy)ed or the
	/// session ends.
	pub fn export_handler(&self, handler: Handler) -> Result<RemotePtr> {
		self.export_handler_on(self.root(), handler)
	}

	/// Exports `handler` kept alive by `owner` rather than the root.
	pub fn export_handler_on(&self, owner: &RemotePtr, handler: Handler) -> Result<RemotePtr> {
		let ptr = self.inner.vendor.create_linked(owner, Payload::Handler(handler))?;
		tracing::debug!(session = self.id(), coupon = %ptr.coupon(), owner = %owner.coupon(), "exported handler");
		Ok(ptr)
	}

	/// Records that `parent` keeps `child` alive.
	pub fn adopt(&self, parent: &RemotePtr, child: &RemotePtr) -> Result<()> {
		parent.add_reachable(child)
	}

	/// Exports `handler` owned by `object` and binds it to `name` events in
	/// the browser.
	///
	/// Events for `name` addressed to either the object or the handler reach
	/// it. The handler lives as long as `object` does.
	///
	/// # Errors
	///
	/// [`Error::NotAnObject`] if `object` is not a client object,
	/// [`Error::Finalized`] if it is gone.
	pub fn bind(&self, object: &RemotePtr, name: &str, handler: Handler) -> Result<RemotePtr> {
		let guard = object.pin()?;
		let client = guard
			.payload()
			.as_object()
			.ok_or_else(|| Error::NotAnObject(object.coupon().clone()))?;

		let handler_ptr = self.export_handler_on(object, handler)?;
		client.add_handler(name, handler_ptr.clone());
		let bound = self.run(
			JsFunction::new(BIND_EVENT)
				.arg(object)
				.arg(name)
				.arg(&handler_ptr),
		);
		if let Err(e) = bound {
			client.remove_handler(name, &handler_ptr);
			let _ = self.inner.vendor.destroy(&handler_ptr);
			return Err(e);
		}

		tracing::debug!(session = self.id(), object = %object.coupon(), handler = %handler_ptr.coupon(), name, "bound handler");
		Ok(handler_ptr)
	}

	/// Returns the stream of `name` events on `object`, creating it on first use.
	///
	/// First access binds a handler feeding the stream. Concurrent first
	/// accesses resolve to one stream and one binding.
	///
	/// # Errors
	///
	/// Same as [`bind`](Self::bind).
	pub fn event(&self, object: &RemotePtr, name: &str) -> Result<EventStream> {
		let guard = object.pin()?;
		let client = guard
			.payload()
			.as_object()
			.ok_or_else(|| Error::NotAnObject(object.coupon().clone()))?;

		let mut table = client.events.lock();
		if let Some(stream) = table.get(name) {
			return Ok(stream.clone());
		}

		let stream = EventStream::new(name);
		let sink = stream.clone();
		self.bind(
			object,
			name,
			Handler::variadic(move |args| {
				sink.emit(args);
				async { Ok(()) }
			}),
		)?;

		table.insert(name.to_string(), stream.clone());
		Ok(stream)
	}

	/// Finalizes `ptr` now and tells the browser to drop its mirror.
	pub fn destroy(&self, ptr: &RemotePtr) -> Result<()> {
		let coupon = self.inner.vendor.destroy(ptr)?;
		self.release(vec![coupon]);
		Ok(())
	}

	/// Runs a collection pass and releases the finalized coupons in the browser.
	pub fn collect(&self) -> Vec<Coupon> {
		let finalized = self.inner.vendor.collect();
		if !finalized.is_empty() {
			self.release(finalized.clone());
		}
		finalized
	}

	/// Registers a callback fired once when the session ends.
	///
	/// Fires immediately if the session has already ended.
	pub fn on_disconnect(&self, hook: impl FnOnce() + Send + 'static) {
		{
			let mut hooks = self.inner.hooks.lock();
			if let DisconnectHooks::Waiting(pending) = &mut *hooks {
				pending.push(Box::new(hook));
				return;
			}
		}
		run_hook(self.id(), Box::new(hook));
	}

	/// Logs `message` on the server and prints it in the browser console.
	pub fn debug_log(&self, message: impl Into<String>) -> Result<()> {
		let message = message.into();
		tracing::debug!(session = self.id(), %message, "debug");
		if self.is_closed() {
			return Err(Error::SessionClosed);
		}
		self.send(ServerMessage::Debug { message })
	}

	/// Ends the session. Idempotent.
	///
	/// Fails every pending call with [`Error::SessionClosed`], releases every
	/// remote pointer, then fires the disconnect hooks. Messages already queued
	/// are still written; the event loop stops once they are.
	pub fn disconnect(&self) {
		let waiting = {
			let mut calls = self.inner.calls.lock();
			if calls.closed {
				return;
			}
			calls.closed = true;
			std::mem::take(&mut calls.waiting)
		};

		self.inner.outbound_tx.lock().take();

		let pending = waiting.len();
		for (_, tx) in waiting {
			let _ = tx.send(Err(Error::SessionClosed));
		}
		let released = self.inner.vendor.release_all();
		tracing::info!(session = self.id(), pending, released = released.len(), "window disconnected");

		let hooks = std::mem::replace(&mut *self.inner.hooks.lock(), DisconnectHooks::Fired);
		if let DisconnectHooks::Waiting(hooks) = hooks {
			for hook in hooks {
				run_hook(self.id(), hook);
			}
		}
	}

	fn send(&self, message: ServerMessage) -> Result<()> {
		self.inner
			.outbound_tx
			.lock()
			.as_ref()
			.ok_or(Error::SessionClosed)?
			.send(message)
			.map_err(|_| Error::SessionClosed)
	}

	fn release(&self, coupons: Vec<Coupon>) {
		if self.is_closed() {
			return;
		}
		if let Err(e) = self.send(ServerMessage::Release { coupons }) {
			tracing::debug!(session = self.id(), error = %e, "release not sent");
		}
	}

	/// Decodes and dispatches one inbound frame.
	fn handle_frame(&self, frame: Value) -> Result<()> {
		let message: ClientMessage = serde_json::from_value(frame)
			.map_err(|e| Error::Protocol(format!("undecodable client message: {e}")))?;
		self.dispatch(message)
	}

	pub(crate) fn dispatch(&self, message: ClientMessage) -> Result<()> {
		match message {
			ClientMessage::Result { id, value, error } => {
				let waiter = self.inner.calls.lock().waiting.remove(&id);
				// Collect before resolving so pointers decoded by the caller
				// are not swept by this pass.
				self.collect();
				match waiter {
					Some(tx) => {
						let result = match error {
							Some(payload) => Err(Error::from(payload)),
							None => Ok(value.unwrap_or(Value::Null)),
						};
						if tx.send(result).is_err() {
							tracing::debug!(session = self.id(), id, "discarded result for abandoned call");
						}
					}
					None => {
						tracing::warn!(session = self.id(), id, "result for unknown call id (ignored)");
					}
				}
				Ok(())
			}
			ClientMessage::Event { coupon, name, args } => {
				self.dispatch_event(coupon, name, args);
				Ok(())
			}
		}
	}

	fn dispatch_event(&self, coupon: Coupon, name: String, args: Vec<Value>) {
		let session = self.id();
		let Some(guard) = self.inner.vendor.lookup(&coupon).and_then(|ptr| ptr.pin().ok()) else {
			tracing::debug!(session, %coupon, name, "event for unknown coupon (ignored)");
			return;
		};

		match guard.payload().clone() {
			Payload::Handler(handler) => self.spawn_handler(guard, handler, name, args),
			Payload::Object(object) => {
				let bound = object.handlers(&name);
				if bound.is_empty() {
					tracing::debug!(session, %coupon, name, "no handler bound (ignored)");
				}
				for ptr in bound {
					let Ok(handler_guard) = ptr.pin() else {
						continue;
					};
					let Some(handler) = handler_guard.payload().as_handler().cloned() else {
						continue;
					};
					self.spawn_handler(handler_guard, handler, name.clone(), args.clone());
				}
			}
			_ => {
				tracing::warn!(session, %coupon, name, "event target cannot receive events (ignored)");
			}
		}
	}

	/// Starts `handler` on its own task, keeping its pointer pinned until it
	/// finishes. Errors and panics are logged.
	///
	/// The handler closure itself is called inside the task, so a panic while
	/// building its future never reaches the dispatch loop.
	fn spawn_handler(&self, guard: PinGuard, handler: Handler, name: String, args: Vec<Value>) {
		let session = self.id();
		let coupon = guard.ptr().coupon().clone();

		tokio::spawn(async move {
			let _guard = guard;
			let invoked = async {
				let future = match handler.invoke(&coupon, args) {
					Ok(future) => future,
					Err(e) => {
						tracing::warn!(session, %coupon, name, error = %e, "handler rejected event");
						return Ok(());
					}
				};
				future.await
			};
			match AssertUnwindSafe(invoked).catch_unwind().await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					tracing::error!(session, %coupon, name, error = %e, "handler error");
				}
				Err(_) => {
					tracing::error!(session, %coupon, name, "handler panicked");
				}
			}
		});
	}
}

fn reference_coupon(value: &Value) -> Result<Coupon> {
	Coupon::from_reference(value).ok_or_else(|| {
		Error::Marshal(serde_json::Error::custom(format!(
			"expected coupon reference, got {value}"
		)))
	})
}

fn is_server_coupon(coupon: &Coupon) -> bool {
	coupon.as_str().starts_with(SERVER_PREFIX)
}

fn run_hook(session: SessionId, hook: DisconnectHook) {
	if std::panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
		tracing::error!(session, "disconnect hook panicked");
	}
}

impl std::fmt::Debug for Window {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Window")
			.field("id", &self.id())
			.field("closed", &self.is_closed())
			.field("pending_calls", &self.pending_calls())
			.finish()
	}
}

impl EventLoop {
	pub fn window(&self) -> &Window {
		&self.window
	}

	/// Serves the session until the transport closes or a fatal protocol
	/// error occurs, then disconnects the window.
	pub async fn run(self) {
		let EventLoop {
			window,
			mut sender,
			receiver,
			mut message_rx,
			mut outbound_rx,
		} = self;
		let session = window.id();

		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::warn!(session, error = %e, "transport read error");
			}
		});

		let mut writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				let value = match serde_json::to_value(&message) {
					Ok(value) => value,
					Err(e) => {
						tracing::error!(session, error = %e, "failed to encode outgoing message");
						continue;
					}
				};
				if let Err(e) = sender.send(value).await {
					tracing::warn!(session, error = %e, "transport write error");
					break;
				}
			}
		});

		loop {
			tokio::select! {
				incoming = message_rx.recv() => match incoming {
					Some(frame) => {
						if let Err(e) = window.handle_frame(frame) {
							if e.is_fatal() {
								tracing::error!(session, error = %e, "fatal protocol error, closing session");
								break;
							}
							tracing::warn!(session, error = %e, "error dispatching message");
						}
					}
					None => {
						tracing::debug!(session, "transport closed");
						break;
					}
				},
				_ = &mut writer => {
					tracing::debug!(session, "writer stopped");
					break;
				}
			}
		}

		window.disconnect();
		reader.abort();
		if !writer.is_finished()
			&& tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err()
		{
			tracing::debug!(session, "writer did not drain in time");
			writer.abort();
		}
	}
}
