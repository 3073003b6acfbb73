//! Execution context binding a window and batching deferred actions.
//!
//! [`run_ui`] runs one logical unit of work against a [`Window`]. Actions
//! registered with [`Ui::defer`] while the unit runs are not executed on the
//! spot; they are drained once, in append order, after the unit's primary
//! result has been computed. This lets recursive construction code schedule
//! side effects (exporting a handler, binding an event) before the value
//! they depend on is complete.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::marshal::JsFunction;
use crate::window::Window;

type DeferredFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Deferred = Box<dyn FnOnce(Window) -> DeferredFuture + Send>;

/// Ambient context of one unit of work. Clones share the deferred list.
#[derive(Clone)]
pub struct Ui {
	window: Window,
	deferred: Arc<Mutex<Vec<Deferred>>>,
}

impl Ui {
	fn new(window: Window) -> Self {
		Self {
			window,
			deferred: Arc::new(Mutex::new(Vec::new())),
		}
	}

	pub fn window(&self) -> &Window {
		&self.window
	}

	/// Queues `action` to run after the unit's primary result.
	pub fn defer<F, Fut>(&self, action: F)
	where
		F: FnOnce(Window) -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let action: Deferred = Box::new(move |window| Box::pin(action(window)));
		self.deferred.lock().push(action);
	}

	/// Number of actions waiting for the unit boundary.
	pub fn deferred_len(&self) -> usize {
		self.deferred.lock().len()
	}

	/// Runs `function` now. See [`Window::run`].
	pub fn run(&self, function: JsFunction) -> Result<()> {
		self.window.run(function)
	}

	/// Calls `function` now. See [`Window::call`].
	pub async fn call<T: DeserializeOwned>(&self, function: JsFunction) -> Result<T> {
		self.window.call(function).await
	}

	/// Calls `function` now. See [`Window::call_value`].
	pub async fn call_value(&self, function: JsFunction) -> Result<Value> {
		self.window.call_value(function).await
	}

	/// Drains the list until empty. Actions queued while draining run in the
	/// same drain, after those already queued.
	async fn drain(&self) -> Result<()> {
		loop {
			let batch = std::mem::take(&mut *self.deferred.lock());
			if batch.is_empty() {
				return Ok(());
			}
			tracing::trace!(session = self.window.id(), actions = batch.len(), "running deferred actions");
			for action in batch {
				action(self.window.clone()).await?;
			}
		}
	}
}

impl fmt::Debug for Ui {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Ui")
			.field("window", &self.window.id())
			.field("deferred", &self.deferred_len())
			.finish()
	}
}

/// Runs one unit of work, then its deferred actions.
///
/// If the unit fails, its deferred actions are discarded and the error is
/// returned. If a deferred action fails, the remaining ones are discarded.
pub async fn run_ui<T, F, Fut>(window: &Window, unit: F) -> Result<T>
where
	F: FnOnce(Ui) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let ui = Ui::new(window.clone());
	let value = match unit(ui.clone()).await {
		Ok(value) => value,
		Err(e) => {
			let dropped = std::mem::take(&mut *ui.deferred.lock()).len();
			if dropped > 0 {
				tracing::debug!(session = window.id(), dropped, "unit failed, deferred actions discarded");
			}
			return Err(e);
		}
	};
	ui.drain().await?;
	Ok(value)
}
