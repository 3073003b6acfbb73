//! Registry of connected windows.

use dashmap::DashMap;
use tether_runtime::{SessionId, Window};

/// Windows currently connected to the server, keyed by session id.
#[derive(Default)]
pub struct Sessions {
	windows: DashMap<SessionId, Window>,
}

impl Sessions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, window: Window) {
		self.windows.insert(window.id(), window);
	}

	pub fn remove(&self, id: SessionId) -> Option<Window> {
		self.windows.remove(&id).map(|(_, window)| window)
	}

	pub fn get(&self, id: SessionId) -> Option<Window> {
		self.windows.get(&id).map(|entry| entry.value().clone())
	}

	pub fn ids(&self) -> Vec<SessionId> {
		self.windows.iter().map(|entry| *entry.key()).collect()
	}

	pub fn len(&self) -> usize {
		self.windows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.windows.is_empty()
	}

	/// Disconnects every window; used on shutdown.
	pub fn disconnect_all(&self) {
		let windows: Vec<Window> = self.windows.iter().map(|e| e.value().clone()).collect();
		for window in windows {
			window.disconnect();
		}
	}
}
