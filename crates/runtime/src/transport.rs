//! Transport abstraction between a window and its browser.
//!
//! A transport is split into a sending half ([`Transport`]) owned by the
//! window's writer task and a receiving half ([`TransportReceiver`]) that pumps
//! decoded JSON frames into an unbounded channel until the peer goes away.
//! Framing is the transport's concern; the runtime only sees JSON values, in
//! order, without loss.
//!
//! [`ChannelTransport`] is the in-memory implementation. The server bridges
//! WebSocket frames onto it, and tests drive it directly through [`RemoteEnd`].

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tether_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Sending half of a transport.
pub trait Transport: Send {
	/// Sends one message. Called by a single writer, one message at a time.
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads until the peer closes, forwarding frames to the message channel.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Everything a window needs from one connected transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// In-memory transport backed by unbounded channels.
pub struct ChannelTransport;

impl ChannelTransport {
	/// Creates connected server-side parts and the matching browser end.
	pub fn pair() -> (TransportParts, RemoteEnd) {
		let (out_tx, out_rx) = mpsc::unbounded_channel();
		let (in_tx, in_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		let parts = TransportParts {
			sender: Box::new(ChannelSender { tx: out_tx }),
			receiver: Box::new(ChannelReceiver {
				rx: in_rx,
				message_tx,
			}),
			message_rx,
		};
		let remote = RemoteEnd {
			outbound: out_rx,
			inbound: Some(in_tx),
		};
		(parts, remote)
	}
}

struct ChannelSender {
	tx: mpsc::UnboundedSender<Value>,
}

impl Transport for ChannelSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.tx
				.send(message)
				.map_err(|_| Error::Transport("peer dropped the outbound channel".to_string()))
		})
	}
}

struct ChannelReceiver {
	rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for ChannelReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		let ChannelReceiver { mut rx, message_tx } = *self;
		Box::pin(async move {
			while let Some(message) = rx.recv().await {
				if message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

/// Browser side of a [`ChannelTransport`].
pub struct RemoteEnd {
	outbound: mpsc::UnboundedReceiver<Value>,
	inbound: Option<mpsc::UnboundedSender<Value>>,
}

impl RemoteEnd {
	/// Next raw frame sent by the server, `None` once the server side is gone.
	pub async fn recv_value(&mut self) -> Option<Value> {
		self.outbound.recv().await
	}

	/// Next message sent by the server.
	///
	/// # Errors
	///
	/// [`Error::SessionClosed`] when the server side is gone,
	/// [`Error::Protocol`] if the frame is not a [`ServerMessage`].
	pub async fn recv(&mut self) -> Result<ServerMessage> {
		let value = self.recv_value().await.ok_or(Error::SessionClosed)?;
		serde_json::from_value(value).map_err(|e| Error::Protocol(format!("bad server frame: {e}")))
	}

	/// Non-blocking variant of [`recv`](Self::recv); `None` if nothing is queued.
	pub fn try_recv(&mut self) -> Option<ServerMessage> {
		let value = self.outbound.try_recv().ok()?;
		serde_json::from_value(value).ok()
	}

	/// Sends a message to the server.
	pub fn send(&self, message: &ClientMessage) -> Result<()> {
		let value = serde_json::to_value(message)?;
		self.send_value(value)
	}

	/// Sends a raw frame to the server.
	pub fn send_value(&self, value: Value) -> Result<()> {
		self.inbound
			.as_ref()
			.ok_or(Error::SessionClosed)?
			.send(value)
			.map_err(|_| Error::SessionClosed)
	}

	/// Closes the browser-to-server direction, as a disconnecting browser would.
	pub fn close(&mut self) {
		self.inbound = None;
	}

	/// Splits into an outbound stream and an inbound sender for bridging.
	pub fn into_parts(
		self,
	) -> (
		mpsc::UnboundedReceiver<Value>,
		Option<mpsc::UnboundedSender<Value>>,
	) {
		(self.outbound, self.inbound)
	}
}
