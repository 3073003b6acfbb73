//! Messages exchanged between the server and the browser-side runtime.
//!
//! The protocol is a duplex stream of JSON objects tagged on `"type"`:
//!
//! 1. Server sends [`ServerMessage::Run`] (fire-and-forget) or
//!    [`ServerMessage::Call`] (expects a reply) with evaluable script text
//! 2. Client answers every `call` with [`ClientMessage::Result`] bearing the same id
//! 3. Client reports events on exported handlers with [`ClientMessage::Event`]
//! 4. Server tells the client to drop mirror objects with [`ServerMessage::Release`]
//!
//! # Main Types
//!
//! - [`ServerMessage`] - Messages from the server to the browser
//! - [`ClientMessage`] - Messages from the browser to the server
//! - [`ErrorPayload`] - Script failure reported in a call result

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coupon::Coupon;

/// Call identifier, unique for the lifetime of one session.
pub type CallId = u64;

/// Message sent from the server to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	/// Evaluate script, no reply expected.
	Run {
		/// Rendered, evaluable script text.
		code: String,
	},
	/// Evaluate script and reply with a [`ClientMessage::Result`].
	Call {
		/// Id the reply must carry.
		id: CallId,
		/// Rendered, evaluable script text.
		code: String,
	},
	/// The server finalized these objects; the client drops its mirrors.
	Release {
		coupons: Vec<Coupon>,
	},
	/// Diagnostic text for the browser console.
	Debug {
		message: String,
	},
}

/// Message sent from the browser to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	/// Outcome of a [`ServerMessage::Call`].
	Result {
		/// Id of the call this result answers.
		id: CallId,
		/// Evaluation result (absent means `null`).
		#[serde(default, skip_serializing_if = "Option::is_none")]
		value: Option<Value>,
		/// Script failure (mutually exclusive with `value`).
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<ErrorPayload>,
	},
	/// An event fired on an exported handler.
	Event {
		/// Coupon of the exported handler.
		coupon: Coupon,
		/// Event name, e.g. `"click"`.
		name: String,
		/// Event arguments in wire form.
		#[serde(default)]
		args: Vec<Value>,
	},
}

/// Script failure details reported by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error message
	pub message: String,
	/// Error type name (e.g., "TypeError", "ReferenceError")
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Stack trace
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}
