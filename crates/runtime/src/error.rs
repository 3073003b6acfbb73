//! Error types for the tether runtime.

use tether_protocol::{Coupon, ErrorPayload};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tether runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// A different live pointer is already registered under this coupon.
	///
	/// Means the two sides disagree about object identity; fatal to the session.
	#[error("Duplicate coupon: {0} is already registered to a live pointer")]
	DuplicateCoupon(Coupon),

	/// The session root cannot be destroyed.
	#[error("Cannot destroy the session root")]
	CannotDestroyRoot,

	/// The pointer was finalized and its payload released.
	#[error("Remote pointer {0} has been finalized")]
	Finalized(Coupon),

	/// A template references a placeholder with no corresponding argument.
	#[error("Placeholder %{index} has no argument (template takes {arity})")]
	PlaceholderArityMismatch { index: usize, arity: usize },

	/// Value could not be converted to or from its wire form.
	#[error("Marshal error: {0}")]
	Marshal(#[from] serde_json::Error),

	/// An event carried a different number of arguments than the handler accepts.
	#[error("Handler {coupon} expects {expected} argument(s), event carried {got}")]
	HandlerArity {
		coupon: Coupon,
		expected: usize,
		got: usize,
	},

	/// A server-issued coupon that is not registered in this session.
	#[error("Unknown server coupon: {0}")]
	UnknownCoupon(Coupon),

	/// The pointer does not stand in for a client object.
	#[error("Remote pointer {0} is not a client object")]
	NotAnObject(Coupon),

	/// Script evaluation threw in the browser.
	#[error("{name}: {message}")]
	RemoteEval {
		/// Error type name (e.g., "TypeError")
		name: String,
		/// Human-readable error message
		message: String,
		/// JavaScript stack trace (if available)
		stack: Option<String>,
	},

	/// The session ended before or while the operation was pending.
	#[error("Session closed")]
	SessionClosed,

	/// Peer violated the wire protocol.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// Transport-level error.
	#[error("Transport error: {0}")]
	Transport(String),
}

impl Error {
	/// Returns true if the session ended underneath the operation.
	pub fn is_session_closed(&self) -> bool {
		matches!(self, Error::SessionClosed)
	}

	/// Returns true if the error must tear down the session.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::DuplicateCoupon(_) | Error::Protocol(_) | Error::Transport(_)
		)
	}

	/// Returns the remote message if this is a script failure.
	pub fn remote_message(&self) -> Option<&str> {
		match self {
			Error::RemoteEval { message, .. } => Some(message),
			_ => None,
		}
	}
}

impl From<ErrorPayload> for Error {
	fn from(error: ErrorPayload) -> Self {
		Error::RemoteEval {
			name: error.name.unwrap_or_else(|| "Error".to_string()),
			message: error.message,
			stack: error.stack,
		}
	}
}
