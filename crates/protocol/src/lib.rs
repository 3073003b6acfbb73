//! Wire types for the tether browser scripting bridge.
//!
//! Shared between the server runtime and anything that speaks the protocol
//! on the browser side (including test doubles).

pub mod coupon;
pub mod message;

pub use coupon::{COUPON_KEY, Coupon};
pub use message::{CallId, ClientMessage, ErrorPayload, ServerMessage};
