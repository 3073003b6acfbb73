//! Tether Runtime - Sessions, remote pointers and the duplex call protocol
//!
//! This crate lets server-side code drive a connected browser:
//!
//! - **Window**: One connected session, with `run`/`call` and the dispatch loop
//! - **Vendor**: Coupon table and reachability-based collection of remote pointers
//! - **Marshalling**: Script templates with positional arguments
//! - **Handlers**: Server closures the browser can invoke through a coupon
//! - **Events**: Lazy per-name event streams on client objects
//! - **Ui**: Unit-of-work context with deferred actions
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ tether-server│  WebSocket endpoint, session registry
//! └──────┬───────┘
//!        │ bridges frames into TransportParts
//! ┌──────▼───────┐
//! │tether-runtime│  This crate
//! │  ┌────────┐  │
//! │  │ Window │  │  Call correlation, event dispatch
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Vendor │  │  Coupons, mark-sweep over remote pointers
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  In-memory channel transport
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tether_runtime::{ChannelTransport, JsFunction, Window};
//!
//! # async fn demo() -> tether_runtime::Result<()> {
//! let (parts, _browser) = ChannelTransport::pair();
//! let (window, event_loop) = Window::connect(parts);
//! tokio::spawn(event_loop.run());
//!
//! let sum: i64 = window.call(JsFunction::new("1+%1").arg(2)).await?;
//! assert_eq!(sum, 3);
//! # Ok(())
//! # }
//! ```

pub mod coupon;
pub mod error;
pub mod events;
pub mod handler;
pub mod marshal;
pub mod remote_ptr;
pub mod transport;
pub mod ui;
pub mod vendor;
pub mod window;

pub use coupon::CouponRegistry;
pub use error::{Error, Result};
pub use events::{ClientObject, EventStream};
pub use handler::{Handler, HandlerFuture};
pub use marshal::JsFunction;
pub use remote_ptr::{LocalValue, Payload, PinGuard, RemotePtr};
pub use tether_protocol::{ClientMessage, Coupon, ServerMessage};
pub use transport::{ChannelTransport, RemoteEnd, Transport, TransportParts, TransportReceiver};
pub use ui::{Ui, run_ui};
pub use vendor::{ROOT_COUPON, Vendor};
pub use window::{BIND_EVENT, EventLoop, SessionId, Window};
