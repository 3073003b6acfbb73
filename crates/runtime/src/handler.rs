//! Exported handler infrastructure.
//!
//! Handlers are closures of a fixed small set of arities. Each variant wraps a
//! decode-and-invoke function taking the raw wire arguments; the argument
//! count is checked against the variant before anything is decoded.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_protocol::Coupon;

use crate::error::{Error, Result};
use crate::marshal;

/// Boxed async handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Decode-and-invoke function: raw wire args → async `Result<()>`.
pub type InvokeFn = Arc<dyn Fn(Vec<Value>) -> Result<HandlerFuture> + Send + Sync>;

/// Callback invokable from the browser through an exported remote pointer.
#[derive(Clone)]
pub enum Handler {
	/// Takes no arguments.
	Nullary(InvokeFn),
	/// Takes exactly one argument.
	Unary(InvokeFn),
	/// Takes exactly two arguments.
	Binary(InvokeFn),
	/// Takes the raw argument list, any length.
	Variadic(InvokeFn),
}

impl Handler {
	pub fn nullary<F, Fut>(handler: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Handler::Nullary(Arc::new(move |_args| -> Result<HandlerFuture> {
			Ok(Box::pin(handler()))
		}))
	}

	pub fn unary<A, F, Fut>(handler: F) -> Self
	where
		A: DeserializeOwned,
		F: Fn(A) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Handler::Unary(Arc::new(move |args| -> Result<HandlerFuture> {
			let [a]: [Value; 1] = into_array(args)?;
			Ok(Box::pin(handler(marshal::decode(a)?)))
		}))
	}

	pub fn binary<A, B, F, Fut>(handler: F) -> Self
	where
		A: DeserializeOwned,
		B: DeserializeOwned,
		F: Fn(A, B) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Handler::Binary(Arc::new(move |args| -> Result<HandlerFuture> {
			let [a, b]: [Value; 2] = into_array(args)?;
			Ok(Box::pin(handler(marshal::decode(a)?, marshal::decode(b)?)))
		}))
	}

	pub fn variadic<F, Fut>(handler: F) -> Self
	where
		F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		Handler::Variadic(Arc::new(move |args| -> Result<HandlerFuture> {
			Ok(Box::pin(handler(args)))
		}))
	}

	/// Number of arguments accepted, `None` for variadic handlers.
	pub fn arity(&self) -> Option<usize> {
		match self {
			Handler::Nullary(_) => Some(0),
			Handler::Unary(_) => Some(1),
			Handler::Binary(_) => Some(2),
			Handler::Variadic(_) => None,
		}
	}

	/// Checks the argument count, decodes, and starts the handler.
	///
	/// # Errors
	///
	/// Returns [`Error::HandlerArity`] on a count mismatch and
	/// [`Error::Marshal`] when an argument does not decode.
	pub fn invoke(&self, coupon: &Coupon, args: Vec<Value>) -> Result<HandlerFuture> {
		if let Some(expected) = self.arity() {
			if args.len() != expected {
				return Err(Error::HandlerArity {
					coupon: coupon.clone(),
					expected,
					got: args.len(),
				});
			}
		}
		let invoke = match self {
			Handler::Nullary(f) | Handler::Unary(f) | Handler::Binary(f) | Handler::Variadic(f) => f,
		};
		invoke(args)
	}
}

impl fmt::Debug for Handler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.arity() {
			Some(n) => write!(f, "Handler(arity {n})"),
			None => f.write_str("Handler(variadic)"),
		}
	}
}

fn into_array<const N: usize>(args: Vec<Value>) -> Result<[Value; N]> {
	let got = args.len();
	args.try_into().map_err(|_| {
		Error::Protocol(format!("handler argument count changed after check: {got} != {N}"))
	})
}
