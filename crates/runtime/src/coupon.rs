//! Coupon issuing.

use std::sync::atomic::{AtomicU64, Ordering};

use tether_protocol::Coupon;

/// Prefix of server-issued coupons. Browser-issued coupons use any other form.
pub const SERVER_PREFIX: &str = "s";

/// Issues session-unique coupons from a monotonic counter.
///
/// Coupons are never recycled, so a stale coupon can never alias a newer object.
#[derive(Debug)]
pub struct CouponRegistry {
	next: AtomicU64,
}

impl Default for CouponRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl CouponRegistry {
	pub fn new() -> Self {
		Self {
			next: AtomicU64::new(0),
		}
	}

	/// Returns a fresh coupon, unique for the registry's remaining lifetime.
	pub fn issue(&self) -> Coupon {
		let n = self.next.fetch_add(1, Ordering::SeqCst);
		Coupon::new(format!("{SERVER_PREFIX}{n}"))
	}
}
