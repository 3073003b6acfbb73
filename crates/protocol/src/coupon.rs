//! Session-scoped object identifiers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key under which a coupon reference travels inside a JSON value.
pub const COUPON_KEY: &str = "$coupon";

/// Opaque token naming an object known to both the server and the browser.
///
/// Coupons are unique within one session and never reused while a pointer
/// referencing them is alive. Cloning is cheap (`Arc<str>`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coupon(Arc<str>);

impl Coupon {
	pub fn new(id: impl AsRef<str>) -> Self {
		Self(Arc::from(id.as_ref()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Wraps this coupon in its wire reference form: `{"$coupon": "<id>"}`.
	pub fn to_reference(&self) -> serde_json::Value {
		let mut map = serde_json::Map::with_capacity(1);
		map.insert(COUPON_KEY.to_string(), serde_json::Value::from(self.as_str()));
		serde_json::Value::Object(map)
	}

	/// Extracts a coupon from its wire reference form.
	///
	/// Returns `None` for anything that is not exactly a one-key
	/// `{"$coupon": "<id>"}` object.
	pub fn from_reference(value: &serde_json::Value) -> Option<Self> {
		let map = value.as_object()?;
		if map.len() != 1 {
			return None;
		}
		map.get(COUPON_KEY)?.as_str().map(Coupon::new)
	}
}

impl fmt::Debug for Coupon {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Coupon({})", self.0)
	}
}

impl fmt::Display for Coupon {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Coupon {
	fn from(id: &str) -> Self {
		Coupon::new(id)
	}
}

impl Serialize for Coupon {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for Coupon {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s: String = Deserialize::deserialize(deserializer)?;
		Ok(Coupon(Arc::from(s.as_str())))
	}
}
