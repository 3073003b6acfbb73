//! Marshalling between Rust values, wire values and evaluable script text.
//!
//! Outgoing values are converted to [`serde_json::Value`]. Remote pointers
//! serialize as a coupon reference (`{"$coupon": "<id>"}`) instead of their
//! contents, and are rendered into script as a lookup expression
//! (`Tether.get("<id>")`) so the browser resolves its own mirror object.
//!
//! # Templates
//!
//! A [`JsFunction`] pairs a code template with positional arguments.
//! Placeholders are 1-based: `%1`, `%2`, ...; `%%` is a literal percent sign
//! and a `%` not followed by a digit is copied through unchanged.
//!
//! ```text
//! JsFunction::new("1+%1").arg(2)  =>  "1+2"
//! JsFunction::new("%1.appendChild(%2)").arg(&parent).arg(&child)
//!     =>  Tether.get("s3").appendChild(Tether.get("s9"))
//! ```

use std::fmt::Write as _;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_protocol::Coupon;

use crate::error::{Error, Result};

/// Browser-side function resolving a coupon to its mirror object.
pub const LOOKUP_FN: &str = "Tether.get";

/// Immutable call template: code with placeholders plus marshalled arguments.
#[derive(Debug)]
pub struct JsFunction {
	template: String,
	args: Vec<Value>,
	encode_error: Option<serde_json::Error>,
}

impl JsFunction {
	pub fn new(template: impl Into<String>) -> Self {
		Self {
			template: template.into(),
			args: Vec::new(),
			encode_error: None,
		}
	}

	/// Builds a function from already-encoded wire arguments.
	pub fn with_args(template: impl Into<String>, args: Vec<Value>) -> Self {
		Self {
			template: template.into(),
			args,
			encode_error: None,
		}
	}

	/// Appends the next positional argument.
	///
	/// Encoding failures are reported by [`render`](Self::render).
	pub fn arg<T: Serialize>(mut self, value: T) -> Self {
		match encode(&value) {
			Ok(v) => self.args.push(v),
			Err(Error::Marshal(e)) if self.encode_error.is_none() => self.encode_error = Some(e),
			Err(_) => {}
		}
		self
	}

	pub fn template(&self) -> &str {
		&self.template
	}

	pub fn args(&self) -> &[Value] {
		&self.args
	}

	/// Renders the final evaluable source text.
	///
	/// # Errors
	///
	/// [`Error::Marshal`] if an argument failed to encode,
	/// [`Error::PlaceholderArityMismatch`] if the template references a
	/// placeholder with no argument.
	pub fn render(self) -> Result<String> {
		if let Some(e) = self.encode_error {
			return Err(Error::Marshal(e));
		}
		render_template(&self.template, &self.args)
	}
}

/// Converts a value to its wire form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
	Ok(serde_json::to_value(value)?)
}

/// Decodes a wire value into the statically expected shape.
///
/// # Errors
///
/// [`Error::Marshal`] if the shape does not match `T`.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
	Ok(serde_json::from_value(value)?)
}

/// Substitutes `%N` placeholders with the textual form of `args[N-1]`.
pub fn render_template(template: &str, args: &[Value]) -> Result<String> {
	let mut out = String::with_capacity(template.len() + 16 * args.len());
	let mut chars = template.chars().peekable();

	while let Some(c) = chars.next() {
		if c != '%' {
			out.push(c);
			continue;
		}
		match chars.peek() {
			Some('%') => {
				chars.next();
				out.push('%');
			}
			Some(d) if d.is_ascii_digit() => {
				let mut index = 0usize;
				while let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
					index = index.saturating_mul(10).saturating_add(digit as usize);
					chars.next();
				}
				let arg = index
					.checked_sub(1)
					.and_then(|i| args.get(i))
					.ok_or(Error::PlaceholderArityMismatch {
						index,
						arity: args.len(),
					})?;
				write_script_value(&mut out, arg)?;
			}
			_ => out.push('%'),
		}
	}

	Ok(out)
}

/// Writes a wire value as a script expression.
///
/// Plain values become JSON literals; coupon references, at any depth,
/// become lookup expressions.
fn write_script_value(out: &mut String, value: &Value) -> Result<()> {
	match value {
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_script_value(out, item)?;
			}
			out.push(']');
		}
		Value::Object(map) => {
			if let Some(coupon) = Coupon::from_reference(value) {
				write_lookup(out, &coupon)?;
				return Ok(());
			}
			out.push('{');
			for (i, (key, item)) in map.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&serde_json::to_string(key)?);
				out.push(':');
				write_script_value(out, item)?;
			}
			out.push('}');
		}
		scalar => out.push_str(&serde_json::to_string(scalar)?),
	}
	Ok(())
}

fn write_lookup(out: &mut String, coupon: &Coupon) -> Result<()> {
	let quoted = serde_json::to_string(coupon.as_str())?;
	let _ = write!(out, "{LOOKUP_FN}({quoted})");
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use serde::Deserialize;
	use serde_json::json;

	use super::*;

	#[test]
	fn renders_plain_argument() {
		let code = JsFunction::new("1+%1").arg(2).render().unwrap();
		assert_eq!(code, "1+2");
	}

	#[test]
	fn renders_strings_as_json_literals() {
		let code = JsFunction::new("alert(%1)")
			.arg("say \"hi\"\n")
			.render()
			.unwrap();
		assert_eq!(code, r#"alert("say \"hi\"\n")"#);
	}

	#[test]
	fn renders_multiple_and_repeated_placeholders() {
		let code = JsFunction::new("%2 - %1 + %2")
			.arg(1)
			.arg(10)
			.render()
			.unwrap();
		assert_eq!(code, "10 - 1 + 10");
	}

	#[test]
	fn renders_multi_digit_placeholder() {
		let mut f = JsFunction::new("[%1,%12]");
		for i in 1..=12 {
			f = f.arg(i);
		}
		assert_eq!(f.render().unwrap(), "[1,12]");
	}

	#[test]
	fn percent_escapes() {
		let code = JsFunction::new("%1 %% 3 + '50%'").arg(7).render().unwrap();
		assert_eq!(code, "7 % 3 + '50%'");
	}

	#[test]
	fn missing_argument_is_arity_mismatch() {
		let err = JsFunction::new("f(%1, %2)").arg(1).render().unwrap_err();
		match err {
			Error::PlaceholderArityMismatch { index, arity } => {
				assert_eq!(index, 2);
				assert_eq!(arity, 1);
			}
			other => panic!("Expected PlaceholderArityMismatch, got {other:?}"),
		}
	}

	#[test]
	fn zero_placeholder_is_arity_mismatch() {
		let err = JsFunction::new("f(%0)").arg(1).render().unwrap_err();
		assert!(matches!(
			err,
			Error::PlaceholderArityMismatch { index: 0, arity: 1 }
		));
	}

	#[test]
	fn coupon_reference_renders_as_lookup() {
		let f = JsFunction::with_args("%1.focus()", vec![Coupon::new("s3").to_reference()]);
		assert_eq!(f.render().unwrap(), r#"Tether.get("s3").focus()"#);
	}

	#[test]
	fn nested_coupon_reference_renders_as_lookup() {
		let arg = json!({"target": {"$coupon": "c1"}, "list": [1, {"$coupon": "s2"}]});
		let code = render_template("f(%1)", &[arg]).unwrap();
		assert_eq!(
			code,
			r#"f({"list":[1,Tether.get("s2")],"target":Tether.get("c1")})"#
		);
	}

	#[test]
	fn unencodable_argument_surfaces_on_render() {
		let mut bad = BTreeMap::new();
		bad.insert(vec![1u8], 1);
		let err = JsFunction::new("f(%1)").arg(bad).render().unwrap_err();
		assert!(matches!(err, Error::Marshal(_)), "got {err:?}");
	}

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Point {
		x: f64,
		y: f64,
		label: Option<String>,
	}

	#[test]
	fn plain_values_round_trip() {
		let point = Point {
			x: 1.5,
			y: -2.0,
			label: None,
		};
		let back: Point = decode(encode(&point).unwrap()).unwrap();
		assert_eq!(back, point);

		let nested = json!({"a": [null, true, 3, "s", {"b": []}]});
		let back: Value = decode(encode(&nested).unwrap()).unwrap();
		assert_eq!(back, nested);
	}

	#[test]
	fn decode_shape_mismatch() {
		let err = decode::<i64>(json!("three")).unwrap_err();
		assert!(matches!(err, Error::Marshal(_)));
		let err = decode::<Point>(json!({"x": 1})).unwrap_err();
		assert!(matches!(err, Error::Marshal(_)));
	}
}
