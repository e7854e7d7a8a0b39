//! # Canonical JSON Bytes
//!
//! `CanonicalBytes` is the only byte representation a webhook signature is
//! ever computed over. Two JSON documents that differ only in key order or
//! whitespace produce identical canonical bytes.
//!
//! The layout is the one Python's `json.dumps(payload, sort_keys=True)`
//! emits, which is what the provider signs:
//!
//! 1. Object keys are sorted by code point at every nesting level.
//! 2. Separators are `", "` and `": "`.
//! 3. Array order is preserved.
//! 4. Strings are ASCII only. Anything outside printable ASCII is written as
//!    lowercase `\uXXXX`, with surrogate pairs above the BMP.
//! 5. Floats use Python's `repr`: shortest round-trip digits, a trailing
//!    `.0` on integral values, and `e+XX`/`e-XX` exponents outside
//!    `1e-4 <= |x| < 1e16`.
//!
//! The inner buffer is private, so a signature helper that takes
//! `&CanonicalBytes` cannot be handed raw, order-dependent bytes.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};

use crate::error::CanonicalizationError;

/// Bytes produced by sorted-key JSON serialization in the provider's layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Construct canonical bytes from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `CanonicalizationError::SerializationFailed` if the value
    /// cannot be represented as JSON (e.g. a map with non-string keys).
    pub fn new(obj: &impl Serialize) -> Result<Self, CanonicalizationError> {
        let value = serde_json::to_value(obj)?;
        let sorted = sort_keys(value);
        let mut buf = Vec::with_capacity(128);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, SortedAsciiFormatter);
        sorted.serialize(&mut ser)?;
        Ok(Self(buf))
    }

    /// Access the canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the canonical byte sequence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the canonical byte sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Rebuild every object with its entries in sorted key order.
///
/// `serde_json::Map` is BTreeMap-backed unless `preserve_order` is enabled
/// somewhere in the dependency graph. Sorting explicitly keeps the output
/// stable even if a transitive dependency flips that feature on.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        scalar => scalar,
    }
}

/// Spaced separators, ASCII-escaped strings and Python float formatting.
/// Quote, backslash and control-character escapes stay with serde_json,
/// whose lowercase `\u00XX` form already matches.
struct SortedAsciiFormatter;

impl Formatter for SortedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() && c != '\x7f' {
                continue;
            }
            writer.write_all(&bytes[start..i])?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(&bytes[start..])
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(python_float_repr(value).as_bytes())
    }
}

/// Python's `repr(float)` for a finite value.
fn python_float_repr(value: f64) -> String {
    // `{:e}` yields the shortest round-trip digits as `d.ddde<exp>`.
    let sci = format!("{value:e}");
    let (negative, body) = match sci.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, sci.as_str()),
    };
    let (mantissa, exp) = body.split_once('e').unwrap_or((body, "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let len = digits.len() as i32;
    // Position of the decimal point relative to the first digit.
    let decpt = exp.parse::<i32>().unwrap_or(0) + 1;

    let mut out = String::with_capacity(digits.len() + 8);
    if negative {
        out.push('-');
    }
    if decpt > -4 && decpt <= 16 {
        if decpt <= 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat('0').take((-decpt) as usize));
            out.push_str(&digits);
        } else if decpt >= len {
            out.push_str(&digits);
            out.extend(std::iter::repeat('0').take((decpt - len) as usize));
            out.push_str(".0");
        } else {
            out.push_str(&digits[..decpt as usize]);
            out.push('.');
            out.push_str(&digits[decpt as usize..]);
        }
    } else {
        out.push_str(&digits[..1]);
        if len > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let e = decpt - 1;
        out.push_str(&format!("e{}{:02}", if e < 0 { '-' } else { '+' }, e.abs()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn canonical_str(v: &Value) -> String {
        let cb = CanonicalBytes::new(v).unwrap();
        String::from_utf8(cb.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn sorts_top_level_keys() {
        let v = json!({"status": "success", "request_id": "abc", "data": {}});
        assert_eq!(
            canonical_str(&v),
            r#"{"data": {}, "request_id": "abc", "status": "success"}"#
        );
    }

    #[test]
    fn sorts_nested_keys_and_keeps_array_order() {
        let v = json!({
            "additional_info": {"reference_id": "r", "image_captured": ""},
            "steps": [{"b": 1, "a": 2}, 3]
        });
        assert_eq!(
            canonical_str(&v),
            r#"{"additional_info": {"image_captured": "", "reference_id": "r"}, "steps": [{"a": 2, "b": 1}, 3]}"#
        );
    }

    #[test]
    fn matches_python_sorted_dump() {
        // json.dumps(payload, sort_keys=True) output for the same document.
        let v: Value = serde_json::from_str(
            r#"{"status":"success","request_id":"abc","ok":true,"x":null,
                "data":{"name":"Zoë Ñandú","score":0.93,"steps":[1,2.5,1e-05,1e16,0.0001]}}"#,
        )
        .unwrap();
        assert_eq!(
            canonical_str(&v),
            r#"{"data": {"name": "Zo\u00eb \u00d1and\u00fa", "score": 0.93, "steps": [1, 2.5, 1e-05, 1e+16, 0.0001]}, "ok": true, "request_id": "abc", "status": "success", "x": null}"#
        );
    }

    #[test]
    fn non_ascii_and_control_characters_are_escaped() {
        let v = json!({"e": "\u{1F600}\u{7f}\n\u{1}\"\\"});
        assert_eq!(
            canonical_str(&v),
            r#"{"e": "\ud83d\ude00\u007f\n\u0001\"\\"}"#
        );
    }

    #[test]
    fn floats_follow_python_repr() {
        let cases = [
            (0.93, "0.93"),
            (1.0, "1.0"),
            (2.5, "2.5"),
            (1e16, "1e+16"),
            (1e15, "1000000000000000.0"),
            (1e-5, "1e-05"),
            (0.0001, "0.0001"),
            (1.5e-7, "1.5e-07"),
            (-0.0, "-0.0"),
            (123456789.125, "123456789.125"),
            (1e100, "1e+100"),
        ];
        for (value, expected) in cases {
            assert_eq!(python_float_repr(value), expected, "{value:?}");
        }
    }

    #[test]
    fn whitespace_in_source_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{ "b" : 1 , "a" : [ 1, 2 ] }"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":[1,2],"b":1}"#).unwrap();
        assert_eq!(
            CanonicalBytes::new(&a).unwrap(),
            CanonicalBytes::new(&b).unwrap()
        );
    }

    #[test]
    fn empty_object_is_not_empty_bytes() {
        let cb = CanonicalBytes::new(&json!({})).unwrap();
        assert_eq!(cb.as_bytes(), b"{}");
        assert!(!cb.is_empty());
        assert_eq!(cb.len(), 2);
    }

    proptest! {
        #[test]
        fn key_insertion_order_never_changes_output(
            keys in proptest::collection::btree_set("[a-z_]{1,8}", 1..8)
        ) {
            let forward: Map<String, Value> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), json!(i)))
                .collect();
            let reverse: Map<String, Value> = keys
                .iter()
                .enumerate()
                .rev()
                .map(|(i, k)| (k.clone(), json!(i)))
                .collect();
            prop_assert_eq!(
                CanonicalBytes::new(&Value::Object(forward)).unwrap(),
                CanonicalBytes::new(&Value::Object(reverse)).unwrap()
            );
        }

        #[test]
        fn output_is_always_ascii(s in "\\PC{0,24}") {
            let cb = CanonicalBytes::new(&json!({ "v": s })).unwrap();
            prop_assert!(cb.as_bytes().is_ascii());
        }
    }
}
