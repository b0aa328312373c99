//! Typed values and their canonical byte encoding (C1, §4.1).

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};

use crate::error::{StoreError, StoreResult};
use crate::location::Location;

/// The tagged value algebra of §3.
///
/// `Float` equality and hashing are bitwise (spec §4.1: "multiple valid
/// renderings of doubles are not canonical; callers must treat double
/// comparisons as bitwise"), so `Value` implements `PartialEq`/`Hash`
/// manually instead of deriving them.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    SetList(Vec<Value>),
    Pointer(Location),
    None,
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::List(v) => write!(f, "List({v:?})"),
            Value::SetList(v) => write!(f, "SetList({v:?})"),
            Value::Pointer(v) => write!(f, "Pointer({v:?})"),
            Value::None => write!(f, "None"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::SetList(a), Value::SetList(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::None, Value::None) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);

        match self {
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Str(v) => v.hash(state),
            Value::List(v) | Value::SetList(v) => v.hash(state),
            Value::Pointer(v) => v.hash(state),
            Value::None => {}
        }
    }
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_pointer(&self) -> Option<&Location> {
        match self {
            Value::Pointer(location) => Some(location),
            _ => None,
        }
    }

    pub fn into_pointer(self) -> Option<Location> {
        match self {
            Value::Pointer(location) => Some(location),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// A short name of this value's kind, used in schema/range error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "double",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::SetList(_) => "list",
            Value::Pointer(_) => "pointer",
            Value::None => "none",
        }
    }
}

// --- canonical byte encoding (§4.1) -----------------------------------------

const ESC: u8 = 0x01;
const ESC_NUL: u8 = 0x02;
const ESC_ESC: u8 = 0x01;
const ESC_TAB: u8 = 0x03;
const ESC_LF: u8 = 0x04;

/// netstring-style length delimiter used by the `l` and `p` framing rules:
/// each child is written as `<ascii-decimal-length> ':' <child-bytes>` so
/// that a variable-width decimal length self-delimits without relying on an
/// outer container length. The spec does not name this separator
/// explicitly; `:` was picked because it can never appear in a length
/// field and is outside the top-level-forbidden byte set (`\0`, `\t`, `\n`).
const LEN_SEP: u8 = b':';

fn escape_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());

    for &byte in s.as_bytes() {
        match byte {
            0x00 => {
                out.push(ESC);
                out.push(ESC_NUL);
            }
            0x01 => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            b'\t' => {
                out.push(ESC);
                out.push(ESC_TAB);
            }
            b'\n' => {
                out.push(ESC);
                out.push(ESC_LF);
            }
            other => out.push(other),
        }
    }

    out
}

fn unescape_string(bytes: &[u8]) -> StoreResult<String> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();

    while let Some(byte) = iter.next() {
        if byte != ESC {
            out.push(byte);
            continue;
        }

        match iter.next() {
            Some(ESC_NUL) => out.push(0x00),
            Some(ESC_ESC) => out.push(0x01),
            Some(ESC_TAB) => out.push(b'\t'),
            Some(ESC_LF) => out.push(b'\n'),
            _ => {
                return Err(StoreError::usage(
                    "decode",
                    "truncated or invalid string escape sequence",
                ))
            }
        }
    }

    String::from_utf8(out)
        .map_err(|_| StoreError::usage("decode", "decoded string is not valid UTF-8"))
}

fn write_framed(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(LEN_SEP);
    out.extend_from_slice(payload);
}

/// Reads one `<len> ':' <payload>` frame from `bytes[*pos..]`, advancing `*pos`.
fn read_framed<'a>(bytes: &'a [u8], pos: &mut usize) -> StoreResult<&'a [u8]> {
    let start = *pos;
    let mut cursor = start;

    while cursor < bytes.len() && bytes[cursor] != LEN_SEP {
        cursor += 1;
    }

    if cursor >= bytes.len() {
        return Err(StoreError::usage("decode", "missing length separator"));
    }

    let len_str = std::str::from_utf8(&bytes[start..cursor])
        .map_err(|_| StoreError::usage("decode", "non-UTF8 length field"))?;
    let len: usize = len_str
        .parse()
        .map_err(|_| StoreError::usage("decode", "non-numeric length field"))?;

    let payload_start = cursor + 1;
    let payload_end = payload_start + len;

    if payload_end > bytes.len() {
        return Err(StoreError::usage("decode", "frame length exceeds buffer"));
    }

    *pos = payload_end;

    Ok(&bytes[payload_start..payload_end])
}

impl Value {
    /// Encodes this value into its canonical byte form (§4.1).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        match self {
            Value::Bool(v) => {
                out.push(b'b');
                out.push(if *v { b'1' } else { b'0' });
            }
            Value::Int(v) => {
                out.push(b'i');
                out.extend_from_slice(v.to_string().as_bytes());
            }
            Value::Float(v) => {
                out.push(b'd');
                out.extend_from_slice(format!("{v}").as_bytes());
            }
            Value::Str(v) => {
                out.push(b's');
                out.extend_from_slice(&escape_string(v));
            }
            Value::None => {
                out.push(b'n');
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    write_framed(&mut out, &item.to_bytes());
                }
            }
            // SetList shares the `l`-tagged on-disk shape for the container
            // semantics described in §4.3, but needs its own tag here so
            // that `decode(encode(v)) == v` (Testable Properties #1) holds
            // for a canonical SetList value, not only for List.
            Value::SetList(items) => {
                out.push(b'u');
                for item in items {
                    write_framed(&mut out, &item.to_bytes());
                }
            }
            Value::Pointer(location) => {
                out.push(b'p');
                write_framed(&mut out, &Value::Str(location.entity_name().to_string()).to_bytes());
                for elem in location.path() {
                    match elem {
                        crate::location::LocElem::Slot(name) => {
                            write_framed(&mut out, &Value::Str(name.clone()).to_bytes());
                        }
                        crate::location::LocElem::ElementRef(value) => {
                            let mut inner = vec![b'e'];
                            inner.extend_from_slice(&value.to_bytes());
                            write_framed(&mut out, &inner);
                        }
                    }
                }
            }
        }

        out
    }

    /// Decodes a value previously produced by [`Value::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Value> {
        let (value, consumed) = Self::decode_at(bytes)?;

        if consumed != bytes.len() {
            return Err(StoreError::usage("decode", "trailing bytes after value"));
        }

        Ok(value)
    }

    fn decode_at(bytes: &[u8]) -> StoreResult<(Value, usize)> {
        let tag = *bytes
            .first()
            .ok_or_else(|| StoreError::usage("decode", "empty buffer"))?;
        let rest = &bytes[1..];

        match tag {
            b'b' => {
                let flag = rest
                    .first()
                    .ok_or_else(|| StoreError::usage("decode", "truncated bool"))?;
                let value = match flag {
                    b'1' => true,
                    b'0' => false,
                    _ => return Err(StoreError::usage("decode", "invalid bool payload")),
                };
                Ok((Value::Bool(value), 2))
            }
            b'i' => {
                let end = rest.len();
                let text = std::str::from_utf8(rest)
                    .map_err(|_| StoreError::usage("decode", "non-UTF8 int payload"))?;
                let value: i64 = text
                    .parse()
                    .map_err(|_| StoreError::usage("decode", "invalid int payload"))?;
                Ok((Value::Int(value), 1 + end))
            }
            b'd' => {
                let end = rest.len();
                let text = std::str::from_utf8(rest)
                    .map_err(|_| StoreError::usage("decode", "non-UTF8 double payload"))?;
                let value: f64 = text
                    .parse()
                    .map_err(|_| StoreError::usage("decode", "invalid double payload"))?;
                Ok((Value::Float(value), 1 + end))
            }
            b's' => {
                let value = unescape_string(rest)?;
                Ok((Value::Str(value), bytes.len()))
            }
            b'n' => Ok((Value::None, 1)),
            b'l' | b'u' => {
                let mut items = Vec::new();
                let mut pos = 0usize;

                while pos < rest.len() {
                    let frame = read_framed(rest, &mut pos)?;
                    items.push(Value::from_bytes(frame)?);
                }

                let value = if tag == b'l' {
                    Value::List(items)
                } else {
                    Value::SetList(items)
                };

                Ok((value, 1 + pos))
            }
            b'p' => {
                let mut pos = 0usize;

                let entity_frame = read_framed(rest, &mut pos)?;
                let entity = match Value::from_bytes(entity_frame)? {
                    Value::Str(name) => name,
                    _ => {
                        return Err(StoreError::usage(
                            "decode",
                            "pointer entity name must be a string",
                        ))
                    }
                };

                let mut location = Location::for_entity(entity);

                while pos < rest.len() {
                    let frame = read_framed(rest, &mut pos)?;

                    if frame.first() == Some(&b'e') {
                        let inner = Value::from_bytes(&frame[1..])?;
                        location.push_element_ref(inner);
                    } else {
                        match Value::from_bytes(frame)? {
                            Value::Str(name) => location.push_slot(name),
                            _ => {
                                return Err(StoreError::usage(
                                    "decode",
                                    "pointer slot name must be a string",
                                ))
                            }
                        }
                    }
                }

                Ok((Value::Pointer(location), 1 + pos))
            }
            other => Err(StoreError::usage(
                "decode",
                format!("unknown value tag {other:#x}"),
            )),
        }
    }
}

/// A deterministic, cheap two-character hash over a value's canonical
/// string rendering (§4.3's `h2`). Collisions are tolerated by design:
/// enumeration still works because the directory key lists every hash
/// prefix in use.
pub fn h2(value: &Value) -> String {
    let rendering = canonical_string(value);

    const ALPHABET_LEN: usize = 93;
    const ALPHABET_START: u8 = 33; // first printable, non-space ASCII byte

    let char_at = |n: usize| -> char { (ALPHABET_START + (n % ALPHABET_LEN) as u8) as char };

    let len_part = char_at(rendering.len());
    let sum: usize = rendering.bytes().map(|b| b as usize).sum();
    let sum_part = char_at(sum);

    let mut out = String::with_capacity(2);
    out.push(len_part);
    out.push(sum_part);
    out
}

/// §4.3/§9: for `List`/`SetList`/`Pointer` values the hash only considers
/// the first child (or the pointer's entity name) for efficiency; this is
/// documented in spec.md §9 as a performance knob, not a correctness bug.
fn canonical_string(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => s.clone(),
        Value::None => String::new(),
        Value::List(items) | Value::SetList(items) => items
            .first()
            .map(canonical_string)
            .unwrap_or_default(),
        Value::Pointer(location) => location.entity_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn roundtrip(value: Value) {
        let bytes = value.to_bytes();
        let decoded = Value::from_bytes(&bytes).expect("decode");
        assert_eq!(value, decoded);
    }

    #[test]
    fn scalars_round_trip() {
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Int(0));
        roundtrip(Value::Float(3.5));
        roundtrip(Value::Float(-0.0));
        roundtrip(Value::Str("hello world".to_string()));
        roundtrip(Value::None);
    }

    #[test]
    fn strings_with_reserved_bytes_round_trip() {
        roundtrip(Value::Str("a\tb\nc\0d\x01e".to_string()));
        roundtrip(Value::Str("unicode: caf\u{e9}, \u{1f980}".to_string()));
    }

    #[test]
    fn lists_and_set_lists_round_trip_distinctly() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Str("x".into())]);
        let set_list = Value::SetList(vec![Value::Int(1), Value::Int(2)]);

        roundtrip(list.clone());
        roundtrip(set_list.clone());

        assert_ne!(list.to_bytes(), set_list.to_bytes());
    }

    #[test]
    fn pointers_round_trip() {
        let mut location = Location::for_entity("bob".to_string());
        location.push_slot("livesin".to_string());

        roundtrip(Value::Pointer(location.clone()));

        let mut nested = Location::for_entity("bob".to_string());
        nested.push_slot("generalizations".to_string());
        nested.push_element_ref(Value::Pointer(location));

        roundtrip(Value::Pointer(nested));
    }

    #[test]
    fn float_equality_is_bitwise() {
        // IEEE 754 says NaN != NaN, but §4.1 mandates bitwise comparison:
        // two `Value::Float` with identical bit patterns compare equal.
        let nan = f64::NAN;
        assert_eq!(Value::Float(nan), Value::Float(nan));
        assert_eq!(Value::Float(0.0), Value::Float(0.0));
    }

    #[test]
    fn h2_is_deterministic_and_short() {
        let a = h2(&Value::Str("tokyo".to_string()));
        let b = h2(&Value::Str("tokyo".to_string()));
        assert_eq!(a, b);
        assert_eq!(a.chars().count(), 2);
    }
}
