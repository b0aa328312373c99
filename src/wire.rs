//! Location wire form (§6 "Location wire form (for CLI/REPL)") and
//! `valueFromString` (§6 entry points).
//!
//! `<a, b, =c, d>` wraps a [`Location`]: angle brackets, comma-separated
//! elements, the first element always the primitive-entity name. An element
//! beginning with `=` is an [`ElementRef`](crate::location::LocElem::ElementRef)
//! whose literal value follows; an element beginning with `<` nested inside
//! an `=` token is a Pointer literal. Anything else is a slot name.
//!
//! The CLI/REPL this grammar ultimately serves is out of scope (spec.md
//! §1); this module exists because §6 specifies the grammar precisely
//! enough to implement, and several §8 scenarios are most naturally
//! asserted against it directly (SPEC_FULL.md A.3).

use crate::error::{StoreError, StoreResult};
use crate::location::{LocElem, Location};
use crate::value::Value;

/// Renders a [`Location`] in wire form: `<entity, slot, =value, ...>`.
pub fn format_location(location: &Location) -> String {
    let mut out = String::from("<");
    out.push_str(location.entity_name());

    for elem in location.path() {
        out.push_str(", ");
        match elem {
            LocElem::Slot(name) => out.push_str(name),
            LocElem::ElementRef(value) => {
                out.push('=');
                out.push_str(&format_value_token(value));
            }
        }
    }

    out.push('>');
    out
}

/// Renders a [`Value`] as the literal token that follows an `=` in wire
/// form, or that stands alone as a `valueFromString` argument.
pub fn format_value_token(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => format!("{:?}", s),
        Value::None => "none".to_string(),
        Value::Pointer(location) => format_location(location),
        Value::List(items) | Value::SetList(items) => {
            let mut out = String::from("[");
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format_value_token(item));
            }
            out.push(']');
            out
        }
    }
}

/// Parses a wire-form [`Location`]: `<entity, slot, =value, ...>`.
pub fn parse_location(input: &str) -> StoreResult<Location> {
    let trimmed = input.trim();

    let inner = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| StoreError::usage("wire::parse_location", "location must be wrapped in < >"))?;

    let parts = split_top_level(inner)?;

    let mut parts = parts.into_iter();
    let entity = parts
        .next()
        .ok_or_else(|| StoreError::usage("wire::parse_location", "location has no entity name"))?
        .trim()
        .to_string();

    if entity.is_empty() {
        return Err(StoreError::usage(
            "wire::parse_location",
            "entity name must not be empty",
        ));
    }

    let mut location = Location::for_entity(entity);

    for part in parts {
        let part = part.trim();

        if let Some(rest) = part.strip_prefix('=') {
            location.push_element_ref(value_from_string(rest)?);
        } else {
            if part.is_empty() {
                return Err(StoreError::usage("wire::parse_location", "slot name must not be empty"));
            }
            location.push_slot(part.to_string());
        }
    }

    Ok(location)
}

/// `valueFromString`: parses a [`Value`] from its wire-form token (§6).
pub fn value_from_string(token: &str) -> StoreResult<Value> {
    let token = token.trim();

    if token == "none" {
        return Ok(Value::None);
    }
    if token == "true" {
        return Ok(Value::Bool(true));
    }
    if token == "false" {
        return Ok(Value::Bool(false));
    }
    if token.starts_with('<') {
        return Ok(Value::Pointer(parse_location(token)?));
    }
    if token.starts_with('"') {
        return Ok(Value::Str(parse_quoted_string(token)?));
    }
    if let Ok(i) = token.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = token.parse::<f64>() {
        return Ok(Value::Float(f));
    }

    Err(StoreError::usage(
        "wire::value_from_string",
        format!("cannot parse value literal {token:?}"),
    ))
}

fn parse_quoted_string(token: &str) -> StoreResult<String> {
    let body = token
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| StoreError::usage("wire::value_from_string", "unterminated quoted string"))?;

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {
                return Err(StoreError::usage(
                    "wire::value_from_string",
                    "truncated escape sequence in quoted string",
                ))
            }
        }
    }

    Ok(out)
}

/// Splits `input` on top-level commas, respecting nesting inside `<...>`
/// and quoting inside `"..."` so that a nested Pointer literal's own commas
/// don't get mistaken for element separators.
fn split_top_level(input: &str) -> StoreResult<Vec<String>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut current = String::new();

    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '<' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            '>' if !in_quotes => {
                depth -= 1;
                if depth < 0 {
                    return Err(StoreError::usage(
                        "wire::parse_location",
                        "unbalanced '>' in location",
                    ));
                }
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }

    if in_quotes {
        return Err(StoreError::usage(
            "wire::parse_location",
            "unterminated quoted string in location",
        ));
    }
    if depth != 0 {
        return Err(StoreError::usage(
            "wire::parse_location",
            "unbalanced '<' in location",
        ));
    }

    if !current.is_empty() || !parts.is_empty() {
        parts.push(current);
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_query_location() {
        let location = Location::for_entity("bob").with_slot("livesin");
        let wire = format_location(&location);
        assert_eq!(wire, "<bob, livesin>");
        assert_eq!(parse_location(&wire).unwrap(), location);
    }

    #[test]
    fn round_trips_belief_with_string_value() {
        let location = Location::for_entity("bob")
            .with_slot("nickname")
            .with_element_ref(Value::Str("bobby".into()));
        let wire = format_location(&location);
        assert_eq!(wire, r#"<bob, nickname, ="bobby">"#);
        assert_eq!(parse_location(&wire).unwrap(), location);
    }

    #[test]
    fn round_trips_nested_pointer_elementref() {
        let pointee = Location::for_entity("tokyo");
        let location = Location::for_entity("bob")
            .with_slot("livesin")
            .with_element_ref(Value::Pointer(pointee));
        let wire = format_location(&location);
        assert_eq!(parse_location(&wire).unwrap(), location);
    }

    #[test]
    fn value_from_string_parses_scalars() {
        assert_eq!(value_from_string("true").unwrap(), Value::Bool(true));
        assert_eq!(value_from_string("false").unwrap(), Value::Bool(false));
        assert_eq!(value_from_string("42").unwrap(), Value::Int(42));
        assert_eq!(value_from_string("-3.5").unwrap(), Value::Float(-3.5));
        assert_eq!(value_from_string("none").unwrap(), Value::None);
        assert_eq!(
            value_from_string(r#""hi there""#).unwrap(),
            Value::Str("hi there".to_string())
        );
    }

    #[test]
    fn value_from_string_rejects_garbage() {
        assert!(value_from_string("not_a_value_and_no_quotes").is_err());
    }

    #[test]
    fn malformed_locations_are_rejected() {
        assert!(parse_location("bob, livesin>").is_err());
        assert!(parse_location("<bob, livesin").is_err());
    }
}
