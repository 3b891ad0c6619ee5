//! `stringx` library
//!
//! Byte-oriented string helpers, usable from Rust directly and published to
//! scripts as the global `stringx` table.

use std::ffi::c_int;

use lunabind::{BridgeError, BridgeResult, LuaTable, LuaType, NativeFunction, Stack, State};

// ============================================================================
// Helpers
// ============================================================================

/// Split `s` on every occurrence of `delim`.
///
/// Empty pieces are kept except a trailing one. An empty delimiter yields
/// no pieces.
pub fn split<'a>(s: &'a [u8], delim: &[u8]) -> Vec<&'a [u8]> {
    let mut pieces = Vec::new();
    if delim.is_empty() {
        return pieces;
    }
    let mut start = 0;
    let mut i = 0;
    while i + delim.len() <= s.len() {
        if &s[i..i + delim.len()] == delim {
            pieces.push(&s[start..i]);
            i += delim.len();
            start = i;
        } else {
            i += 1;
        }
    }
    if start < s.len() {
        pieces.push(&s[start..]);
    }
    pieces
}

/// Whether `s` begins with `prefix`
pub fn starts_with(s: &[u8], prefix: &[u8]) -> bool {
    s.starts_with(prefix)
}

/// Whether `s` ends with `suffix`
pub fn ends_with(s: &[u8], suffix: &[u8]) -> bool {
    s.ends_with(suffix)
}

/// Copy of `s` with the first byte upper-cased
pub fn title(s: &[u8]) -> Vec<u8> {
    let mut out = s.to_vec();
    if let Some(first) = out.first_mut() {
        first.make_ascii_uppercase();
    }
    out
}

/// Copy of `s` with the first byte lower-cased
pub fn untitle(s: &[u8]) -> Vec<u8> {
    let mut out = s.to_vec();
    if let Some(first) = out.first_mut() {
        first.make_ascii_lowercase();
    }
    out
}

// ============================================================================
// Script bindings
// ============================================================================

/// Publish `stringx` as a global table
pub fn open_stringx(state: &State) -> BridgeResult<LuaTable> {
    let stringx = state.new_table(Some("stringx"))?;
    stringx.set("split", NativeFunction::raw(lua_split))?;
    stringx.set(
        "starts_with",
        NativeFunction::raw(|stack| affix(stack, starts_with)),
    )?;
    stringx.set(
        "ends_with",
        NativeFunction::raw(|stack| affix(stack, ends_with)),
    )?;
    stringx.set("title", NativeFunction::raw(|stack| recase(stack, title)))?;
    stringx.set("untitle", NativeFunction::raw(|stack| recase(stack, untitle)))?;

    let functions = stringx.size()?;
    tracing::debug!(functions, "stringx opened");
    Ok(stringx)
}

/// Bytes of a string argument; numbers are coerced, anything else is absent
fn string_arg(stack: &Stack, index: c_int) -> Option<Vec<u8>> {
    match stack.type_of(index) {
        LuaType::String | LuaType::Number => stack.to_bytes(index),
        _ => None,
    }
}

/// `split(s, delim [, pack]) -> {pieces} | pieces...`
fn lua_split(stack: &Stack) -> BridgeResult<c_int> {
    let pack = match stack.type_of(3) {
        LuaType::None | LuaType::Nil => true,
        _ => stack.to_bool(3),
    };
    let source = string_arg(stack, 1).unwrap_or_default();
    let delim = string_arg(stack, 2).unwrap_or_default();
    let pieces = split(&source, &delim);

    if pack {
        stack.check_space(2)?;
        stack.new_table(c_int::try_from(pieces.len()).unwrap_or(0), 0);
        for (n, piece) in pieces.iter().enumerate() {
            stack.push_bytes(piece);
            stack.raw_set_index(-2, n as i64 + 1);
        }
        return Ok(1);
    }

    let count = c_int::try_from(pieces.len()).map_err(|_| BridgeError::StackOverflow)?;
    stack.check_space(count)?;
    for piece in &pieces {
        stack.push_bytes(piece);
    }
    Ok(count)
}

fn affix(stack: &Stack, test: fn(&[u8], &[u8]) -> bool) -> BridgeResult<c_int> {
    let result = match (string_arg(stack, 1), string_arg(stack, 2)) {
        (Some(s), Some(affix)) => test(&s, &affix),
        _ => false,
    };
    stack.check_space(1)?;
    stack.push_bool(result);
    Ok(1)
}

fn recase(stack: &Stack, change: fn(&[u8]) -> Vec<u8>) -> BridgeResult<c_int> {
    let out = string_arg(stack, 1).map(|s| change(&s)).unwrap_or_default();
    stack.check_space(1)?;
    stack.push_bytes(&out);
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_inner_empty_pieces() {
        let pieces = split(b"a,,b,", b",");
        assert_eq!(pieces, vec![&b"a"[..], &b""[..], &b"b"[..]]);
    }

    #[test]
    fn test_split_leading_delimiter() {
        assert_eq!(split(b",a", b","), vec![&b""[..], &b"a"[..]]);
    }

    #[test]
    fn test_split_multibyte_delimiter() {
        let pieces = split(b"one::two::three", b"::");
        assert_eq!(pieces, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
        assert_eq!(split(b"a:::b", b"::"), vec![&b"a"[..], &b":b"[..]]);
    }

    #[test]
    fn test_split_empty_inputs() {
        assert!(split(b"abc", b"").is_empty());
        assert!(split(b"", b",").is_empty());
        assert_eq!(split(b"abc", b","), vec![&b"abc"[..]]);
    }

    #[test]
    fn test_affixes() {
        assert!(starts_with(b"lunabind", b"luna"));
        assert!(!starts_with(b"luna", b"lunabind"));
        assert!(ends_with(b"lunabind", b"bind"));
        assert!(ends_with(b"x", b""));
    }

    #[test]
    fn test_title_first_byte_only() {
        assert_eq!(title(b"hello world"), b"Hello world");
        assert_eq!(untitle(b"HELLO"), b"hELLO");
        assert_eq!(title(b""), b"");
        assert_eq!(title(b"1abc"), b"1abc");
    }
}
