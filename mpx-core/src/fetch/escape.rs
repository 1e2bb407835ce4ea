//! Case-escape codec for module paths and versions. Uppercase ASCII letters
//! travel as `!` followed by the lowercase letter so that case-insensitive
//! filesystems and URL components round-trip mixed-case identifiers.

use mpx_common::error::{MpxError, Result};

pub fn unescape_path(escaped: &str) -> Result<String> {
    unescape(escaped).ok_or_else(|| MpxError::invalid_request("invalid escaped module path"))
}

pub fn unescape_version(escaped: &str) -> Result<String> {
    unescape(escaped).ok_or_else(|| MpxError::invalid_request("invalid escaped version"))
}

pub fn escape_path(path: &str) -> String {
    escape(path)
}

pub fn escape_version(version: &str) -> String {
    escape(version)
}

fn unescape(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut bang = false;
    for ch in escaped.chars() {
        if !ch.is_ascii() {
            return None;
        }
        if bang {
            bang = false;
            if !ch.is_ascii_lowercase() {
                return None;
            }
            out.push(ch.to_ascii_uppercase());
            continue;
        }
        match ch {
            '!' => bang = true,
            // Uppercase letters must have been escaped on the wire.
            'A'..='Z' => return None,
            _ => out.push(ch),
        }
    }
    if bang {
        return None;
    }
    Some(out)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_uppercase() {
            out.push('!');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
