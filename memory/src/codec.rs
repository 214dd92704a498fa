//! Chunk file codec.
//!
//! A chunk file is a `---`-delimited YAML header followed by a blank line and
//! the free-form body:
//!
//! ```text
//! ---
//! id: 3f9a2c
//! summary: Framework for evaluating startup equity offers
//! type: framework
//! ...
//! ---
//!
//! <body>
//! ```
//!
//! The header carries every field of [`Chunk`] except `content`. Parsing is
//! lenient where the data allows it (unknown fields ignored, counters default
//! to zero) and strict where the frame requires it (`InvalidFormat` when the
//! opening delimiter is missing or the header is never terminated).

use crate::error::MemoryErr;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::ChunkMeta;

const DELIMITER: &str = "---\n";

/// Serialize a chunk to its on-disk form.
///
/// The body is emitted verbatim, so `parse(serialize(c)) == c` holds for any
/// well-formed chunk, modulo header field ordering.
pub fn serialize(chunk: &Chunk) -> Result<String> {
    let header = serde_yaml::to_string(&chunk.to_meta()).map_err(|e| MemoryErr::InvalidFormat {
        filename: format!("{}.md", chunk.id),
        cause: format!("header serialization failed: {e}"),
    })?;
    Ok(format!("{DELIMITER}{header}{DELIMITER}\n{}", chunk.content))
}

/// Parse a chunk file. `filename` is used for error context only.
pub fn parse(text: &str, filename: &str) -> Result<Chunk> {
    let rest = text
        .strip_prefix(DELIMITER)
        .ok_or_else(|| MemoryErr::InvalidFormat {
            filename: filename.to_string(),
            cause: "missing opening --- delimiter".to_string(),
        })?;

    // The closing delimiter is a `---` on its own line. Header lines are
    // either `key: ...` or indented continuations, so a bare line match is
    // unambiguous.
    let end = find_terminator(rest).ok_or_else(|| MemoryErr::InvalidFormat {
        filename: filename.to_string(),
        cause: "unterminated header".to_string(),
    })?;

    let header = &rest[..end];
    let meta: ChunkMeta =
        serde_yaml::from_str(header).map_err(|e| MemoryErr::InvalidFormat {
            filename: filename.to_string(),
            cause: format!("header parse failed: {e}"),
        })?;

    // Skip past "---\n" (or a trailing "---" at EOF), then the one blank
    // separator line if present.
    let mut body = &rest[end + 3..];
    body = body.strip_prefix('\n').unwrap_or(body);
    body = body.strip_prefix('\n').unwrap_or(body);
    Ok(meta.into_chunk(body.to_string()))
}

/// Byte offset of the closing `---` line within the header region, i.e. a
/// `---` preceded by a newline (or at the very start) and followed by a
/// newline or end of input.
fn find_terminator(rest: &str) -> Option<usize> {
    if rest.starts_with("---") && matches!(rest.as_bytes().get(3), None | Some(b'\n')) {
        return Some(0);
    }
    let mut from = 0;
    while let Some(pos) = rest[from..].find("\n---") {
        let at = from + pos + 1;
        match rest.as_bytes().get(at + 3) {
            None | Some(b'\n') => return Some(at),
            _ => from = at + 3,
        }
    }
    None
}
