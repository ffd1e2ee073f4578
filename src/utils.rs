//! Small helpers shared by the library and the binaries.

use bytes::Bytes;
use encoding_rs::UTF_8;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

/// Decodes a raw blob as UTF-8 text.
///
/// A leading byte-order mark is stripped. Returns [`None`] if the blob
/// contains malformed UTF-8; nothing is replaced silently.
pub fn string_from_bytes(buf: &Bytes) -> Option<String> {
    let (text, malformed) = UTF_8.decode_with_bom_removal(buf.as_ref());
    if malformed {
        return None;
    }
    Some(text.into_owned())
}

/// Installs the fmt subscriber used by every binary.
pub fn init_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .init();
}
