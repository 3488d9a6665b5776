use std::path::Path;

use chardetng::EncodingDetector;
use tracing::{debug, warn};

/// Decode raw bytes to a String, detecting the encoding.
///
/// A byte order mark wins; otherwise UTF-8 is tried first and legacy code pages
/// (Windows-1252, Shift-JIS, ...) are guessed with chardetng. CUE sheets written by
/// older rippers are rarely UTF-8.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (decoded, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return decoded.into_owned();
    }

    // Fast path
    if let Ok(content) = std::str::from_utf8(bytes) {
        return content.to_owned();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    debug!("Guessed text encoding {}", encoding.name());

    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(
            "Decoding errors occurred while decoding text as {}",
            encoding.name()
        );
    }
    decoded.into_owned()
}

/// Read a text file with automatic encoding detection
pub fn read_text_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(decode_text(&bytes))
}
