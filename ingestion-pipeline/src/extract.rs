use common::error::AppError;
use tracing::{debug, warn};

/// Convert raw bytes plus a declared media type into plain text.
///
/// Deterministic and pure: the same bytes and type always yield the same
/// text. An empty result is a legitimate outcome the caller turns into a
/// parsing failure; unsupported types fall back to a lossy text decode.
pub fn extract_text(bytes: &[u8], media_type: &str) -> Result<String, AppError> {
    let normalized = normalize_media_type(media_type);
    debug!(media_type, normalized, "Extracting text");

    match normalized.as_str() {
        "pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| AppError::Extraction(format!("Failed to read PDF content: {e}"))),
        "plain" | "txt" | "markdown" | "md" | "csv" => Ok(decode_text(bytes)),
        other => {
            warn!(
                media_type = other,
                "Unsupported media type; attempting plain text decode"
            );
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Reduce a mime type like `application/pdf` to its subtype.
fn normalize_media_type(media_type: &str) -> String {
    let lowered = media_type.to_ascii_lowercase();
    match lowered.rsplit_once('/') {
        Some((_, subtype)) => subtype.to_string(),
        None => lowered,
    }
}

/// UTF-8 first, Latin-1 as the fallback for legacy exports. Latin-1 maps
/// every byte to the code point of the same value, so it cannot fail.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("UTF-8 decode failed, falling back to Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_roundtrips() {
        let content = "The agreement shall terminate on January 1, 2030.";
        let text = extract_text(content.as_bytes(), "text/plain").expect("extract");
        assert_eq!(text, content);
    }

    #[test]
    fn markdown_is_treated_as_text() {
        let content = "# Heading\n\nBody paragraph.";
        let text = extract_text(content.as_bytes(), "text/markdown").expect("extract");
        assert_eq!(text, content);
    }

    #[test]
    fn latin1_bytes_fall_back_without_error() {
        // 0xE9 is 'é' in Latin-1 but invalid standalone UTF-8.
        let bytes = b"clause r\xe9siliation";
        let text = extract_text(bytes, "text/plain").expect("extract");
        assert!(text.contains("résiliation"));
    }

    #[test]
    fn unknown_types_lossy_decode() {
        let bytes = b"some opaque but mostly text content";
        let text =
            extract_text(bytes, "application/x-unknown-thing").expect("extract");
        assert!(text.contains("mostly text"));
    }

    #[test]
    fn corrupt_pdf_is_an_extraction_error() {
        let result = extract_text(b"not a real pdf", "application/pdf");
        assert!(matches!(result, Err(AppError::Extraction(_))));
    }

    #[test]
    fn extraction_is_deterministic() {
        let bytes = b"same input, same output";
        let a = extract_text(bytes, "text/plain").expect("a");
        let b = extract_text(bytes, "text/plain").expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_yields_empty_text() {
        let text = extract_text(b"", "text/plain").expect("extract");
        assert!(text.is_empty());
    }
}
