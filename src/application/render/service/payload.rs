//! Base64 payload codec for data carried in custom-element attributes.
//!
//! Snippet sources, highlighted markup and evaluation results travel to the
//! client inside HTML attributes, so they are base64-encoded (URL-safe
//! alphabet, no padding) to survive the markdown pass and attribute quoting
//! untouched. Decoding accepts padded input as well, since other producers of
//! these payloads pad.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use thiserror::Error;

const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encodes UTF-8 text as unpadded URL-safe base64.
pub fn encode(text: &str) -> String {
    PAYLOAD_ENGINE.encode(text.as_bytes())
}

/// Decodes a payload produced by [`encode`], tolerating trailing padding.
pub fn decode(payload: &str) -> Result<String, PayloadError> {
    let bytes = PAYLOAD_ENGINE.decode(payload)?;
    Ok(String::from_utf8(bytes)?)
}

/// Escapes text for safe interpolation into HTML, including double-quoted
/// attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
