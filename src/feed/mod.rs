// ABOUTME: Feed handling for MarketSharp OData responses
// ABOUTME: Sanitizes raw payloads and parses Atom entries into property maps

pub mod parser;
pub mod sanitize;

pub use parser::{bool_value, float, parse, text, RawEntry};
pub use sanitize::{sanitize, sanitize_bytes};

/// Failures while turning a response body into entries.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The payload was not decodable text.
    #[error("feed payload is not valid UTF-8: {0}")]
    InvalidInput(#[source] std::str::Utf8Error),
    /// The sanitized document is still not well-formed XML.
    #[error("malformed feed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },
}

