//! Utility functions shared by the library and the command-line driver.
//!
//! - **URL validation**: backend base URLs (HTTPS except localhost) and media URLs
//! - **Text processing**: terminal-safe, width-aware rendering of remote text

mod text;
mod url_validator;

pub use text::{single_line, truncate_to_width};
pub use url_validator::{validate_base_url, validate_media_url, UrlValidationError};

/// Maximum accepted search query length; longer queries match nothing.
pub const MAX_SEARCH_QUERY_LENGTH: usize = 256;
