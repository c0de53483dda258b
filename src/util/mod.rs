//! Utility functions shared by the storage and feed layers.
//!
//! - **URL validation**: feed URLs must be http(s) with a host
//! - **Text sanitizing**: remote text is stripped of terminal control sequences

mod text;
mod url_validator;

pub use text::strip_control_chars;
pub use url_validator::{validate_feed_url, UrlValidationError};
