//! Share-link parsing and normalization.
//!
//! This module turns raw TeraBox share URLs (any of the mirror-domain
//! variants, path-segment or query-parameter form) into a canonical
//! [`ShareLink`] carrying the short code that identifies the share everywhere
//! else in the crate: as the cache key, as the metadata-endpoint parameter,
//! and as the strategy input.
//!
//! # Example
//!
//! ```
//! use teradl_core::parser::normalize;
//!
//! let link = normalize("https://terasharelink.com/s/1abcDEF").unwrap();
//! assert_eq!(link.short_code, "1abcDEF");
//! assert_eq!(link.canonical, "https://terasharelink.com/s/1abcDEF");
//! ```

mod error;
mod url;

pub use error::ParseError;
pub use url::{ShareLink, extract_share_links, normalize, short_code};
