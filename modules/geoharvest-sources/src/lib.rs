pub mod error;
pub mod services;
pub mod source;
pub mod text;

pub use error::{Result, SourceError};
pub use services::feed::{parse_feed, unwrap_redirect};
pub use services::wikipedia::hits_to_items;
pub use source::{MalformedItem, SourceAdapter, SourceItems, SourceSettings, Sources};
pub use text::strip_html;
