//! Built-in processors

mod add_tags;
mod filter;

pub use add_tags::{AddTags, AddTagsConfig};
pub use filter::{FilterConfig, NameFilter};
