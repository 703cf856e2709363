//! Feed definitions: per entity-version ordered field lists, built either
//! from an explicit feed file or derived from sampled data file headers.

mod reader;
mod schema;

pub use reader::{count_rows, read_header};
pub use schema::{
    FeedField, FeedTree, build_fields, columns_from_header, map_field_type, parse_feed_file,
    sanitize_field_name,
};
