mod path;


pub use path::{PathResolver, TagName};
