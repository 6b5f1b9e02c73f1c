pub mod cache;
pub mod source;
pub mod sync;
pub mod template;

pub use cache::{CatalogCache, TtlCache};
pub use source::{BucketDetails, S3TemplateSource, TemplateSource};
pub use sync::{PassReport, Synchronizer};
pub use template::parse_template;
