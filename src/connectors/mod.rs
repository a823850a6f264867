pub mod file;
pub mod http;
pub mod inline;

pub use file::FileConnector;
pub use http::HttpConnector;
pub use inline::InlineConnector;
