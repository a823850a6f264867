pub mod console;
pub mod file;
pub mod http;

pub use console::ConsoleSink;
pub use file::FileSink;
pub use http::HttpSink;
