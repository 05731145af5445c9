//! Image I/O services used by the HTTP layer

pub mod format;

pub use format::ImageCodec;
