mod completion;
mod controller;
pub mod error;
mod queue;
mod readable;
mod reader;
mod source;
mod strategy;
mod task;

// Re-export main types
pub use completion::{Completion, Read};
pub use controller::ReadableStreamDefaultController;
pub use error::*;
pub use readable::{ReadableStream, ReadableStreamBuilder, StreamState};
pub use reader::ReadableStreamDefaultReader;
pub use source::{AsyncStreamSource, IteratorSource, ReadableSource, UnderlyingSource};
pub use strategy::{
    ByteLengthQueuingStrategy, CountQueuingStrategy, QueuingStrategy, QueuingStrategyInit,
    SizeFn, SourceType, StreamConfig,
};

pub type StreamResult<T> = Result<T, StreamError>;
