use super::{StreamResult, error::StreamError};
use crate::platform::{BoxedStrategy, SharedPtr};
use serde::Deserialize;

/// Generic queuing strategy trait
pub trait QueuingStrategy<T> {
    /// Return the size of the chunk. Errors from here error the stream.
    fn size(&self, chunk: &T) -> StreamResult<f64>;
    /// Return high water mark (desired max queue size)
    fn high_water_mark(&self) -> f64;
}

/// Count-based strategy
#[derive(Debug, Clone)]
pub struct CountQueuingStrategy {
    high_water_mark: f64,
}

impl CountQueuingStrategy {
    pub const fn new(high_water_mark: f64) -> Self {
        Self { high_water_mark }
    }
}

impl<T> QueuingStrategy<T> for CountQueuingStrategy {
    fn size(&self, _chunk: &T) -> StreamResult<f64> {
        Ok(1.0)
    }

    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

/// Byte length strategy for chunks that are byte buffers
#[derive(Debug, Clone)]
pub struct ByteLengthQueuingStrategy {
    high_water_mark: f64,
}

impl ByteLengthQueuingStrategy {
    pub const fn new(high_water_mark: f64) -> Self {
        Self { high_water_mark }
    }
}

impl<T: AsRef<[u8]>> QueuingStrategy<T> for ByteLengthQueuingStrategy {
    fn size(&self, chunk: &T) -> StreamResult<f64> {
        Ok(byte_length(chunk))
    }

    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

pub(crate) fn byte_length<T: AsRef<[u8]>>(chunk: &T) -> f64 {
    chunk.as_ref().len() as f64
}

/// A user supplied chunk size function.
pub type SizeFn<T> = Box<dyn Fn(&T) -> StreamResult<f64>>;

/// Discriminates value streams from byte-oriented streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Default,
    Bytes,
}

impl SourceType {
    fn default_high_water_mark(self) -> f64 {
        match self {
            SourceType::Default => 1.0,
            SourceType::Bytes => 0.0,
        }
    }
}

/// Host-facing queuing strategy dictionary. Absent members take the defaults
/// of the stream type being constructed.
pub struct QueuingStrategyInit<T> {
    pub high_water_mark: Option<f64>,
    pub size: Option<SizeFn<T>>,
}

impl<T> Default for QueuingStrategyInit<T> {
    fn default() -> Self {
        Self {
            high_water_mark: None,
            size: None,
        }
    }
}

impl<T: 'static> QueuingStrategyInit<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn high_water_mark(mut self, high_water_mark: f64) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }

    pub fn size<F>(mut self, size: F) -> Self
    where
        F: Fn(&T) -> StreamResult<f64> + 'static,
    {
        self.size = Some(Box::new(size));
        self
    }

    /// Validates the dictionary for a stream of `source_type`.
    ///
    /// The strategy is checked before the source: an invalid high water mark
    /// is reported even when the source type would also be rejected.
    pub(crate) fn resolve(
        self,
        source_type: SourceType,
        chunk_byte_length: Option<fn(&T) -> f64>,
    ) -> StreamResult<BoxedStrategy<T>> {
        let high_water_mark =
            extract_high_water_mark(self.high_water_mark, source_type.default_high_water_mark())?;

        match source_type {
            SourceType::Bytes => {
                if self.size.is_some() {
                    return Err(StreamError::range_error(
                        "size function must not be set for byte streams",
                    ));
                }
                let chunk_byte_length = chunk_byte_length.ok_or_else(|| {
                    StreamError::type_error("byte streams require byte buffer chunks")
                })?;
                Ok(SharedPtr::new(ResolvedStrategy {
                    size: Some(Box::new(move |chunk: &T| Ok(chunk_byte_length(chunk)))),
                    high_water_mark,
                }))
            }
            SourceType::Default => Ok(SharedPtr::new(ResolvedStrategy {
                size: self.size,
                high_water_mark,
            })),
        }
    }
}

/// Host configuration for a stream, as it arrives from a script or a config
/// file: `{"type": "bytes", "highWaterMark": 1024}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(rename = "type", default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub high_water_mark: Option<f64>,
}

impl StreamConfig {
    pub(crate) fn into_parts<T>(self) -> (SourceType, QueuingStrategyInit<T>) {
        (
            self.source_type,
            QueuingStrategyInit {
                high_water_mark: self.high_water_mark,
                size: None,
            },
        )
    }
}

struct ResolvedStrategy<T> {
    size: Option<SizeFn<T>>,
    high_water_mark: f64,
}

impl<T> QueuingStrategy<T> for ResolvedStrategy<T> {
    fn size(&self, chunk: &T) -> StreamResult<f64> {
        match &self.size {
            Some(size) => size(chunk),
            None => Ok(1.0),
        }
    }

    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
}

pub(crate) fn extract_high_water_mark(
    high_water_mark: Option<f64>,
    default: f64,
) -> StreamResult<f64> {
    match high_water_mark {
        None => Ok(default),
        Some(hwm) if hwm.is_nan() || hwm < 0.0 => Err(StreamError::range_error(
            "highWaterMark must be a non-negative number",
        )),
        Some(hwm) => Ok(hwm),
    }
}
