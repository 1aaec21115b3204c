use std::{borrow::Cow, error::Error, fmt, sync::Arc};
use thiserror::Error;

/// Error classes reported by the stream engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse: operating a released reader, double locking, enqueueing into a
    /// closing stream.
    Type,
    /// Invalid high water mark, chunk size, or a byte stream given a size function.
    Range,
    /// An internal invariant did not hold.
    Assertion,
    /// An error supplied by a producer, propagated verbatim.
    Source,
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("TypeError: {0}")]
    Type(Cow<'static, str>),
    #[error("RangeError: {0}")]
    Range(Cow<'static, str>),
    #[error("AssertionError: {0}")]
    Assertion(Cow<'static, str>),
    #[error("TypeError: reader released its lock")]
    Released,
    #[error("stream task was dropped")]
    TaskDropped,
    #[error("{0}")]
    Other(#[source] Arc<dyn Error + Send + Sync>),
}

impl StreamError {
    pub fn type_error(message: impl Into<Cow<'static, str>>) -> Self {
        StreamError::Type(message.into())
    }

    pub fn range_error(message: impl Into<Cow<'static, str>>) -> Self {
        StreamError::Range(message.into())
    }

    pub fn assertion(message: impl Into<Cow<'static, str>>) -> Self {
        StreamError::Assertion(message.into())
    }

    /// Wrap any error type into `StreamError`
    pub fn other<E>(e: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        StreamError::Other(Arc::new(e))
    }

    /// Wrap a boxed error
    pub fn other_boxed(e: Box<dyn Error + Send + Sync>) -> Self {
        StreamError::Other(e.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Type(_) | StreamError::Released => ErrorKind::Type,
            StreamError::Range(_) => ErrorKind::Range,
            // A dropped task means the stream state vanished under a pending
            // operation, which the ownership model rules out.
            StreamError::Assertion(_) | StreamError::TaskDropped => ErrorKind::Assertion,
            StreamError::Other(_) => ErrorKind::Source,
        }
    }
}

/// Producer errors compare by identity, so a stored error can be recognised
/// after it has been cloned out to every waiter.
impl PartialEq for StreamError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StreamError::Type(a), StreamError::Type(b))
            | (StreamError::Range(a), StreamError::Range(b))
            | (StreamError::Assertion(a), StreamError::Assertion(b)) => a == b,
            (StreamError::Released, StreamError::Released)
            | (StreamError::TaskDropped, StreamError::TaskDropped) => true,
            (StreamError::Other(a), StreamError::Other(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        #[derive(Debug)]
        struct SimpleError(String);
        impl fmt::Display for SimpleError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl Error for SimpleError {}
        StreamError::Other(Arc::new(SimpleError(s.to_string())))
    }
}

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::from(s.as_str())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Other(Arc::new(e))
    }
}

impl From<Box<dyn Error + Send + Sync>> for StreamError {
    fn from(e: Box<dyn Error + Send + Sync>) -> Self {
        StreamError::Other(e.into())
    }
}

/// Macro for producers to add direct `From` implementations for their error types.
/// This allows using `?` inside `start`, `pull` and `cancel` without
/// `.map_err(StreamError::other)`.
///
/// # Example
/// ```rust
/// use readable_streams::{StreamError, impl_stream_error_from};
///
/// #[derive(Debug)]
/// struct SensorFault;
/// impl std::fmt::Display for SensorFault {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "sensor fault")
///     }
/// }
/// impl std::error::Error for SensorFault {}
///
/// impl_stream_error_from!(SensorFault);
///
/// fn sample() -> Result<(), StreamError> {
///     Err::<(), _>(SensorFault)?;
///     Ok(())
/// }
/// assert!(sample().is_err());
/// ```
#[macro_export]
macro_rules! impl_stream_error_from {
    ($($error_type:ty),* $(,)?) => {
        $(
            impl From<$error_type> for $crate::StreamError {
                fn from(e: $error_type) -> Self {
                    $crate::StreamError::Other(std::sync::Arc::new(e))
                }
            }
        )*
    };
}
