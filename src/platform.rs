//! Platform type aliases.
//!
//! The stream engine runs on a single cooperative thread: every controller
//! callback, queue mutation and completion delivery happens on the task that
//! owns the stream. Shared state is therefore `Rc`-based and boxed futures
//! carry no `Send` bound.

pub use futures::future::LocalBoxFuture as PlatformFuture;
pub use std::rc::{Rc as SharedPtr, Weak as WeakPtr};

/// Shared queuing strategy. Shared rather than boxed so the controller can hand
/// a handle to the size algorithm out of its borrowed state before calling it.
pub type BoxedStrategy<T> = SharedPtr<dyn crate::streams::QueuingStrategy<T>>;
