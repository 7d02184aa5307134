//! # Element Types
//!
//! Elements are pure data with no behavior. They are moved around with bulk
//! byte copies during coalesce and resize, so they must be plain old data.

use bytemuck::{Pod, Zeroable};

/// Marker trait for types that can live in an [`AppendBuffer`](crate::AppendBuffer).
///
/// Elements must be:
/// - `Copy`: bitwise copyable, no destructor to run
/// - `Pod`: every bit pattern is a valid value
/// - `Zeroable`: all-zero storage is a valid value
/// - `Send + Sync`: written by worker threads, read by the consumer thread
///
/// Every type that satisfies these bounds implements `Element` automatically.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// #[repr(C)]
/// struct DrawItem {
///     mesh: u32,
///     material: u32,
///     depth: f32,
/// }
///
/// let items: AppendBuffer<DrawItem> = AppendBuffer::with_capacity(4096);
/// ```
pub trait Element: Copy + Pod + Zeroable + Send + Sync + 'static {}

impl<T> Element for T where T: Copy + Pod + Zeroable + Send + Sync + 'static {}
