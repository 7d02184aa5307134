//! # Frame Append
//!
//! Lock-free hand-off storage between a parallel producer stage and a single
//! consumer stage, one frame at a time:
//! - Worker jobs push concurrently, never blocking and never locking
//! - Overflow spills into fixed-size pages instead of reallocating under load
//! - Between frames, one thread coalesces everything into a contiguous array
//!
//! ## Frame Lifecycle
//!
//! ```text
//!   produce (N threads)          consume (1 thread)           next frame
//!   ───────────────────          ──────────────────           ──────────
//!   buffer.push(item)   ──join──► buffer.as_slice()   ──────► buffer.resize(0)
//!   buffer.push_new()             (coalesce + slice)           (capacity kept)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use frame_append::AppendBuffer;
//!
//! let mut lights: AppendBuffer<LightRecord> = AppendBuffer::with_capacity(256);
//! std::thread::scope(|s| {
//!     for cell in visible_cells.chunks(64) {
//!         let lights = &lights;
//!         s.spawn(move || cell.iter().for_each(|c| { lights.push(c.light()); }));
//!     }
//! });
//! let contiguous: &[LightRecord] = lights.as_slice();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod buffer;
pub mod config;
mod container;
pub mod element;
pub mod error;
mod page;
pub mod sizer;
mod slot;
mod view;

pub use config::AppendConfig;
pub use container::AppendBuffer;
pub use element::Element;
pub use error::{ConfigError, ConfigResult};
pub use page::DEFAULT_PAGE_BYTES;
pub use sizer::{MemorySizer, UsageTracker};
pub use view::AppendView;
