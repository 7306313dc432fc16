//! Indirection over the synchronization primitives the Node-Queue and backprop
//! engine use, so that the exact same code can be driven by `loom` under
//! `cargo test --features loom` for exhaustive interleaving checks, and by
//! `std::sync` otherwise.

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicUsize, Ordering};
#[cfg(feature = "loom")]
pub use loom::sync::{Arc, Mutex};
#[cfg(feature = "loom")]
pub use loom::thread;

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicUsize, Ordering};
#[cfg(not(feature = "loom"))]
pub use std::sync::{Arc, Mutex};
#[cfg(not(feature = "loom"))]
pub use std::thread;
