//! Reclaim Runtime Library
//!
//! C ABI over the reclaim crate for native and compiled code:
//! - Runtime initialization and shutdown
//! - Global and weak-global references (pinning their objects)
//! - Entry lock/unlock for compiled stub accessors and the kernel role

mod swap;

pub use swap::*;
