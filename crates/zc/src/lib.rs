#![forbid(unsafe_code)]
//! zodcache public API facade.
//!
//! Re-exports `zc-core`. The CLI and any other consumer depend on this
//! crate rather than on the component crates directly.

pub use zc_core::*;
