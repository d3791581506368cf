//! # packsync testkit
//!
//! Test utilities for packsync.
//!
//! This crate provides:
//! - Record fixtures with deterministic timestamps
//! - Engine harnesses wired to in-memory backends, one per simulated device
//! - A remote wrapper that suspends inside every call
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use packsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn saves_offline() {
//!     let device = Device::local_only();
//!     device.engine.initialize().await.unwrap();
//!     device.engine.save(packing_list()).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::PausingRemote;
