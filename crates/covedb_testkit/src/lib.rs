//! # CoveDB Testkit
//!
//! Test utilities for CoveDB.
//!
//! This crate provides:
//! - Configuration factories rooted in temporary directories
//! - Pre-seeded store fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use covedb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_registry() {
//!     with_registry(|registry, factory| {
//!         let db = registry.acquire(&factory.default_config()).unwrap();
//!         // ... test operations
//!         db.close().unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
