//! # idbkit testkit
//!
//! Test utilities for idbkit.
//!
//! This crate provides:
//! - Factories over memory or a temporary log file
//! - Helpers that open databases and drain requests to completion
//! - Property-based generators for keys, values and key paths
//! - A model harness that checks a store against an in-memory map
//!
//! ## Usage
//!
//! ```rust
//! use idbkit_testkit::prelude::*;
//! use idbkit_core::{ObjectStoreParameters, TransactionMode, Value};
//!
//! let test = TestFactory::memory();
//! let db = test.open_with("shop", 1, |db, _| {
//!     db.create_object_store("items", ObjectStoreParameters::new()).unwrap();
//! });
//! let store = db
//!     .transaction(&["items"], TransactionMode::ReadWrite)
//!     .unwrap()
//!     .object_store("items")
//!     .unwrap();
//! let put = store.put_with_key(&Value::from("apple"), 1).unwrap();
//! assert!(test.settle(&put).is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
