//! # idbkit core
//!
//! An embeddable IndexedDB engine.
//!
//! This crate provides:
//! - Databases with versioned schemas and upgrade transactions
//! - Object stores with in-line or out-of-line keys and key generators
//! - Unique and multi-entry indexes, kept in step with their records
//! - Cursors over stores and indexes in all four directions
//! - Transactions with FIFO request order, scoped isolation and
//!   auto-commit
//!
//! All work is driven by [`Factory::run_until_idle`]; results are delivered
//! through callbacks registered on requests, transactions and connections.
//!
//! ## Example
//!
//! ```rust
//! use idbkit_core::{
//!     Factory, Key, KeyPath, ObjectStoreParameters, TransactionMode, Value,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! let factory = Factory::in_memory();
//! let open = factory.open("shop", Some(1)).unwrap();
//! open.on_upgrade_needed(|event| {
//!     let db = event.database().unwrap();
//!     let params = ObjectStoreParameters::new().key_path(KeyPath::parse("id").unwrap());
//!     db.create_object_store("items", params).unwrap();
//! });
//! factory.run_until_idle();
//! let db = open.result().unwrap().into_database().unwrap();
//!
//! let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
//! let items = txn.object_store("items").unwrap();
//! let item = Value::object([("id", Value::from(1)), ("name", Value::from("apple"))]);
//! items.put(&item).unwrap();
//!
//! let found = Arc::new(Mutex::new(None));
//! let sink = found.clone();
//! items.get(Key::from(1)).unwrap().on_success(move |event| {
//!     *sink.lock().unwrap() = event.result().and_then(|r| r.into_value());
//! });
//! factory.run_until_idle();
//!
//! let found = found.lock().unwrap().clone().unwrap();
//! assert_eq!(found.get("name").and_then(Value::as_str), Some("apple"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod database;
mod engine;
mod error;
mod event;
mod factory;
mod index;
mod object_store;
mod ops;
mod request;
mod schema;
mod transaction;
mod types;

pub use config::Config;
pub use cursor::Cursor;
pub use database::{Database, ObjectStoreParameters};
pub use error::{IdbError, IdbResult};
pub use event::{RequestEvent, TransactionEvent, VersionChangeEvent};
pub use factory::Factory;
pub use index::{Index, IndexParameters};
pub use object_store::ObjectStore;
pub use request::{OpenRequest, Request, RequestResult};
pub use schema::{read_schemas, DatabaseSchema, IndexSchema, StoreSchema, META_PARTITION};
pub use transaction::Transaction;
pub use types::{
    ConnectionId, CursorDirection, CursorId, DatabaseInfo, Durability, IndexId, ReadyState,
    RequestId, StoreId, TransactionId, TransactionMode, TransactionState, MAX_VERSION,
};

pub use idbkit_codec::{Key, KeyPath, KeyRange, Value};
