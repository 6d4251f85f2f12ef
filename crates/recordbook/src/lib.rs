//! `recordbook` - A small web application for keeping titled records
//!
//! This library provides the record store, form validation and HTTP handlers
//! behind the `recordbook` binary.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod form;
pub mod logging;
pub mod record;
pub mod storage;
pub mod web;

pub use config::Config;
pub use error::{Error, Result};
pub use form::{FieldErrors, RecordDraft, RecordForm};
pub use logging::init_logging;
pub use record::Record;
pub use storage::{RecordStore, StorageStats, StoreFactory};
