//! Context-store client for Orchestra
//!
//! The store (CXDB) is an external append-only turn database: reads go
//! over HTTP, writes over a 16-byte-framed binary protocol on a separate
//! TCP port. This crate implements the client half of both, the type
//! bundle that maps event payload fields to numeric tags, and the
//! observer that mirrors engine events into typed turns.

pub mod binary;
pub mod client;
pub mod observer;
pub mod type_bundle;

mod error;

pub use client::{CreateContextResult, CxdbClient};
pub use error::{Result, StoreError};
pub use observer::CxdbObserver;
