//! gRPC service implementation for remote label storage.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`LabelStoreService`).

pub mod handler;
