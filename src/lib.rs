//! Data transfer objects for the Azure IoT Hub and Device Provisioning
//! REST surfaces, with the validation and date handling the services
//! expect.
//!
//! Every record type parses from the wire JSON with `from_json`, validates
//! its required fields and serializes back with `to_json`. Twin documents
//! additionally carry a diff engine: applying a service patch to a
//! [`twin::TwinState`] yields the delta of what actually changed.
//!
//! # Examples
//!
//! Applying a desired property patch to a twin
//! ```
//! use azure_iot_dto::twin::TwinState;
//!
//! let mut twin = TwinState::from_twin_json(r#"{
//!     "tags": {},
//!     "properties": {
//!         "desired": {"interval": 30},
//!         "reported": {}
//!     }
//! }"#).unwrap();
//!
//! let delta = twin.apply_json(r#"{
//!     "properties": {"desired": {"interval": 60}}
//! }"#).unwrap();
//!
//! assert!(delta.desired.is_some());
//! assert_eq!(twin.desired().unwrap().get("interval").unwrap(), 60);
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// DTO package version
pub const DTO_VERSION: &str = std::env!("CARGO_PKG_VERSION");

/// Configuration records for automatic device management
pub mod configuration;
/// Date parsing and the serde adapters for service timestamp formats
pub mod dates;
/// Device registry records
pub mod device;
/// Provisioning enrollments and attestation
pub mod enrollment;
/// File upload handshake and notification messages
pub mod file_upload;
/// Registry and scheduled jobs
pub mod job;
/// Direct method messages
pub mod method;
/// Query requests and response pages
pub mod query;
/// Twin documents and the diff engine
pub mod twin;
/// Field validation shared by the record types
pub mod validation;

/// Errors
pub mod error;

pub use error::{DtoError, Result};
