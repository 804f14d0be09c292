//! Twin document types: the nested key-value collections stored for a
//! device, their metadata, and the diff engine that computes incremental
//! patches over them.

mod collection;
mod metadata;
mod state;

pub use collection::TwinCollection;
pub use metadata::TwinMetadata;
pub use state::{
    DeviceCapabilities, TwinConnectionState, TwinDelta, TwinProperties, TwinState, TwinStatus,
};
