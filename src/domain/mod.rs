//! Domain layer: value objects, external-collaborator ports, and events.
//!
//! The renter core owns piece placement and repair policy; everything it
//! cannot control — host membership, the wire transport, local disk — sits
//! behind the ports defined here so adapters can be swapped (real network,
//! in-memory simulation, mocks).

pub mod events;
pub mod ports;

pub use events::{HostEvent, RepairEvent, RepairSource};
pub use ports::{FileId, FileMeta, HostId, HostRegistry, LocalStore, PieceTransport};
