//! Backend implementations

pub mod host;
pub mod metal;

pub use host::HostBackend;
pub use metal::MetalBackend;
