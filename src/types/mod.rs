//! Core type definitions using newtype patterns for type safety.

mod cancel;
mod port;
mod scan_id;
mod target;

pub use cancel::CancelFlag;
pub use port::{Port, PortError, PortRange, PortSet};
pub use scan_id::ScanId;
pub use target::{ScanTarget, TargetError};
