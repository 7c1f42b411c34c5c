//! Configuration management for egressor.
//!
//! XDG-compliant settings storage; flags on the command line override
//! whatever is loaded here.

mod settings;

pub use settings::{Paths, Settings};
