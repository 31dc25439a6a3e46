//! Core data types.

pub mod agent;
pub mod generation;
pub mod message;
pub mod profile;
pub mod stream;
pub mod usage;

pub use agent::*;
pub use generation::*;
pub use message::*;
pub use profile::*;
pub use stream::*;
pub use usage::*;
