mod eject;
mod version;

pub use eject::*;
pub use version::*;
