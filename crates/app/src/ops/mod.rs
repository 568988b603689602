pub mod copy;
pub mod resolve;
pub mod version;

pub use copy::Copy;
pub use resolve::Resolve;
pub use version::Version;
