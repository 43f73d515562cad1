//! The UDP endpoint and the supervisor that builds and owns everything
//! around it (`spec.md` §4.5, §4.6).

pub mod endpoint;
pub mod supervisor;

pub use endpoint::Endpoint;
pub use supervisor::Supervisor;
