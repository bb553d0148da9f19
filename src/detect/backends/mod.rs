pub mod sim;

#[cfg(feature = "backend-remote")]
pub mod remote;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use sim::SimBackend;

#[cfg(feature = "backend-remote")]
pub use remote::RemoteBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
