mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{detect_filtered, DetectionBackend, DetectionCapability};
#[cfg(feature = "backend-remote")]
pub use backends::RemoteBackend;
pub use backends::SimBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{create_backend, BackendOptions, ModelSpec};
pub use result::{Detection, TargetSpec};
