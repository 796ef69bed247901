//! Native implementations of the worker's collaborators.

pub mod esbuild;
pub mod fs;
pub mod net;

pub use esbuild::EsbuildBundler;
pub use fs::NativeFs;
pub use net::{HostNetwork, ToolingAssets};
