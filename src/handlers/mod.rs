//! Handlers mounted by the binary.
//!
//! Each one is configured at construction and shared between connections
//! through the route table.

pub mod log;
pub mod proxy;
pub mod settings;
pub mod static_files;
pub mod status;

pub use log::LogEndpoint;
pub use proxy::ForwardProxy;
pub use settings::SettingsEndpoint;
pub use static_files::StaticFiles;
pub use status::StatusEndpoint;
