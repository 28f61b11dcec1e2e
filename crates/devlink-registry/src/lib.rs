pub mod client;
pub mod features;
pub mod server;
pub mod shared;

pub use client::RegistryClient;
pub use server::{start, RegistryRole, RegistryServer};
pub use shared::config::RegistryConfig;
pub use shared::error::{RegistryError, RegistryResult};
