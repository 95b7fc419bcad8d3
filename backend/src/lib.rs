pub mod config;
pub mod device;
pub mod model;
pub mod sbi;
pub mod store;
pub mod topology;
pub mod worker;

use thiserror::Error;

/// Top-level error composing every component boundary via `#[from]` (§7).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] device::DeviceError),
    #[error(transparent)]
    Registry(#[from] device::registry::RegistryError),
    #[error(transparent)]
    Sbi(#[from] sbi::SbiError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Intent(#[from] worker::IntentError),
}
