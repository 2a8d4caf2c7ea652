pub mod broadcast;
pub mod cli;
pub mod config;
pub mod container;
pub mod derive;
pub mod error;
pub mod events;
pub mod mpc;
pub mod presign;
pub mod registry;
pub mod rpc;
pub mod secret_cache;
pub mod signing;
pub mod store;
pub mod txbuild;
pub mod vault;

pub use config::VaultCoreConfig;
pub use error::Error;
pub use events::{Event, EventBus};
pub use secret_cache::{Handle, SecretCache};
pub use store::VaultStore;
pub use vault::{KeyShares, KeysignPayload, LibType, PublicKeys, Vault, VaultSummary};
