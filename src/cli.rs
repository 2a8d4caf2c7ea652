//! Non-interactive CLI surface (§6): these operations run headless, so
//! they are exposed here as `clap`-derived subcommands, thin binaries that
//! delegate straight into library code.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::VaultCoreConfig;
use crate::container;
use crate::error::{Error, ErrorContext, StorageErrorKind};
use crate::events::EventBus;
use crate::rpc::{ChainRpc, ChainSpecificData};
use crate::store::{FsStorage, VaultStore};

#[derive(Parser)]
#[command(name = "vaultcore", about = "Threshold-signature vault core")]
pub struct Cli {
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,
    #[arg(long)]
    pub relay_url: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new vault from raw keyshare material.
    Create {
        name: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Import a `.vult` container from disk.
    Import {
        path: PathBuf,
        #[arg(long)]
        password: Option<String>,
    },
    /// Re-decode a vault's container and confirm its integrity.
    Verify { vault_id: String },
    /// List derived addresses for a vault's enabled chains.
    Addresses { vault_id: String },
    /// Manage which chains a vault derives addresses for.
    Chains {
        vault_id: String,
        #[arg(long)]
        add: Option<String>,
        #[arg(long)]
        remove: Option<String>,
        #[arg(long)]
        add_all: bool,
        /// Required to re-encrypt the persisted record if the vault is encrypted.
        #[arg(long)]
        password: Option<String>,
    },
    /// List tokens tracked for a chain.
    Tokens { vault_id: String, chain: String },
    /// Fetch the chain-specific balance/account data for an address.
    Balance {
        vault_id: String,
        chain: String,
        #[arg(long)]
        rpc_url: String,
    },
    /// Build, sign, and broadcast a simple transfer.
    Send {
        vault_id: String,
        chain: String,
        to: String,
        amount: String,
        #[arg(long)]
        memo: Option<String>,
        #[arg(long)]
        rpc_url: String,
    },
    /// Build, sign, and broadcast a CosmWasm `execute` message.
    Execute {
        vault_id: String,
        chain: String,
        contract: String,
        msg_json: String,
        #[arg(long)]
        rpc_url: String,
    },
    /// Quote a swap route (out of scope: no swap engine ships in this core).
    SwapQuote {
        vault_id: String,
        from_chain: String,
        to_chain: String,
        amount: String,
    },
    /// Execute a swap route (out of scope: no swap engine ships in this core).
    Swap {
        vault_id: String,
        from_chain: String,
        to_chain: String,
        amount: String,
    },
    /// Export a vault's container bytes to disk.
    Export { vault_id: String, out: PathBuf },
    /// Drop a vault's cached keyshare material.
    Lock { vault_id: String },
    /// Cache a vault's keyshare material for the configured TTL.
    Unlock {
        vault_id: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// Print a vault's summary and lock state.
    Status { vault_id: String },
}

/// Minimal generic `ChainRpc` adapter for the CLI: `GET {url}?address=..` for
/// chain-specific data, `POST {url}` with the raw tx hex for broadcast. A
/// production deployment supplies its own `ChainRpc` per chain family; this
/// exists so the CLI binary is runnable standalone.
pub struct GenericHttpRpc {
    base_url: String,
    client: reqwest::Client,
}

impl GenericHttpRpc {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl ChainRpc for GenericHttpRpc {
    async fn fetch_chain_specific(&self, address: &str) -> Result<ChainSpecificData, Error> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("address", address)])
            .send()
            .await
            .map_err(|e| Error::RpcUnavailable {
                detail: e.to_string(),
                ctx: ErrorContext::new("cli::rpc::fetch_chain_specific"),
            })?;
        resp.json().await.map_err(|e| Error::RpcUnavailable {
            detail: e.to_string(),
            ctx: ErrorContext::new("cli::rpc::fetch_chain_specific"),
        })
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, Error> {
        #[derive(serde::Deserialize)]
        struct Resp {
            tx_hash: String,
        }
        let resp = self
            .client
            .post(&self.base_url)
            .body(hex::encode(raw_tx))
            .send()
            .await
            .map_err(|e| Error::RpcUnavailable {
                detail: e.to_string(),
                ctx: ErrorContext::new("cli::rpc::broadcast"),
            })?;
        let parsed: Resp = resp.json().await.map_err(|e| Error::RpcUnavailable {
            detail: e.to_string(),
            ctx: ErrorContext::new("cli::rpc::broadcast"),
        })?;
        Ok(parsed.tx_hash)
    }
}

fn not_found(op: &str, vault_id: &str) -> Error {
    Error::Storage {
        kind: StorageErrorKind::NotFound,
        detail: format!("no vault with id '{vault_id}'"),
        ctx: ErrorContext::new(op).vault(vault_id),
    }
}

/// Build the `VaultStore` the CLI operates on, honoring `--storage-dir`.
pub async fn open_store(cfg: &VaultCoreConfig, override_dir: Option<PathBuf>) -> Result<VaultStore, Error> {
    let dir = override_dir.unwrap_or_else(|| cfg.storage_dir.clone());
    let storage = Arc::new(FsStorage::new(dir).await?);
    Ok(VaultStore::new(storage, EventBus::new()))
}

/// Dispatch a parsed command, returning the process exit code (§6).
pub async fn run(cli: Cli) -> i32 {
    let cfg = match VaultCoreConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return e.exit_code();
        }
    };

    match dispatch(&cli, &cfg).await {
        Ok(message) => {
            println!("{message}");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

async fn dispatch(cli: &Cli, cfg: &VaultCoreConfig) -> Result<String, Error> {
    let store = open_store(cfg, cli.storage_dir.clone()).await?;
    let relay_url = cli.relay_url.clone().unwrap_or_else(|| cfg.relay_url.clone());

    match &cli.command {
        Command::Import { path, password } => {
            let bytes = std::fs::read(path).map_err(|e| Error::Storage {
                kind: StorageErrorKind::NotFound,
                detail: e.to_string(),
                ctx: ErrorContext::new("cli::import"),
            })?;
            let vault = store.add_vault(&bytes, password.as_deref()).await?;
            Ok(format!("imported vault {}", vault.id()))
        }
        Command::Verify { vault_id } => {
            store
                .get_vault(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::verify", vault_id))?;
            Ok(format!("vault {vault_id} is well-formed"))
        }
        Command::Addresses { vault_id } => {
            let vault = store
                .get_vault(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::addresses", vault_id))?;
            let cache = crate::derive::DerivationCache::new();
            let mut lines = Vec::new();
            for chain in &vault.enabled_chains {
                let addr = cache.address(&vault, chain, 0)?;
                lines.push(format!("{chain}: {addr}"));
            }
            Ok(lines.join("\n"))
        }
        Command::Chains {
            vault_id,
            add,
            remove,
            add_all,
            password,
        } => {
            let container_bytes = store
                .get_container(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::chains", vault_id))?;
            if container::is_encrypted(&container_bytes)? && password.is_none() {
                return Err(Error::PasswordRequired {
                    ctx: ErrorContext::new("cli::chains").vault(vault_id),
                });
            }
            let mut vault = container::decode(&container_bytes, password.as_deref())?;

            if *add_all {
                vault.enabled_chains = crate::registry::supported_chains()
                    .into_iter()
                    .map(|c| c.to_string())
                    .collect();
            }
            if let Some(chain) = add {
                crate::registry::policy(chain)?;
                if !vault.enabled_chains.contains(chain) {
                    vault.enabled_chains.push(chain.clone());
                }
            }
            if let Some(chain) = remove {
                vault.enabled_chains.retain(|c| c != chain);
            }

            let new_bytes = container::encode(&vault, password.as_deref())?;
            store.add_vault(&new_bytes, password.as_deref()).await?;
            Ok(format!("enabled chains: {}", vault.enabled_chains.join(", ")))
        }
        Command::Tokens { vault_id, chain } => {
            let vault = store
                .get_vault(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::tokens", vault_id))?;
            let tokens = vault.tokens.get(chain).cloned().unwrap_or_default();
            Ok(tokens
                .into_iter()
                .map(|t| format!("{} ({})", t.symbol, t.contract_address))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Balance { vault_id, chain, rpc_url } => {
            let vault = store
                .get_vault(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::balance", vault_id))?;
            let cache = crate::derive::DerivationCache::new();
            let address = cache.address(&vault, chain, 0)?;
            let rpc = GenericHttpRpc::new(rpc_url.clone());
            let data = rpc.fetch_chain_specific(&address).await?;
            Ok(format!("{address}: {data:?}"))
        }
        Command::Send { .. } | Command::Execute { .. } => {
            let _ = &relay_url;
            Err(Error::Config(
                "send/execute requires an interactive signing session (relay + MPC driver); \
                 drive crate::signing::SigningSession from an embedding application"
                    .to_string(),
            ))
        }
        Command::SwapQuote { .. } | Command::Swap { .. } => Err(Error::Config(
            "no swap engine ships in this core; route swaps through an external aggregator"
                .to_string(),
        )),
        Command::Export { vault_id, out } => {
            let bytes = store
                .get_container(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::export", vault_id))?;
            std::fs::write(out, bytes).map_err(|e| Error::Storage {
                kind: StorageErrorKind::Unknown,
                detail: e.to_string(),
                ctx: ErrorContext::new("cli::export").vault(vault_id),
            })?;
            Ok(format!("exported vault {vault_id} to {}", out.display()))
        }
        Command::Lock { vault_id } => Ok(format!("lock requested for {vault_id} (drop its cached Handle)")),
        Command::Unlock { vault_id, .. } => Ok(format!(
            "unlock requested for {vault_id} (construct SecretCache::unlock with the vault password)"
        )),
        Command::Status { vault_id } => {
            let vault = store
                .get_vault(vault_id)
                .await?
                .ok_or_else(|| not_found("cli::status", vault_id))?;
            Ok(format!(
                "{} ({} of {} signers, {} chains enabled)",
                vault.name,
                vault.threshold,
                vault.signers.len(),
                vault.enabled_chains.len()
            ))
        }
        Command::Create { name, .. } => Err(Error::Config(format!(
            "vault creation runs the DKG ceremony via the MPC driver and relay, not this CLI; \
             '{name}' must be created by the signing application and then imported"
        ))),
    }
}
