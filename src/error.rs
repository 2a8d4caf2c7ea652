//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived enum with a variant family per component, mirroring
//! how protocol-specific errors were folded into a single `Error` type. Errors
//! never carry secret bytes (keyshares, passwords) in their `Display` output.

use thiserror::Error;

/// Context attached to an error: which operation, on which vault, for which chain.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub vault_id: Option<String>,
    pub chain: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            vault_id: None,
            chain: None,
        }
    }

    pub fn vault(mut self, id: impl Into<String>) -> Self {
        self.vault_id = Some(id.into());
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = self.operation.as_deref().unwrap_or("?");
        write!(f, "op={op}")?;
        if let Some(v) = &self.vault_id {
            write!(f, " vault={v}")?;
        }
        if let Some(c) = &self.chain {
            write!(f, " chain={c}")?;
        }
        Ok(())
    }
}

/// Storage failure kinds (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    PermissionDenied,
    QuotaExceeded,
    NotFound,
    Unknown,
}

impl std::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageErrorKind::PermissionDenied => "permission_denied",
            StorageErrorKind::QuotaExceeded => "quota_exceeded",
            StorageErrorKind::NotFound => "not_found",
            StorageErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // ---- C1 Container Codec ----
    #[error("malformed vault container ({ctx}): {detail}")]
    MalformedContainer { detail: String, ctx: ErrorContext },

    #[error("wrong password ({ctx})")]
    WrongPassword { ctx: ErrorContext },

    #[error("unsupported container version {version} ({ctx})")]
    UnsupportedVersion { version: u32, ctx: ErrorContext },

    #[error("container integrity check failed ({ctx})")]
    IntegrityFailure { ctx: ErrorContext },

    // ---- C2 Vault Store ----
    #[error("storage error [{kind}] ({ctx}): {detail}")]
    Storage {
        kind: StorageErrorKind,
        detail: String,
        ctx: ErrorContext,
    },

    // ---- C3 Key Derivation ----
    #[error("unsupported chain '{chain}' ({ctx})")]
    UnsupportedChain { chain: String, ctx: ErrorContext },

    #[error("derivation failed ({ctx}): {detail}")]
    DerivationFailed { detail: String, ctx: ErrorContext },

    // ---- C5 Transaction Builder ----
    #[error("invalid address ({ctx}): {detail}")]
    InvalidAddress { detail: String, ctx: ErrorContext },

    #[error("invalid config ({ctx}): {detail}")]
    InvalidConfig { detail: String, ctx: ErrorContext },

    #[error("insufficient funds ({ctx}): have {available}, need {required}")]
    InsufficientFunds {
        available: String,
        required: String,
        ctx: ErrorContext,
    },

    #[error("rpc unavailable ({ctx}): {detail}")]
    RpcUnavailable { detail: String, ctx: ErrorContext },

    #[error("failed to build transaction ({ctx}): {detail}")]
    BuildFailed { detail: String, ctx: ErrorContext },

    // ---- C6 Pre-Sign Hasher ----
    #[error("hash extraction failed ({ctx}): {detail}")]
    HashExtractionFailed { detail: String, ctx: ErrorContext },

    // ---- C7 Signing Session ----
    #[error("signing quorum not reached ({ctx})")]
    NoQuorum { ctx: ErrorContext },

    #[error("peer unresponsive ({ctx}): {peer}")]
    PeerUnresponsive { peer: String, ctx: ErrorContext },

    #[error("relay unavailable ({ctx}): {detail}")]
    RelayUnavailable { detail: String, ctx: ErrorContext },

    #[error("keyshare missing ({ctx})")]
    KeyshareMissing { ctx: ErrorContext },

    #[error("password required ({ctx})")]
    PasswordRequired { ctx: ErrorContext },

    #[error("session aborted by peer ({ctx}): {peer}")]
    AbortedByPeer { peer: String, ctx: ErrorContext },

    #[error("mpc library error ({ctx}): {detail}")]
    LibraryError { detail: String, ctx: ErrorContext },

    // ---- C8 Broadcast Bridge ----
    #[error("broadcast failed (transient={transient}) ({ctx}): {detail}")]
    BroadcastFailed {
        transient: bool,
        detail: String,
        ctx: ErrorContext,
    },

    // ---- generic / config loading ----
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::MalformedContainer { ctx, .. }
            | Error::WrongPassword { ctx }
            | Error::UnsupportedVersion { ctx, .. }
            | Error::IntegrityFailure { ctx }
            | Error::Storage { ctx, .. }
            | Error::UnsupportedChain { ctx, .. }
            | Error::DerivationFailed { ctx, .. }
            | Error::InvalidAddress { ctx, .. }
            | Error::InvalidConfig { ctx, .. }
            | Error::InsufficientFunds { ctx, .. }
            | Error::RpcUnavailable { ctx, .. }
            | Error::BuildFailed { ctx, .. }
            | Error::HashExtractionFailed { ctx, .. }
            | Error::NoQuorum { ctx }
            | Error::PeerUnresponsive { ctx, .. }
            | Error::RelayUnavailable { ctx, .. }
            | Error::KeyshareMissing { ctx }
            | Error::PasswordRequired { ctx }
            | Error::AbortedByPeer { ctx, .. }
            | Error::LibraryError { ctx, .. }
            | Error::BroadcastFailed { ctx, .. } => Some(ctx),
            Error::Config(_) => None,
        }
    }

    /// Whether the caller may retry the underlying operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RpcUnavailable { .. } | Error::BroadcastFailed { transient: true, .. }
        )
    }

    /// CLI exit code mapping (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig { .. } | Error::Config(_) => 3,
            Error::PasswordRequired { .. } | Error::WrongPassword { .. } => 4,
            Error::RpcUnavailable { .. } | Error::RelayUnavailable { .. } => 5,
            Error::Storage { .. }
            | Error::MalformedContainer { .. }
            | Error::UnsupportedVersion { .. }
            | Error::IntegrityFailure { .. }
            | Error::UnsupportedChain { .. }
            | Error::DerivationFailed { .. }
            | Error::KeyshareMissing { .. } => 6,
            Error::InvalidAddress { .. }
            | Error::InsufficientFunds { .. }
            | Error::BuildFailed { .. }
            | Error::HashExtractionFailed { .. }
            | Error::NoQuorum { .. }
            | Error::PeerUnresponsive { .. }
            | Error::AbortedByPeer { .. }
            | Error::LibraryError { .. }
            | Error::BroadcastFailed { .. } => 7,
        }
    }
}
