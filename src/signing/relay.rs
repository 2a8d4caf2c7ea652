//! Thin `reqwest`-based long-poll relay client (§6 Relay protocol) for the
//! session endpoints this crate's signing sessions drive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedParties {
    pub parties: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub to: String,
    /// Opaque MPC protocol bytes, base64.
    pub body: String,
}

/// The relay transport a signing session drives (§6). A trait so tests can
/// substitute an in-memory double instead of a real HTTPS relay.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn start(&self, session_id: &str, party_id: &str) -> Result<usize, Error>;
    async fn joined(&self, session_id: &str) -> Result<JoinedParties, Error>;
    async fn send_message(
        &self,
        session_id: &str,
        from_party_id: &str,
        message: RelayMessage,
    ) -> Result<(), Error>;
    async fn poll_messages(
        &self,
        session_id: &str,
        to_party_id: &str,
    ) -> Result<Vec<RelayMessage>, Error>;
    async fn complete(&self, session_id: &str) -> Result<(), Error>;
}

pub struct HttpRelay {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn ctx(op: &str) -> ErrorContext {
        ErrorContext::new(op)
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn start(&self, session_id: &str, party_id: &str) -> Result<usize, Error> {
        #[derive(Serialize)]
        struct Body<'a> {
            party_id: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            joined: usize,
        }

        let resp = self
            .client
            .post(format!("{}/start/{session_id}", self.base_url))
            .json(&Body { party_id })
            .send()
            .await
            .map_err(|e| Error::RelayUnavailable {
                detail: e.to_string(),
                ctx: Self::ctx("signing::relay::start"),
            })?;
        let parsed: Resp = resp.json().await.map_err(|e| Error::RelayUnavailable {
            detail: e.to_string(),
            ctx: Self::ctx("signing::relay::start"),
        })?;
        Ok(parsed.joined)
    }

    async fn joined(&self, session_id: &str) -> Result<JoinedParties, Error> {
        let resp = self
            .client
            .get(format!("{}/start/{session_id}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::RelayUnavailable {
                detail: e.to_string(),
                ctx: Self::ctx("signing::relay::joined"),
            })?;
        resp.json().await.map_err(|e| Error::RelayUnavailable {
            detail: e.to_string(),
            ctx: Self::ctx("signing::relay::joined"),
        })
    }

    async fn send_message(
        &self,
        session_id: &str,
        from_party_id: &str,
        message: RelayMessage,
    ) -> Result<(), Error> {
        self.client
            .post(format!("{}/message/{session_id}/{from_party_id}", self.base_url))
            .json(&message)
            .send()
            .await
            .map_err(|e| Error::RelayUnavailable {
                detail: e.to_string(),
                ctx: Self::ctx("signing::relay::send_message"),
            })?;
        Ok(())
    }

    async fn poll_messages(
        &self,
        session_id: &str,
        to_party_id: &str,
    ) -> Result<Vec<RelayMessage>, Error> {
        let resp = self
            .client
            .get(format!("{}/message/{session_id}/{to_party_id}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::RelayUnavailable {
                detail: e.to_string(),
                ctx: Self::ctx("signing::relay::poll_messages"),
            })?;
        resp.json().await.map_err(|e| Error::RelayUnavailable {
            detail: e.to_string(),
            ctx: Self::ctx("signing::relay::poll_messages"),
        })
    }

    async fn complete(&self, session_id: &str) -> Result<(), Error> {
        self.client
            .post(format!("{}/complete/{session_id}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::RelayUnavailable {
                detail: e.to_string(),
                ctx: Self::ctx("signing::relay::complete"),
            })?;
        Ok(())
    }
}
