//! Signing Session (C7, §4.7): drives one threshold-signing round per
//! digest over a cooperative task, interleaving relay I/O with the
//! `MpcDriver` step function. Every timeout is an absolute deadline
//! (`tokio::time::Instant`), never a bare `sleep`, per §5.

pub mod relay;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{timeout, Instant};

use crate::error::{Error, ErrorContext};
use crate::events::{Event, EventBus};
use crate::mpc::{MpcDriver, Signature};
use crate::registry::Curve;
use crate::vault::{KeyShares, LibType};
use relay::Relay;

pub const JOIN_TIMEOUT: Duration = Duration::from_secs(60);
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(30);
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ROUND_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    AwaitingPeers { joined: usize, required: usize },
    Running { step: usize, total: usize },
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

/// Cooperative cancellation: polled at round boundaries, never mid-round
/// (§4.7 Cancellation).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SigningSession {
    relay: Arc<dyn Relay>,
    driver: Arc<dyn MpcDriver>,
    events: EventBus,
    local_party_id: String,
    threshold: usize,
    state: Mutex<SessionState>,
}

impl SigningSession {
    pub fn new(
        relay: Arc<dyn Relay>,
        driver: Arc<dyn MpcDriver>,
        events: EventBus,
        local_party_id: impl Into<String>,
        threshold: usize,
    ) -> Self {
        Self {
            relay,
            driver,
            events,
            local_party_id: local_party_id.into(),
            threshold,
            state: Mutex::new(SessionState::Idle),
        }
    }

    /// Current point in the `Idle -> ... -> Done|Failed|Cancelled` state
    /// machine (§4.7), observable independent of `emit_progress`'s
    /// free-text event stream.
    pub fn state(&self) -> SessionState {
        self.state.lock().expect("signing session state poisoned").clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("signing session state poisoned") = state;
    }

    /// Drive the session to completion, returning one signature per digest
    /// in input order (§4.7 Ordering).
    pub async fn run(
        &self,
        session_id: &str,
        key_shares: &KeyShares,
        curve: Curve,
        lib_type: LibType,
        digests: &[[u8; 32]],
        cancel: &CancelToken,
    ) -> Result<Vec<Signature>, Error> {
        let result = self
            .run_inner(session_id, key_shares, curve, lib_type, digests, cancel)
            .await;
        if result.is_err() && !matches!(self.state(), SessionState::Cancelled) {
            self.set_state(SessionState::Failed);
        }
        result
    }

    async fn run_inner(
        &self,
        session_id: &str,
        key_shares: &KeyShares,
        curve: Curve,
        lib_type: LibType,
        digests: &[[u8; 32]],
        cancel: &CancelToken,
    ) -> Result<Vec<Signature>, Error> {
        let ctx = || ErrorContext::new("signing::run");
        let deadline = Instant::now() + SESSION_TIMEOUT;

        self.set_state(SessionState::Preparing);
        self.relay.start(session_id, &self.local_party_id).await?;
        self.emit_progress(session_id, "awaiting_peers", 0);

        self.await_quorum(session_id, deadline).await?;

        if cancel.is_cancelled() {
            self.set_state(SessionState::Cancelled);
            self.emit_progress(session_id, "cancelled", 0);
            return Err(Error::AbortedByPeer {
                peer: self.local_party_id.clone(),
                ctx: ctx(),
            });
        }

        let mut signatures = Vec::with_capacity(digests.len());
        self.set_state(SessionState::Running { step: 0, total: digests.len() });
        for (i, digest) in digests.iter().enumerate() {
            if cancel.is_cancelled() {
                self.set_state(SessionState::Cancelled);
                self.emit_progress(session_id, "cancelled", 0);
                return Err(Error::AbortedByPeer {
                    peer: self.local_party_id.clone(),
                    ctx: ctx(),
                });
            }

            let sig = self
                .run_round_with_retries(session_id, key_shares, curve, lib_type, digest, deadline)
                .await?;
            signatures.push(sig);

            self.set_state(SessionState::Running { step: i + 1, total: digests.len() });
            let percent = (((i + 1) as f64 / digests.len() as f64) * 100.0) as u8;
            self.emit_progress(session_id, "running", percent);
        }

        self.set_state(SessionState::Finalizing);
        self.relay.complete(session_id).await?;
        self.set_state(SessionState::Done);
        self.emit_progress(session_id, "done", 100);
        Ok(signatures)
    }

    async fn await_quorum(&self, session_id: &str, deadline: Instant) -> Result<(), Error> {
        let join_deadline = std::cmp::min(deadline, Instant::now() + JOIN_TIMEOUT);
        loop {
            let joined = self.relay.joined(session_id).await?;
            self.set_state(SessionState::AwaitingPeers {
                joined: joined.parties.len(),
                required: self.threshold,
            });
            self.events.emit(Event::DeviceJoined {
                session_id: session_id.to_string(),
                party_id: self.local_party_id.clone(),
                joined: joined.parties.len(),
                required: self.threshold,
            });
            if joined.parties.len() >= self.threshold {
                return Ok(());
            }
            if Instant::now() >= join_deadline {
                return Err(Error::NoQuorum {
                    ctx: ErrorContext::new("signing::await_quorum"),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn run_round_with_retries(
        &self,
        session_id: &str,
        key_shares: &KeyShares,
        curve: Curve,
        lib_type: LibType,
        digest: &[u8; 32],
        session_deadline: Instant,
    ) -> Result<Signature, Error> {
        let mut last_err = None;
        for _attempt in 0..=ROUND_RETRIES {
            let round_deadline = std::cmp::min(session_deadline, Instant::now() + ROUND_TIMEOUT);
            match timeout(
                round_deadline.saturating_duration_since(Instant::now()),
                self.driver.sign(key_shares, curve, lib_type, digest),
            )
            .await
            {
                Ok(Ok(sig)) => return Ok(sig),
                Ok(Err(e)) => last_err = Some(e),
                Err(_elapsed) => {
                    last_err = Some(Error::PeerUnresponsive {
                        peer: "unknown".to_string(),
                        ctx: ErrorContext::new("signing::run_round_with_retries")
                            .vault(session_id),
                    });
                }
            }
        }
        Err(last_err.unwrap_or(Error::PeerUnresponsive {
            peer: "unknown".to_string(),
            ctx: ErrorContext::new("signing::run_round_with_retries"),
        }))
    }

    fn emit_progress(&self, session_id: &str, step: &str, percent: u8) {
        self.events.emit(Event::SigningProgress {
            session_id: session_id.to_string(),
            step: step.to_string(),
            percent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::test_support::LocalMpcDriver;
    use tokio::sync::Mutex as AsyncMutex;

    struct LoopbackRelay {
        parties: AsyncMutex<Vec<String>>,
    }

    impl LoopbackRelay {
        fn new() -> Self {
            Self {
                parties: AsyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Relay for LoopbackRelay {
        async fn start(&self, _session_id: &str, party_id: &str) -> Result<usize, Error> {
            let mut parties = self.parties.lock().await;
            parties.push(party_id.to_string());
            Ok(parties.len())
        }

        async fn joined(&self, _session_id: &str) -> Result<relay::JoinedParties, Error> {
            Ok(relay::JoinedParties {
                parties: self.parties.lock().await.clone(),
            })
        }

        async fn send_message(
            &self,
            _session_id: &str,
            _from_party_id: &str,
            _message: relay::RelayMessage,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn poll_messages(
            &self,
            _session_id: &str,
            _to_party_id: &str,
        ) -> Result<Vec<relay::RelayMessage>, Error> {
            Ok(Vec::new())
        }

        async fn complete(&self, _session_id: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    fn shares() -> KeyShares {
        KeyShares {
            ecdsa: "ZWNkc2E=".into(),
            eddsa: "ZWRkc2E=".into(),
        }
    }

    #[tokio::test]
    async fn completes_with_one_signature_per_digest() {
        let session = SigningSession::new(
            Arc::new(LoopbackRelay::new()),
            Arc::new(LocalMpcDriver),
            EventBus::new(),
            "device-1",
            1,
        );
        let digests = vec![[1u8; 32], [2u8; 32]];
        let sigs = session
            .run(
                "sess-1",
                &shares(),
                Curve::Ecdsa,
                LibType::Dkls,
                &digests,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(sigs.len(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_before_signing() {
        let session = SigningSession::new(
            Arc::new(LoopbackRelay::new()),
            Arc::new(LocalMpcDriver),
            EventBus::new(),
            "device-1",
            1,
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = session
            .run("sess-2", &shares(), Curve::Ecdsa, LibType::Dkls, &[[1u8; 32]], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AbortedByPeer { .. }));
    }

    #[test]
    fn cancel_token_reports_state() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn state_reaches_done_after_successful_run() {
        let session = SigningSession::new(
            Arc::new(LoopbackRelay::new()),
            Arc::new(LocalMpcDriver),
            EventBus::new(),
            "device-1",
            1,
        );
        assert_eq!(session.state(), SessionState::Idle);
        session
            .run("sess-3", &shares(), Curve::Ecdsa, LibType::Dkls, &[[1u8; 32]], &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Done);
    }

    #[tokio::test]
    async fn state_reaches_cancelled_on_pre_cancelled_run() {
        let session = SigningSession::new(
            Arc::new(LoopbackRelay::new()),
            Arc::new(LocalMpcDriver),
            EventBus::new(),
            "device-1",
            1,
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let _ = session
            .run("sess-4", &shares(), Curve::Ecdsa, LibType::Dkls, &[[1u8; 32]], &cancel)
            .await;
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    struct NeverJoiningRelay;

    #[async_trait::async_trait]
    impl Relay for NeverJoiningRelay {
        async fn start(&self, _session_id: &str, _party_id: &str) -> Result<usize, Error> {
            Ok(0)
        }

        async fn joined(&self, _session_id: &str) -> Result<relay::JoinedParties, Error> {
            Ok(relay::JoinedParties { parties: Vec::new() })
        }

        async fn send_message(
            &self,
            _session_id: &str,
            _from_party_id: &str,
            _message: relay::RelayMessage,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn poll_messages(
            &self,
            _session_id: &str,
            _to_party_id: &str,
        ) -> Result<Vec<relay::RelayMessage>, Error> {
            Ok(Vec::new())
        }

        async fn complete(&self, _session_id: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_quorum_fails_with_no_quorum_after_join_timeout() {
        let session = SigningSession::new(
            Arc::new(NeverJoiningRelay),
            Arc::new(LocalMpcDriver),
            EventBus::new(),
            "device-1",
            2,
        );
        let digests = vec![[1u8; 32]];
        let run = tokio::spawn(async move {
            session
                .run(
                    "sess-no-quorum",
                    &shares(),
                    Curve::Ecdsa,
                    LibType::Dkls,
                    &digests,
                    &CancelToken::new(),
                )
                .await
        });
        tokio::time::advance(JOIN_TIMEOUT + Duration::from_secs(1)).await;
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::NoQuorum { .. }));
    }
}
