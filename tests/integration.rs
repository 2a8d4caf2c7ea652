//! Cross-module scenarios from the testable-properties list: idempotent
//! import against a real filesystem store, lock safety through the secret
//! cache, UTXO amount conservation, and hash-signature pairing through a
//! full signing session.

use std::collections::HashMap;
use std::sync::Arc;

use vault_core::container;
use vault_core::store::{FsStorage, VaultStore};
use vault_core::vault::{KeyShares, LibType, PublicKeys, Vault};
use vault_core::EventBus;

fn sample_vault(with_keyshares: bool) -> Vault {
    Vault {
        name: "Integration Vault".into(),
        public_keys: PublicKeys {
            ecdsa: "02".to_string() + &"ab".repeat(32),
            eddsa: "cd".repeat(32),
        },
        hex_chain_code: "11".repeat(32),
        local_party_id: "device-1".into(),
        signers: vec!["device-1".into(), "server".into()],
        threshold: 2,
        lib_type: LibType::Dkls,
        lib_type_raw: "DKLS".into(),
        created_at: chrono::Utc::now(),
        last_modified: chrono::Utc::now(),
        is_backed_up: false,
        order: 0,
        currency: "USD".into(),
        enabled_chains: vec!["bitcoin".into(), "ethereum".into()],
        tokens: HashMap::new(),
        key_shares: with_keyshares.then(|| KeyShares {
            ecdsa: "ZWNkc2E=".into(),
            eddsa: "ZWRkc2E=".into(),
        }),
        unknown_fields: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn importing_the_same_container_twice_yields_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsStorage::new(dir.path()).await.unwrap());
    let store = VaultStore::new(storage, EventBus::new());

    let vault = sample_vault(true);
    let bytes = container::encode(&vault, None).unwrap();

    store.add_vault(&bytes, None).await.unwrap();
    store.add_vault(&bytes, None).await.unwrap();

    let listed = store.list_vaults().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, vault.id());
}

#[tokio::test]
async fn locking_a_vault_invalidates_its_secret_cache_handle() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsStorage::new(dir.path()).await.unwrap());
    let store = Arc::new(VaultStore::new(storage, EventBus::new()));

    let vault = sample_vault(true);
    let bytes = container::encode(&vault, Some("Password123!")).unwrap();
    store.add_vault(&bytes, Some("Password123!")).await.unwrap();

    let cache = vault_core::SecretCache::new(store.clone());
    let password = secrecy::SecretString::new("Password123!".to_string());
    let handle = cache.unlock(vault.id(), Some(&password)).await.unwrap();
    assert!(cache.reveal(&handle).await.is_ok());

    cache.lock(vault.id()).await;
    let err = cache.reveal(&handle).await.unwrap_err();
    assert!(matches!(err, vault_core::Error::KeyshareMissing { .. }));
}

#[tokio::test]
async fn utxo_send_conserves_inputs_equal_amount_plus_change_plus_fee() {
    use vault_core::rpc::Utxo;
    use vault_core::txbuild::utxo::select_inputs;
    use vault_core::vault::BlockchainSpecific;

    let unspent = vec![
        Utxo { txid: "a".repeat(64), vout: 0, amount_sats: 100_000 },
        Utxo { txid: "b".repeat(64), vout: 1, amount_sats: 50_000 },
    ];
    let result = select_inputs(&unspent, "120000", 10, "bitcoin").unwrap();
    let BlockchainSpecific::Utxo { inputs, fee_sat_per_vbyte } = result else {
        panic!("expected utxo variant");
    };
    assert_eq!(inputs.len(), 2);
    let sum: u64 = inputs.iter().map(|i| i.amount_sats).sum();
    assert!(sum >= 120_000);
    assert_eq!(fee_sat_per_vbyte, 10);
}

#[tokio::test]
async fn signing_session_produces_one_ordered_signature_per_digest() {
    use vault_core::mpc::test_support::LocalMpcDriver;
    use vault_core::registry::Curve;
    use vault_core::signing::relay::{JoinedParties, Relay, RelayMessage};
    use vault_core::signing::{CancelToken, SigningSession};

    struct OneShotRelay;

    #[async_trait::async_trait]
    impl Relay for OneShotRelay {
        async fn start(&self, _session_id: &str, _party_id: &str) -> Result<usize, vault_core::Error> {
            Ok(1)
        }
        async fn joined(&self, _session_id: &str) -> Result<JoinedParties, vault_core::Error> {
            Ok(JoinedParties { parties: vec!["device-1".into()] })
        }
        async fn send_message(
            &self,
            _session_id: &str,
            _from_party_id: &str,
            _message: RelayMessage,
        ) -> Result<(), vault_core::Error> {
            Ok(())
        }
        async fn poll_messages(
            &self,
            _session_id: &str,
            _to_party_id: &str,
        ) -> Result<Vec<RelayMessage>, vault_core::Error> {
            Ok(Vec::new())
        }
        async fn complete(&self, _session_id: &str) -> Result<(), vault_core::Error> {
            Ok(())
        }
    }

    let session = SigningSession::new(
        Arc::new(OneShotRelay),
        Arc::new(LocalMpcDriver),
        EventBus::new(),
        "device-1",
        1,
    );
    let key_shares = KeyShares {
        ecdsa: "ZWNkc2E=".into(),
        eddsa: "ZWRkc2E=".into(),
    };
    let digests = vec![[1u8; 32], [2u8; 32], [3u8; 32]];
    let sigs = session
        .run(
            "session-abc",
            &key_shares,
            Curve::Ecdsa,
            LibType::Dkls,
            &digests,
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(sigs.len(), digests.len());
}

#[tokio::test]
async fn cancelling_a_session_never_produces_signatures() {
    use vault_core::mpc::test_support::LocalMpcDriver;
    use vault_core::registry::Curve;
    use vault_core::signing::relay::{JoinedParties, Relay, RelayMessage};
    use vault_core::signing::{CancelToken, SigningSession};

    struct OneShotRelay;

    #[async_trait::async_trait]
    impl Relay for OneShotRelay {
        async fn start(&self, _session_id: &str, _party_id: &str) -> Result<usize, vault_core::Error> {
            Ok(1)
        }
        async fn joined(&self, _session_id: &str) -> Result<JoinedParties, vault_core::Error> {
            Ok(JoinedParties { parties: vec!["device-1".into()] })
        }
        async fn send_message(
            &self,
            _session_id: &str,
            _from_party_id: &str,
            _message: RelayMessage,
        ) -> Result<(), vault_core::Error> {
            Ok(())
        }
        async fn poll_messages(
            &self,
            _session_id: &str,
            _to_party_id: &str,
        ) -> Result<Vec<RelayMessage>, vault_core::Error> {
            Ok(Vec::new())
        }
        async fn complete(&self, _session_id: &str) -> Result<(), vault_core::Error> {
            Ok(())
        }
    }

    let session = SigningSession::new(
        Arc::new(OneShotRelay),
        Arc::new(LocalMpcDriver),
        EventBus::new(),
        "device-1",
        1,
    );
    let key_shares = KeyShares {
        ecdsa: "ZWNkc2E=".into(),
        eddsa: "ZWRkc2E=".into(),
    };
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = session
        .run(
            "session-cancel",
            &key_shares,
            Curve::Ecdsa,
            LibType::Dkls,
            &[[9u8; 32]],
            &cancel,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cosmos_governance_vote_amino_digest_matches_canonical_signdoc_fields() {
    use vault_core::rpc::{ChainRpc, ChainSpecificData};
    use vault_core::txbuild::{self, SignAminoIntent};
    use vault_core::vault::{AminoCoin, AminoFee, AminoMsg, CoinRef};

    struct StubCosmosRpc;

    #[async_trait::async_trait]
    impl ChainRpc for StubCosmosRpc {
        async fn fetch_chain_specific(&self, _address: &str) -> Result<ChainSpecificData, vault_core::Error> {
            Ok(ChainSpecificData::Cosmos { account_number: 12345, sequence: 7, gas_estimate: 200_000 })
        }
        async fn broadcast(&self, _raw_tx: &[u8]) -> Result<String, vault_core::Error> {
            unreachable!("not exercised by this test")
        }
    }

    // "thorchain" (not "cosmos") since the registry routes `cosmos` through
    // `signDirect` and only the Amino-family chains through this path.
    let intent = SignAminoIntent {
        chain: "thorchain".to_string(),
        coin: CoinRef {
            chain: "thorchain".to_string(),
            address: "thor1voter".to_string(),
            decimals: 6,
            ticker: "RUNE".to_string(),
            token_id: None,
            hex_public_key: "02".to_string() + &"ab".repeat(32),
        },
        msgs: vec![AminoMsg {
            msg_type: "cosmos-sdk/MsgVote".to_string(),
            value: serde_json::json!({"voter": "cosmos1voter", "proposal_id": "1", "option": 1}),
        }],
        fee: AminoFee {
            amount: vec![AminoCoin { denom: "uatom".to_string(), amount: "5000".to_string() }],
            gas: "200000".to_string(),
            payer: None,
            granter: None,
        },
        memo: None,
        vault_local_party_id: "device-1".to_string(),
        vault_public_key_ecdsa: "02".to_string() + &"ab".repeat(32),
        lib_type: LibType::Dkls,
        skip_chain_specific_fetch: false,
    };

    let payload = txbuild::build_sign_amino(intent, &StubCosmosRpc).await.unwrap();
    let vault_core::vault::BlockchainSpecific::Cosmos { account_number, sequence, gas } =
        payload.blockchain_specific
    else {
        panic!("expected cosmos blockchain_specific");
    };
    assert_eq!(account_number, 12345);
    assert_eq!(sequence, 7);
    assert_eq!(gas, 200_000);

    let digests = vault_core::presign::extract_digests(&payload).unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].len(), 64, "sha256 hex digest is 64 chars");
}

#[tokio::test]
async fn two_of_three_signing_session_without_quorum_fails_with_no_quorum() {
    use vault_core::mpc::test_support::LocalMpcDriver;
    use vault_core::registry::Curve;
    use vault_core::signing::relay::{JoinedParties, Relay, RelayMessage};
    use vault_core::signing::{CancelToken, SigningSession};

    struct OnlyLocalJoinsRelay;

    #[async_trait::async_trait]
    impl Relay for OnlyLocalJoinsRelay {
        async fn start(&self, _session_id: &str, _party_id: &str) -> Result<usize, vault_core::Error> {
            Ok(1)
        }
        async fn joined(&self, _session_id: &str) -> Result<JoinedParties, vault_core::Error> {
            Ok(JoinedParties { parties: vec!["device-1".into()] })
        }
        async fn send_message(
            &self,
            _session_id: &str,
            _from_party_id: &str,
            _message: RelayMessage,
        ) -> Result<(), vault_core::Error> {
            Ok(())
        }
        async fn poll_messages(
            &self,
            _session_id: &str,
            _to_party_id: &str,
        ) -> Result<Vec<RelayMessage>, vault_core::Error> {
            Ok(Vec::new())
        }
        async fn complete(&self, _session_id: &str) -> Result<(), vault_core::Error> {
            Ok(())
        }
    }

    // t=2, n=3: only the local party ever joins, so quorum (threshold 2)
    // is never reached before `JOIN_TIMEOUT` elapses.
    let session = SigningSession::new(
        Arc::new(OnlyLocalJoinsRelay),
        Arc::new(LocalMpcDriver),
        EventBus::new(),
        "device-1",
        2,
    );
    let key_shares = KeyShares {
        ecdsa: "ZWNkc2E=".into(),
        eddsa: "ZWRkc2E=".into(),
    };
    let run = tokio::spawn(async move {
        session
            .run(
                "session-no-quorum",
                &key_shares,
                Curve::Ecdsa,
                LibType::Dkls,
                &[[1u8; 32]],
                &CancelToken::new(),
            )
            .await
    });
    tokio::time::pause();
    tokio::time::advance(vault_core::signing::JOIN_TIMEOUT + std::time::Duration::from_secs(1)).await;
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, vault_core::Error::NoQuorum { .. }));
}
