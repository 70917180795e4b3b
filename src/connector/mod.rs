//! Connector - a Session bound to storage
//!
//! Every operation is "perform, then persist": the protocol exchange runs
//! against the shared [`Session`], and only after it succeeds is the mutated
//! session written back. A failed write after a successful exchange is
//! reported as [`Error::Persistence`], because the wallet has already seen
//! the effect.
//!
//! `connect` races one handshake per candidate wallet:
//!
//! ```text
//!            ┌─ attempt(wallet 1) ─┐
//! connect ───┼─ attempt(wallet 2) ─┼──→ first Ok wins → cancel rest → persist once
//!            └─ attempt(wallet N) ─┘
//! ```
//!
//! The consumer loop is the only place that sees results and the only place
//! that persists, so a winner can't be dropped and a loser can't overwrite it.

mod storage;

pub use storage::{MemoryStorage, Storage};
#[cfg(feature = "file-store")]
pub use storage::FileStorage;

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::BridgeClient;
use crate::config::{ConnectorConfig, MessageOptions};
use crate::error::{Error, Result};
use crate::protocol::{ConnectResponse, Wallet};
use crate::session::Session;

type Attempt = (String, Result<ConnectResponse>);

pub struct Connector<S: Storage> {
    session: Arc<Session>,
    storage: S,
    client: BridgeClient,
    config: ConnectorConfig,
    persist_lock: Mutex<()>,
}

impl<S: Storage> Connector<S> {
    /// Load the stored session, or create and store a fresh one.
    pub async fn acquire(storage: S, config: ConnectorConfig) -> Result<Self> {
        let client = BridgeClient::new(config.bridge.clone())?;
        Self::acquire_with_client(storage, client, config).await
    }

    /// Like [`acquire`](Self::acquire) with a caller-supplied transport.
    pub async fn acquire_with_client(storage: S, client: BridgeClient, config: ConnectorConfig) -> Result<Self> {
        let stored = storage
            .get()
            .await
            .map_err(|source| Error::Persistence { operation: "load", source })?;
        let session = match stored {
            Some(session) => {
                debug!(id = %session.id(), "Loaded stored session");
                session
            }
            None => {
                let session = Session::new()?;
                storage
                    .set(&session)
                    .await
                    .map_err(|source| Error::Persistence { operation: "create", source })?;
                info!(id = %session.id(), "Created new session");
                session
            }
        };
        Ok(Self {
            session: Arc::new(session),
            storage,
            client,
            config,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Race a connect handshake against every candidate; the first wallet to
    /// connect wins and the others are cancelled.
    pub async fn connect(&self, wallets: &[Wallet], cancel: &CancellationToken) -> Result<ConnectResponse> {
        let max = self.config.max_connect_candidates;
        if wallets.len() > max {
            return Err(Error::TooManyCandidates { got: wallets.len(), max });
        }

        let race = cancel.child_token();
        let _race_guard = race.clone().drop_guard();
        let mut attempts: JoinSet<Attempt> = JoinSet::new();
        for wallet in wallets.iter().cloned() {
            let session = self.session.clone();
            let client = self.client.clone();
            let token = race.clone();
            attempts.spawn(async move {
                let result = session.connect(&client, &wallet, &token).await;
                (wallet.name, result)
            });
        }

        let mut failures = Vec::new();
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle_cancelled_race(&race, &mut attempts).await,
                joined = attempts.join_next() => joined,
            };
            let (name, result) = match joined {
                None => return Err(Error::AggregateConnect { failures }),
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) if e.is_cancelled() => continue,
                Some(Err(e)) => std::panic::resume_unwind(e.into_panic()),
            };
            match result {
                Ok(response) => {
                    race.cancel();
                    attempts.abort_all();
                    info!(wallet = %name, "Connect race won");
                    self.persist("connect").await?;
                    return Ok(response);
                }
                Err(Error::Cancelled) if cancel.is_cancelled() => {
                    return self.settle_cancelled_race(&race, &mut attempts).await;
                }
                Err(e) => {
                    warn!(wallet = %name, error = %e, "Connect attempt failed");
                    failures.push((name, e));
                }
            }
        }
    }

    /// The caller cancelled. An attempt may already have bound the session
    /// without the loop having seen it; if so it still wins and is persisted,
    /// otherwise the race is `Cancelled`.
    async fn settle_cancelled_race(
        &self,
        race: &CancellationToken,
        attempts: &mut JoinSet<Attempt>,
    ) -> Result<ConnectResponse> {
        race.cancel();
        attempts.abort_all();
        while let Some(joined) = attempts.join_next().await {
            if let Ok((name, Ok(response))) = joined {
                info!(wallet = %name, "Connect completed as the race was cancelled");
                attempts.abort_all();
                self.persist("connect").await?;
                return Ok(response);
            }
        }
        debug!("Connect race cancelled");
        Err(Error::Cancelled)
    }

    pub async fn send_transaction<T: Serialize + ?Sized>(
        &self,
        transaction: &T,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let exchange = self.session.send_transaction(&self.client, transaction, options, cancel);
        let result = self.with_deadline(exchange).await?;
        self.persist("send_transaction").await?;
        Ok(result)
    }

    pub async fn sign_data<T: Serialize + ?Sized>(
        &self,
        data: &T,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let exchange = self.session.sign_data(&self.client, data, options, cancel);
        let result = self.with_deadline(exchange).await?;
        self.persist("sign_data").await?;
        Ok(result)
    }

    pub async fn disconnect(&self, options: &MessageOptions, cancel: &CancellationToken) -> Result<()> {
        self.session.disconnect(&self.client, options, cancel).await?;
        self.persist("disconnect").await
    }

    async fn with_deadline<T>(&self, exchange: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| Error::Timeout)?,
            None => exchange.await,
        }
    }

    /// Snapshot and write under one lock so a slower writer can never store
    /// an older snapshot over a newer one.
    async fn persist(&self, operation: &'static str) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.storage
            .set(&self.session)
            .await
            .map_err(|source| Error::Persistence { operation, source })
    }
}
