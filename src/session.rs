//! Session façade (C10, §4.10): the user-facing entry point tying together
//! topology, policy, and connections. Mirrors the `Arc<Inner>` sharing
//! pattern used throughout the driver's own connection/pool layers.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{PolicyChoice, SessionConfig};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::policy::{DcAwareRoundRobinPolicy, HostSelectionPolicy, QueryInfo, RoundRobinPolicy, TokenAwarePolicy};
use crate::result::ResultBody;
use crate::statement::Statement;
use crate::topology::{Cluster, NodeDescriptor, RefreshHint};
use crate::types::Consistency;

/// Session-owned state shared across clones (§4.10: "Owns a cluster
/// reference, a selection policy, and per-configuration defaults").
struct Inner {
    cluster: Cluster,
    policy: Box<dyn HostSelectionPolicy>,
    config: SessionConfig,
}

/// The user-facing handle: `query`/`prepare`/`execute`, pipelined
/// `async_exec`/`fetch`, and paginated `iter`.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Builds a session from its contact points: primes the topology with a
    /// node per contact point. Each node starts with an empty connection
    /// pool; a caller (or a future control-connection bootstrap) fills them
    /// in via [`crate::topology::Cluster::refresh_full`] once shard counts
    /// and DC/rack placement are known.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        if config.contact_points.is_empty() {
            return Err(Error::NoHosts);
        }

        let cluster = Cluster::new();
        let mut descriptors = Vec::with_capacity(config.contact_points.len());
        for address in &config.contact_points {
            descriptors.push(NodeDescriptor {
                address: *address,
                datacenter: String::new(),
                rack: String::new(),
            });
        }
        cluster.refresh(descriptors);

        let policy: Box<dyn HostSelectionPolicy> = build_policy(&config);

        Ok(Self {
            inner: Arc::new(Inner { cluster, policy, config }),
        })
    }

    pub fn query(&self, text: impl Into<String>) -> Statement {
        let consistency = self.inner.config.connection.default_consistency.unwrap_or(Consistency::One);
        Statement::new(text, consistency)
    }

    /// Sends PREPARE on the least-busy connection of any up node (§4.10).
    pub async fn prepare(&self, text: &str) -> Result<Statement> {
        let conn = self.any_connection()?;
        let result = conn.prepare(text).await?;
        let consistency = self.inner.config.connection.default_consistency.unwrap_or(Consistency::One);
        match result {
            ResultBody::Prepared {
                id,
                partition_key_indices,
                result_metadata,
            } => Ok(Statement {
                prepared_id: Some(id),
                partition_key_indices,
                result_metadata: Some(result_metadata),
                ..Statement::new(text, consistency)
            }),
            other => Err(Error::protocol(format!("PREPARE did not return a Prepared body: {other:?}"))),
        }
    }

    /// Executes `stmt`, routing it through the configured policy (§4.10).
    pub async fn execute(&self, stmt: &Statement) -> Result<ResultBody> {
        let conn = self.connection_for(stmt)?;
        if stmt.prepared_id.is_some() {
            conn.execute(stmt).await
        } else {
            conn.query(stmt).await
        }
    }

    /// Submits `stmt` without waiting for the reply; returns a receiver that
    /// yields the single result, preserving submission order per the
    /// connection's stream multiplexer (§4.10 `async_exec`/`fetch`).
    pub async fn async_exec(&self, stmt: Statement) -> Result<mpsc::Receiver<Result<ResultBody>>> {
        let conn = self.connection_for(&stmt)?;
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let result = if stmt.prepared_id.is_some() {
                conn.execute(&stmt).await
            } else {
                conn.query(&stmt).await
            };
            let _ = tx.send(result).await;
        });
        Ok(rx)
    }

    /// Awaits the next result from a receiver returned by [`Self::async_exec`]
    /// (§4.10 `fetch`).
    pub async fn fetch(rx: &mut mpsc::Receiver<Result<ResultBody>>) -> Result<ResultBody> {
        rx.recv().await.ok_or(Error::ClosedIter)?
    }

    /// Wraps paginated execution: a worker task issues sequential pages,
    /// forwarding each page through a request/response channel pair;
    /// dropping the returned [`PageIter`] closes the request channel and lets
    /// the worker exit (§4.10 `iter`).
    pub fn iter(&self, mut stmt: Statement) -> PageIter {
        let (next_tx, mut next_rx) = mpsc::channel::<()>(1);
        let (page_tx, page_rx) = mpsc::channel::<Result<ResultBody>>(1);
        let session = self.clone();

        tokio::spawn(async move {
            loop {
                if next_rx.recv().await.is_none() {
                    return;
                }
                let result = session.execute(&stmt).await;
                let paging_state = match &result {
                    Ok(ResultBody::Rows { paging_state, .. }) => paging_state.clone(),
                    _ => None,
                };
                let has_more = paging_state.is_some();
                if page_tx.send(result).await.is_err() {
                    return;
                }
                if !has_more {
                    return;
                }
                stmt = stmt.with_paging_state(paging_state);
            }
        });

        PageIter { next_tx, page_rx }
    }

    /// Applies one control-connection event and, if it signals staleness,
    /// reports which kind of refresh the caller should run (§4.8, §4.10).
    pub fn apply_event(&self, event: &crate::event::Event) -> Option<RefreshHint> {
        self.inner.cluster.apply_event(event)
    }

    fn connection_for(&self, stmt: &Statement) -> Result<Arc<Connection>> {
        let token = stmt.partition_key().map(|key| crate::token::token_of(&key));
        let snapshot = self.inner.cluster.snapshot();
        // Statements don't carry their own keyspace (§3), so there's no
        // per-statement RF map to hand the token-aware policy; it degrades
        // to its wrapped policy until a keyspace-aware statement model is
        // added (see DESIGN.md).
        let info = QueryInfo {
            topology: &snapshot,
            token,
            dc_replication_factors: None,
        };

        for node in self.inner.policy.plan(&info) {
            if !node.is_up() {
                continue;
            }
            if let Some(conn) = node.pool.conn(token.unwrap_or(0)) {
                return Ok(conn);
            }
        }
        Err(Error::NoConnection)
    }

    fn any_connection(&self) -> Result<Arc<Connection>> {
        let snapshot = self.inner.cluster.snapshot();
        for node in snapshot.nodes.iter().filter(|n| n.is_up()) {
            if let Some(conn) = node.pool.least_busy_conn() {
                return Ok(conn);
            }
        }
        Err(Error::NoConnection)
    }
}

/// A handle over one `iter` worker task's page stream (§4.10).
pub struct PageIter {
    next_tx: mpsc::Sender<()>,
    page_rx: mpsc::Receiver<Result<ResultBody>>,
}

impl PageIter {
    /// Requests and awaits the next page; `None` once the result set is
    /// exhausted.
    pub async fn next_page(&mut self) -> Option<Result<ResultBody>> {
        if self.next_tx.send(()).await.is_err() {
            return None;
        }
        self.page_rx.recv().await
    }
}

fn build_policy(config: &SessionConfig) -> Box<dyn HostSelectionPolicy> {
    let base: Box<dyn HostSelectionPolicy> = match config.policy {
        PolicyChoice::RoundRobin => Box::new(RoundRobinPolicy::new()),
        PolicyChoice::DcAwareRoundRobin => {
            let local_dc = config.local_dc.clone().unwrap_or_default();
            Box::new(DcAwareRoundRobinPolicy::new(local_dc))
        }
    };
    if config.token_aware {
        Box::new(TokenAwarePolicy::new(base))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_with_no_contact_points_is_rejected() {
        let config = SessionConfig::new(Vec::new());
        let result = Session::connect(config).await;
        assert!(matches!(result, Err(Error::NoHosts)));
    }

    #[tokio::test]
    async fn connect_primes_topology_with_contact_points() {
        let config = SessionConfig::new(vec!["127.0.0.1:9042".parse().unwrap()]);
        let session = Session::connect(config).await.unwrap();
        assert_eq!(session.inner.cluster.snapshot().nodes.len(), 1);
    }

    #[tokio::test]
    async fn execute_without_any_reachable_connection_fails_with_no_connection() {
        let config = SessionConfig::new(vec!["127.0.0.1:9042".parse().unwrap()]);
        let session = Session::connect(config).await.unwrap();
        let stmt = session.query("select 1");
        let result = session.execute(&stmt).await;
        assert!(matches!(result, Err(Error::NoConnection)));
    }
}
