//! A standalone in-process gateway server.
//!
//! Accepts every gateway under the EU868 plan, schedules downlinks at their
//! requested settings and drains the north-side channels into the log. Useful
//! for running the frontends without an upstream Network Server; real
//! deployments supply their own [`GatewayServer`] implementation.

use async_trait::async_trait;
use lgw_core::{Connection, Frontend, GatewayServer, NoopRateLimiter, RateLimiter, Scheduler};
use lgw_error::{GwError, GwResult};
use lgw_models::{Antenna, FrequencyPlan, Gateway, GatewayIds, TxSettings};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Scheduler that accepts every request as-is.
#[derive(Debug, Default)]
struct AcceptAllScheduler;

#[async_trait]
impl Scheduler for AcceptAllScheduler {
    async fn schedule_at(&self, settings: TxSettings, _payload_len: usize) -> GwResult<TxSettings> {
        Ok(settings)
    }

    async fn schedule_anytime(
        &self,
        settings: TxSettings,
        _payload_len: usize,
    ) -> GwResult<TxSettings> {
        Ok(settings)
    }
}

pub struct StandaloneServer {
    frequency_plan: Arc<FrequencyPlan>,
    claims: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl StandaloneServer {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            frequency_plan: Arc::new(FrequencyPlan::eu868()),
            claims: Mutex::new(HashSet::new()),
            cancel,
        })
    }

    /// Logs everything the gateway sends until it disconnects.
    fn drain(conn: &Arc<Connection>, cancel: CancellationToken) {
        let gateway_id = conn.gateway().ids.gateway_id.clone();
        let mut up_rx = conn.take_up();
        let mut status_rx = conn.take_status();
        let mut ack_rx = conn.take_tx_ack();
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = conn.disconnected() => break,
                    up = recv_opt(&mut up_rx) => match up {
                        Some(up) => info!(
                            %gateway_id,
                            frequency = up.settings.frequency,
                            timestamp = up.settings.timestamp,
                            size = up.raw_payload.len(),
                            "uplink"
                        ),
                        None => break,
                    },
                    status = recv_opt(&mut status_rx) => match status {
                        Some(status) => info!(%gateway_id, versions = ?status.versions, "status"),
                        None => break,
                    },
                    ack = recv_opt(&mut ack_rx) => match ack {
                        Some(ack) => info!(%gateway_id, result = ?ack.result, "tx ack"),
                        None => break,
                    },
                }
            }
        });
    }
}

async fn recv_opt<T>(rx: &mut Option<tokio::sync::mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl GatewayServer for StandaloneServer {
    async fn fill_gateway_context(&self, ids: GatewayIds) -> GwResult<GatewayIds> {
        Ok(ids)
    }

    async fn authorize(&self, _ids: &GatewayIds, _credentials: Option<&str>) -> GwResult<()> {
        Ok(())
    }

    async fn connect(
        &self,
        frontend: Arc<dyn Frontend>,
        ids: &GatewayIds,
    ) -> GwResult<Arc<Connection>> {
        let gateway = Arc::new(Gateway {
            ids: ids.clone(),
            antennas: vec![Antenna { gain: 0.0 }],
            frequency_plan_id: self.frequency_plan.id.clone(),
            schedule_downlink_late: false,
        });
        let conn = Connection::new(
            self.cancel.child_token(),
            frontend,
            gateway,
            Arc::clone(&self.frequency_plan),
            Some(Arc::new(AcceptAllScheduler)),
        );
        Self::drain(&conn, self.cancel.child_token());
        Ok(conn)
    }

    async fn frequency_plan(&self, _ids: &GatewayIds) -> GwResult<Arc<FrequencyPlan>> {
        Ok(Arc::clone(&self.frequency_plan))
    }

    async fn claim_downlink(&self, ids: &GatewayIds) -> GwResult<()> {
        let mut claims = self.claims.lock().unwrap();
        if !claims.insert(ids.gateway_id.clone()) {
            return Err(GwError::DownlinkClaim(format!(
                "`{}` is already claimed",
                ids.gateway_id
            )));
        }
        Ok(())
    }

    async fn unclaim_downlink(&self, ids: &GatewayIds) -> GwResult<()> {
        self.claims.lock().unwrap().remove(&ids.gateway_id);
        Ok(())
    }

    fn rate_limiter(&self) -> Arc<dyn RateLimiter> {
        Arc::new(NoopRateLimiter)
    }
}
