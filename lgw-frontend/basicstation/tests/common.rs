use async_trait::async_trait;
use lgw_core::{Connection, Frontend, GatewayServer, NoopRateLimiter, RateLimiter, Scheduler};
use lgw_error::{GwError, GwResult};
use lgw_models::{Antenna, FrequencyPlan, Gateway, GatewayIds, TxSettings};
use std::sync::{Arc, Mutex, Once};
use tokio_util::sync::CancellationToken;
use tracing::Level;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Scheduler double that schedules everything as requested.
#[derive(Debug, Default)]
pub struct AcceptAllScheduler;

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

/// In-process gateway server double.
pub struct TestServer {
    pub frequency_plan: Arc<FrequencyPlan>,
    pub with_scheduler: bool,
    pub reject_unknown: bool,
    pub connections: Mutex<Vec<Arc<Connection>>>,
}

impl Default for TestServer {
    fn default() -> Self {
        Self {
            frequency_plan: Arc::new(FrequencyPlan::eu868()),
            with_scheduler: true,
            reject_unknown: false,
            connections: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GatewayServer for TestServer {
    async fn fill_gateway_context(&self, ids: GatewayIds) -> GwResult<GatewayIds> {
        if self.reject_unknown {
            return Err(GwError::NotFound(ids.gateway_id));
        }
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
        let scheduler: Option<Arc<dyn Scheduler>> = if self.with_scheduler {
            Some(Arc::new(AcceptAllScheduler))
        } else {
            None
        };
        let conn = Connection::new(
            CancellationToken::new(),
            frontend,
            gateway,
            Arc::clone(&self.frequency_plan),
            scheduler,
        );
        self.connections.lock().unwrap().push(Arc::clone(&conn));
        Ok(conn)
    }

    async fn frequency_plan(&self, _ids: &GatewayIds) -> GwResult<Arc<FrequencyPlan>> {
        Ok(Arc::clone(&self.frequency_plan))
    }

    async fn claim_downlink(&self, _ids: &GatewayIds) -> GwResult<()> {
        Ok(())
    }

    async fn unclaim_downlink(&self, _ids: &GatewayIds) -> GwResult<()> {
        Ok(())
    }

    fn rate_limiter(&self) -> Arc<dyn RateLimiter> {
        Arc::new(NoopRateLimiter)
    }
}
