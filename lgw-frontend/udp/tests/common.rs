use async_trait::async_trait;
use lgw_core::{Connection, Frontend, GatewayServer, NoopRateLimiter, RateLimiter, Scheduler};
use lgw_error::{GwError, GwResult};
use lgw_models::{Antenna, FrequencyPlan, Gateway, GatewayIds};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, Once},
};
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

/// In-process gateway server double recording connects and downlink claims.
pub struct TestServer {
    pub frequency_plan: Arc<FrequencyPlan>,
    pub schedule_downlink_late: bool,
    pub scheduler: Option<Arc<dyn Scheduler>>,
    pub connections: Mutex<Vec<Arc<Connection>>>,
    pub claims: Mutex<HashSet<String>>,
    pub fail_claims: bool,
}

impl Default for TestServer {
    fn default() -> Self {
        Self {
            frequency_plan: Arc::new(FrequencyPlan::eu868()),
            schedule_downlink_late: false,
            scheduler: None,
            connections: Mutex::new(Vec::new()),
            claims: Mutex::new(HashSet::new()),
            fail_claims: false,
        }
    }
}

impl TestServer {
    pub fn last_connection(&self) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().last().cloned()
    }

    /// Waits until at least one connection exists, with a 2 s deadline.
    pub async fn wait_for_connection(&self) -> Arc<Connection> {
        for _ in 0..200 {
            if let Some(conn) = self.last_connection() {
                return conn;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("no gateway connected within deadline");
    }

    pub fn has_downlink_claim(&self, ids: &GatewayIds) -> bool {
        self.claims.lock().unwrap().contains(&ids.gateway_id)
    }
}

#[async_trait]
impl GatewayServer for TestServer {
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
            schedule_downlink_late: self.schedule_downlink_late,
        });
        let conn = Connection::new(
            CancellationToken::new(),
            frontend,
            gateway,
            Arc::clone(&self.frequency_plan),
            self.scheduler.clone(),
        );
        self.connections.lock().unwrap().push(Arc::clone(&conn));
        Ok(conn)
    }

    async fn frequency_plan(&self, _ids: &GatewayIds) -> GwResult<Arc<FrequencyPlan>> {
        Ok(Arc::clone(&self.frequency_plan))
    }

    async fn claim_downlink(&self, ids: &GatewayIds) -> GwResult<()> {
        if self.fail_claims {
            return Err(GwError::Msg("claiming disabled".to_string()));
        }
        self.claims.lock().unwrap().insert(ids.gateway_id.clone());
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
