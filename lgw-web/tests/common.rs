use async_trait::async_trait;
use lgw_core::{Connection, Frontend, GatewayServer, NoopRateLimiter, RateLimiter};
use lgw_error::{GwError, GwResult};
use lgw_models::{Antenna, FrequencyPlan, Gateway, GatewayIds};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Gateway server double for the web endpoint tests.
pub struct TestServer {
    pub frequency_plan: Arc<FrequencyPlan>,
    pub known_gateway: Option<String>,
}

impl Default for TestServer {
    fn default() -> Self {
        Self {
            frequency_plan: Arc::new(FrequencyPlan::eu868()),
            known_gateway: None,
        }
    }
}

#[async_trait]
impl GatewayServer for TestServer {
    async fn fill_gateway_context(&self, ids: GatewayIds) -> GwResult<GatewayIds> {
        if let Some(known) = &self.known_gateway {
            if &ids.gateway_id != known {
                return Err(GwError::NotFound(ids.gateway_id));
            }
        }
        Ok(ids)
    }

    async fn authorize(&self, _ids: &GatewayIds, credentials: Option<&str>) -> GwResult<()> {
        match credentials {
            Some(_) => Ok(()),
            None => Err(GwError::NoAuthProvided),
        }
    }

    async fn connect(
        &self,
        frontend: Arc<dyn Frontend>,
        ids: &GatewayIds,
    ) -> GwResult<Arc<Connection>> {
        Ok(Connection::new(
            CancellationToken::new(),
            frontend,
            Arc::new(Gateway {
                ids: ids.clone(),
                antennas: vec![Antenna { gain: 0.0 }],
                frequency_plan_id: self.frequency_plan.id.clone(),
                schedule_downlink_late: false,
            }),
            Arc::clone(&self.frequency_plan),
            None,
        ))
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
