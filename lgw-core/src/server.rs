use crate::Connection;
use async_trait::async_trait;
use lgw_error::GwResult;
use lgw_models::{FrequencyPlan, GatewayIds, TxSettings};
use std::sync::Arc;

/// A protocol frontend, as seen by the server and its connections.
pub trait Frontend: Send + Sync + 'static {
    /// Free-form protocol tag, e.g. `"udp"` or `"basicstation"`.
    fn protocol(&self) -> &'static str;

    /// Whether this frontend claims the downlink path for its gateways.
    fn supports_downlink_claim(&self) -> bool;
}

/// Narrow view of the upstream server consumed by the frontends.
///
/// The server owns routing, authorization, frequency plans and downlink path
/// claims; connections hold only this interface so server and connection do
/// not keep strong cycles.
#[async_trait]
pub trait GatewayServer: Send + Sync + 'static {
    /// Resolves and completes gateway identifiers, minting a synthetic id
    /// from the EUI when the gateway is not registered.
    async fn fill_gateway_context(&self, ids: GatewayIds) -> GwResult<GatewayIds>;

    /// Checks the gateway's link rights for the presented credentials.
    async fn authorize(&self, ids: &GatewayIds, credentials: Option<&str>) -> GwResult<()>;

    /// Establishes a connection for the gateway on behalf of `frontend`.
    async fn connect(
        &self,
        frontend: Arc<dyn Frontend>,
        ids: &GatewayIds,
    ) -> GwResult<Arc<Connection>>;

    /// The frequency plan the gateway operates under.
    async fn frequency_plan(&self, ids: &GatewayIds) -> GwResult<Arc<FrequencyPlan>>;

    /// Claims the downlink path for the gateway.
    async fn claim_downlink(&self, ids: &GatewayIds) -> GwResult<()>;

    /// Releases a previously claimed downlink path.
    async fn unclaim_downlink(&self, ids: &GatewayIds) -> GwResult<()>;

    /// The process-wide rate limiter registry.
    fn rate_limiter(&self) -> Arc<dyn RateLimiter>;
}

/// Process-wide rate limiting by resource class and key.
pub trait RateLimiter: Send + Sync + 'static {
    /// Returns `true` when the event is within the limit for
    /// `(class, key)`, e.g. `("gs:accept:udp", "203.0.113.1")`.
    fn allow(&self, class: &str, key: &str) -> bool;
}

/// A rate limiter that never limits; the default for tests and for servers
/// without a configured registry.
#[derive(Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    #[inline]
    fn allow(&self, _class: &str, _key: &str) -> bool {
        true
    }
}

/// Downlink scheduler owned by a connection.
///
/// Turns tentative TX settings into a conflict-free transmission slot; the
/// implementation lives upstream with the duty-cycle and time-on-air
/// accounting.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Schedules a transmission at the settings' timestamp, adjusting them
    /// if needed. Errors indicate a conflict or regulatory violation.
    async fn schedule_at(&self, settings: TxSettings, payload_len: usize)
        -> GwResult<TxSettings>;

    /// Schedules a transmission at the earliest available slot.
    async fn schedule_anytime(
        &self,
        settings: TxSettings,
        payload_len: usize,
    ) -> GwResult<TxSettings>;
}
