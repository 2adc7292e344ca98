use async_trait::async_trait;
use lgw_core::{Connection, Frontend, Scheduler};
use lgw_error::{GwError, GwResult};
use lgw_models::{Antenna, FrequencyPlan, Gateway, GatewayIds, TxSettings};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Once,
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

#[derive(Debug)]
pub struct TestFrontend;

impl Frontend for TestFrontend {
    fn protocol(&self) -> &'static str {
        "test"
    }

    fn supports_downlink_claim(&self) -> bool {
        false
    }
}

/// Scheduler double that accepts or rejects everything and counts calls.
#[derive(Debug, Default)]
pub struct TestScheduler {
    pub reject: bool,
    pub at_calls: AtomicUsize,
    pub anytime_calls: AtomicUsize,
}

#[async_trait]
impl Scheduler for TestScheduler {
    async fn schedule_at(&self, settings: TxSettings, _payload_len: usize) -> GwResult<TxSettings> {
        self.at_calls.fetch_add(1, Ordering::Relaxed);
        if self.reject {
            return Err(GwError::Msg("schedule conflict".to_string()));
        }
        Ok(settings)
    }

    async fn schedule_anytime(
        &self,
        mut settings: TxSettings,
        _payload_len: usize,
    ) -> GwResult<TxSettings> {
        self.anytime_calls.fetch_add(1, Ordering::Relaxed);
        if self.reject {
            return Err(GwError::Msg("schedule conflict".to_string()));
        }
        // Earliest available slot for a gateway without pending downlinks.
        settings.timestamp = 5_000_000;
        Ok(settings)
    }
}

pub fn test_gateway(antenna_gain: f32, schedule_downlink_late: bool) -> Arc<Gateway> {
    Arc::new(Gateway {
        ids: GatewayIds {
            gateway_id: "test-gateway".to_string(),
            eui: Some("1122334455667788".parse().unwrap()),
        },
        antennas: vec![Antenna { gain: antenna_gain }],
        frequency_plan_id: "EU_863_870".to_string(),
        schedule_downlink_late,
    })
}

pub fn test_connection(
    gateway: Arc<Gateway>,
    scheduler: Option<Arc<dyn Scheduler>>,
) -> Arc<Connection> {
    Connection::new(
        CancellationToken::new(),
        Arc::new(TestFrontend),
        gateway,
        Arc::new(FrequencyPlan::eu868()),
        scheduler,
    )
}
