use crate::{
    clock::RolloverClock,
    rtt::{RttSampler, RttStats},
    server::{Frontend, Scheduler},
    tokens::DownlinkTokens,
    uplink_token::parse_uplink_token,
    BUFFER_SIZE,
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeZone, Utc};
use lgw_error::{GwError, GwResult};
use lgw_models::{
    DeviceClass, DownlinkMessage, DownlinkPath, DownlinkSettings, FrequencyPlan, Gateway,
    GatewayStatus, TxAcknowledgment, TxSettings, UplinkMessage,
};
use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Snapshot of a connection's monotonically increasing statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub uplink_count: u64,
    pub downlink_count: u64,
    pub tx_ack_count: u64,
    pub last_uplink: Option<DateTime<Utc>>,
    pub last_downlink: Option<DateTime<Utc>>,
    pub last_status: Option<DateTime<Utc>>,
    pub received_tx_ack: bool,
    pub round_trip_times: Option<RttStats>,
}

/// A long-lived bidirectional link with one gateway.
///
/// The frontend is the only writer of the uplink-direction channels and the
/// north consumer their only reader; the downlink channel flows the other way.
/// All sends are non-blocking: when the peer is slow the message is dropped
/// with [`GwError::BufferFull`] and the connection stays up.
pub struct Connection {
    cancel: CancellationToken,
    disconnect_reason: ArcSwapOption<GwError>,

    frontend: Arc<dyn Frontend>,
    gateway: Arc<Gateway>,
    frequency_plan: Arc<FrequencyPlan>,
    scheduler: Option<Arc<dyn Scheduler>>,

    up_tx: mpsc::Sender<UplinkMessage>,
    up_rx: Mutex<Option<mpsc::Receiver<UplinkMessage>>>,
    status_tx: mpsc::Sender<GatewayStatus>,
    status_rx: Mutex<Option<mpsc::Receiver<GatewayStatus>>>,
    tx_ack_tx: mpsc::Sender<TxAcknowledgment>,
    tx_ack_rx: Mutex<Option<mpsc::Receiver<TxAcknowledgment>>>,
    down_tx: mpsc::Sender<DownlinkMessage>,
    down_rx: Mutex<Option<mpsc::Receiver<DownlinkMessage>>>,

    uplink_count: AtomicU64,
    downlink_count: AtomicU64,
    tx_ack_count: AtomicU64,
    last_uplink_ns: AtomicI64,
    last_downlink_ns: AtomicI64,
    last_status_ns: AtomicI64,
    received_tx_ack: AtomicBool,
    last_status: ArcSwapOption<GatewayStatus>,

    tokens: DownlinkTokens,
    clock: RwLock<RolloverClock>,
    rtt: RttSampler,
}

impl Connection {
    pub fn new(
        cancel: CancellationToken,
        frontend: Arc<dyn Frontend>,
        gateway: Arc<Gateway>,
        frequency_plan: Arc<FrequencyPlan>,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Arc<Self> {
        let (up_tx, up_rx) = mpsc::channel(BUFFER_SIZE);
        let (status_tx, status_rx) = mpsc::channel(BUFFER_SIZE);
        let (tx_ack_tx, tx_ack_rx) = mpsc::channel(BUFFER_SIZE);
        let (down_tx, down_rx) = mpsc::channel(BUFFER_SIZE);
        Arc::new(Self {
            cancel,
            disconnect_reason: ArcSwapOption::empty(),
            frontend,
            gateway,
            frequency_plan,
            scheduler,
            up_tx,
            up_rx: Mutex::new(Some(up_rx)),
            status_tx,
            status_rx: Mutex::new(Some(status_rx)),
            tx_ack_tx,
            tx_ack_rx: Mutex::new(Some(tx_ack_rx)),
            down_tx,
            down_rx: Mutex::new(Some(down_rx)),
            uplink_count: AtomicU64::new(0),
            downlink_count: AtomicU64::new(0),
            tx_ack_count: AtomicU64::new(0),
            last_uplink_ns: AtomicI64::new(0),
            last_downlink_ns: AtomicI64::new(0),
            last_status_ns: AtomicI64::new(0),
            received_tx_ack: AtomicBool::new(false),
            last_status: ArcSwapOption::empty(),
            tokens: DownlinkTokens::new(),
            clock: RwLock::new(RolloverClock::new()),
            rtt: RttSampler::default(),
        })
    }

    #[inline]
    pub fn frontend(&self) -> &Arc<dyn Frontend> {
        &self.frontend
    }

    #[inline]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    #[inline]
    pub fn frequency_plan(&self) -> &Arc<FrequencyPlan> {
        &self.frequency_plan
    }

    #[inline]
    pub fn tokens(&self) -> &DownlinkTokens {
        &self.tokens
    }

    #[inline]
    pub fn rtt(&self) -> &RttSampler {
        &self.rtt
    }

    /// Enqueues a normalized uplink for the north consumer.
    pub fn handle_up(&self, msg: UplinkMessage) -> GwResult<()> {
        self.ensure_alive()?;
        if let Some(time) = msg.settings.time {
            self.sync_clock_with_gateway_time(msg.settings.timestamp, msg.received_at, time);
        }
        try_send(&self.up_tx, msg, "up")?;
        self.uplink_count.fetch_add(1, Ordering::Relaxed);
        self.last_uplink_ns
            .store(Utc::now().timestamp_nanos_opt().unwrap_or(0), Ordering::Relaxed);
        Ok(())
    }

    /// Enqueues a status report and retains it as the latest snapshot.
    pub fn handle_status(&self, status: GatewayStatus) -> GwResult<()> {
        self.ensure_alive()?;
        self.last_status.store(Some(Arc::new(status.clone())));
        try_send(&self.status_tx, status, "status")?;
        self.last_status_ns
            .store(Utc::now().timestamp_nanos_opt().unwrap_or(0), Ordering::Relaxed);
        Ok(())
    }

    /// Enqueues a downlink transmission acknowledgement.
    pub fn handle_tx_ack(&self, ack: TxAcknowledgment) -> GwResult<()> {
        self.ensure_alive()?;
        try_send(&self.tx_ack_tx, ack, "txack")?;
        self.tx_ack_count.fetch_add(1, Ordering::Relaxed);
        self.received_tx_ack.store(true, Ordering::Release);
        Ok(())
    }

    /// Sends a downlink towards the gateway.
    ///
    /// When this connection owns a scheduler the message must carry a
    /// `TxRequest`, which is resolved against the RX windows into concrete
    /// `TxSettings` before it is enqueued; otherwise it is forwarded
    /// unchanged and the frontend schedules against the gateway's own
    /// timestamping.
    pub async fn send_down(&self, mut msg: DownlinkMessage) -> GwResult<()> {
        self.ensure_alive()?;
        if let Some(scheduler) = self.scheduler.clone() {
            let request = match &msg.settings {
                DownlinkSettings::Request(r) => r.clone(),
                DownlinkSettings::Scheduled(_) => return Err(GwError::NotTxRequest),
            };
            let settings = self.schedule_request(&request, msg.raw_payload.len(), scheduler).await?;
            msg.settings = DownlinkSettings::Scheduled(settings);
        }
        try_send(&self.down_tx, msg, "down")?;
        self.downlink_count.fetch_add(1, Ordering::Relaxed);
        self.last_downlink_ns
            .store(Utc::now().timestamp_nanos_opt().unwrap_or(0), Ordering::Relaxed);
        Ok(())
    }

    /// Resolves a `TxRequest` against both RX windows; the first window that
    /// schedules successfully wins.
    async fn schedule_request(
        &self,
        request: &lgw_models::TxRequest,
        payload_len: usize,
        scheduler: Arc<dyn Scheduler>,
    ) -> GwResult<TxSettings> {
        if request.downlink_paths.len() != 1 {
            return Err(GwError::DownlinkPath(format!(
                "expected exactly one downlink path, got {}",
                request.downlink_paths.len()
            )));
        }
        let (antenna_index, uplink_timestamp, uplink_concentrator_time) =
            match &request.downlink_paths[0] {
                DownlinkPath::UplinkToken(token) => {
                    let token = parse_uplink_token(token)
                        .map_err(|e| GwError::DownlinkPath(e.to_string()))?;
                    (
                        token.antenna_index,
                        Some(token.timestamp),
                        Some(token.concentrator_time),
                    )
                }
                DownlinkPath::Fixed { antenna_index, .. } => {
                    if request.absolute_time.is_none()
                        && matches!(request.class, DeviceClass::A)
                    {
                        return Err(GwError::DownlinkPath(
                            "class A downlink on a fixed path requires an absolute time"
                                .to_string(),
                        ));
                    }
                    (*antenna_index, None, None)
                }
            };

        let band = self.frequency_plan.band()?;
        let windows = [
            (
                1u8,
                request.rx1_data_rate_index,
                request.rx1_frequency,
                request.rx1_delay as u64,
            ),
            (
                2u8,
                request.rx2_data_rate_index,
                request.rx2_frequency,
                request.rx1_delay as u64 + 1,
            ),
        ];

        let mut rx_errors: Vec<GwError> = Vec::new();
        for (rx, data_rate_index, frequency, delay_secs) in windows {
            if frequency == 0 {
                rx_errors.push(GwError::RxEmpty(rx));
                continue;
            }
            let data_rate = match band.data_rate(data_rate_index) {
                Some(dr) => dr,
                None => {
                    rx_errors.push(GwError::DataRate(data_rate_index));
                    continue;
                }
            };
            if self
                .frequency_plan
                .find_downlink_channel(frequency, data_rate_index)
                .is_none()
            {
                rx_errors.push(GwError::DownlinkChannel {
                    frequency,
                    data_rate_index,
                });
                continue;
            }
            let power = self.frequency_plan.max_eirp_at(frequency, band)
                - self.gateway.antenna_gain(antenna_index as usize);
            let is_lora = data_rate.is_lora();
            let settings = TxSettings {
                data_rate,
                frequency,
                power,
                timestamp: 0,
                concentrator_time: None,
                time: None,
                antenna_index,
                invert_polarization: is_lora,
                coding_rate: if is_lora { "4/5".to_string() } else { String::new() },
            };
            let delay_us = delay_secs * 1_000_000;
            let attempt = match (request.absolute_time, uplink_timestamp) {
                (Some(time), _) => {
                    let mut s = settings;
                    s.time = Some(time);
                    scheduler.schedule_at(s, payload_len).await
                }
                (None, Some(up_timestamp)) => {
                    let mut s = settings;
                    s.timestamp = up_timestamp.wrapping_add(delay_us as u32);
                    s.concentrator_time = uplink_concentrator_time.map(|c| c + delay_us);
                    scheduler.schedule_at(s, payload_len).await
                }
                (None, None) => scheduler.schedule_anytime(settings, payload_len).await,
            };
            match attempt {
                Ok(s) => return Ok(s),
                Err(e) => rx_errors.push(e),
            }
        }
        Err(GwError::TxSchedule(rx_errors))
    }

    /// Takes the uplink receiver; the north consumer calls this once.
    pub fn take_up(&self) -> Option<mpsc::Receiver<UplinkMessage>> {
        self.up_rx.lock().unwrap().take()
    }

    pub fn take_status(&self) -> Option<mpsc::Receiver<GatewayStatus>> {
        self.status_rx.lock().unwrap().take()
    }

    pub fn take_tx_ack(&self) -> Option<mpsc::Receiver<TxAcknowledgment>> {
        self.tx_ack_rx.lock().unwrap().take()
    }

    /// Takes the downlink receiver; the frontend's dispatcher calls this
    /// once.
    pub fn take_down(&self) -> Option<mpsc::Receiver<DownlinkMessage>> {
        self.down_rx.lock().unwrap().take()
    }

    /// Cancels the connection context, recording `err` as the cause.
    /// Idempotent: only the first cause is retained.
    pub fn disconnect(&self, err: GwError) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!(gateway_id = %self.gateway.ids.gateway_id, reason = %err, "disconnecting");
        if self.disconnect_reason.load().is_none() {
            self.disconnect_reason.store(Some(Arc::new(err)));
        }
        self.cancel.cancel();
    }

    /// Resolves when the connection is disconnected.
    pub async fn disconnected(&self) {
        self.cancel.cancelled().await;
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cause passed to [`Connection::disconnect`], if any.
    pub fn disconnect_reason(&self) -> Option<Arc<GwError>> {
        self.disconnect_reason.load_full()
    }

    /// A child token bounded by this connection's lifetime, for per-task use.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Synchronizes the concentrator clock with an observed timestamp.
    pub fn sync_clock(&self, timestamp: u32, server_time: DateTime<Utc>) {
        self.clock.write().unwrap().sync(timestamp, server_time);
    }

    pub fn sync_clock_with_gateway_time(
        &self,
        timestamp: u32,
        server_time: DateTime<Utc>,
        gateway_time: DateTime<Utc>,
    ) {
        self.clock
            .write()
            .unwrap()
            .sync_with_gateway_time(timestamp, server_time, gateway_time);
    }

    /// A point-in-time copy of the concentrator clock.
    pub fn clock(&self) -> RolloverClock {
        self.clock.read().unwrap().clone()
    }

    /// The most recent status report, if any.
    pub fn last_status(&self) -> Option<Arc<GatewayStatus>> {
        self.last_status.load_full()
    }

    #[inline]
    pub fn received_tx_ack(&self) -> bool {
        self.received_tx_ack.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            uplink_count: self.uplink_count.load(Ordering::Relaxed),
            downlink_count: self.downlink_count.load(Ordering::Relaxed),
            tx_ack_count: self.tx_ack_count.load(Ordering::Relaxed),
            last_uplink: load_time(&self.last_uplink_ns),
            last_downlink: load_time(&self.last_downlink_ns),
            last_status: load_time(&self.last_status_ns),
            received_tx_ack: self.received_tx_ack(),
            round_trip_times: self.rtt.stats(crate::rtt::DEFAULT_COUNT, Utc::now()),
        }
    }

    #[inline]
    fn ensure_alive(&self) -> GwResult<()> {
        if self.cancel.is_cancelled() {
            let reason = self
                .disconnect_reason()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "context cancelled".to_string());
            return Err(GwError::Disconnected(reason));
        }
        Ok(())
    }
}

#[inline]
fn try_send<T>(tx: &mpsc::Sender<T>, msg: T, channel: &'static str) -> GwResult<()> {
    tx.try_send(msg).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => GwError::BufferFull(channel),
        mpsc::error::TrySendError::Closed(_) => {
            GwError::Disconnected(format!("`{channel}` receiver dropped"))
        }
    })
}

#[inline]
fn load_time(ns: &AtomicI64) -> Option<DateTime<Utc>> {
    let v = ns.load(Ordering::Relaxed);
    if v == 0 {
        return None;
    }
    Utc.timestamp_nanos(v).into()
}
