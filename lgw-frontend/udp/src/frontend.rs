use crate::{
    config::UdpConfig,
    firewall::{AddrChangeFirewall, Firewall, NoopFirewall, RateLimitingFirewall},
    packets::{Packet, PacketData, PacketType, PullRespPayload, TxAckPayload},
    translate,
};
use arc_swap::ArcSwapOption;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use lgw_core::{Connection, Frontend, GatewayServer, IoCounters};
use lgw_error::{GwError, GwResult};
use lgw_models::{DownlinkMessage, DownlinkSettings, Eui64, GatewayIds, TxAcknowledgment};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch, Mutex},
    time::{interval, Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 65_536;
const DROP_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Last known downlink return path of a gateway.
#[derive(Debug, Clone, Copy)]
struct DownlinkPathInfo {
    addr: SocketAddr,
    protocol_version: u8,
}

/// Connection slot of one gateway EUI, driven through a watch channel so
/// concurrent packet handlers do not stampede the server's connect path.
#[derive(Clone, Default)]
enum IoSlot {
    #[default]
    Empty,
    Pending,
    Ready(Arc<Connection>),
    Failed {
        error: Arc<str>,
        at: Instant,
    },
}

/// Per-EUI state of the UDP frontend.
struct UdpState {
    eui: Eui64,
    last_seen_pull: AtomicI64,
    last_seen_push: AtomicI64,
    /// Sticky: set on the first TX_ACK of this state, never cleared. Its
    /// presence enables just-in-time downlink dispatch.
    received_tx_ack: AtomicBool,
    last_downlink_path: ArcSwapOption<DownlinkPathInfo>,
    io_tx: watch::Sender<IoSlot>,
    connecting: AtomicBool,
    /// Resettable guard for the downlink dispatcher; a fresh PULL_DATA may
    /// restart it after a downlink-path expiry.
    dispatcher_running: AtomicBool,
    /// The downlink receiver is parked here between dispatcher runs.
    down_rx: Mutex<Option<mpsc::Receiver<DownlinkMessage>>>,
    /// Joined by the garbage collector before eviction.
    tasks: TaskTracker,
}

impl UdpState {
    fn new(eui: Eui64) -> Self {
        let (io_tx, _) = watch::channel(IoSlot::Empty);
        Self {
            eui,
            last_seen_pull: AtomicI64::new(0),
            last_seen_push: AtomicI64::new(now_ns()),
            received_tx_ack: AtomicBool::new(false),
            last_downlink_path: ArcSwapOption::empty(),
            io_tx,
            connecting: AtomicBool::new(false),
            dispatcher_running: AtomicBool::new(false),
            down_rx: Mutex::new(None),
            tasks: TaskTracker::new(),
        }
    }

    #[inline]
    fn last_seen(&self) -> i64 {
        self.last_seen_pull
            .load(Ordering::Relaxed)
            .max(self.last_seen_push.load(Ordering::Relaxed))
    }
}

#[inline]
fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Rate limiter for repetitive drop logs.
#[derive(Debug, Default)]
struct LogThrottle {
    last: AtomicI64,
}

impl LogThrottle {
    fn allow(&self, interval: Duration) -> bool {
        let now = now_ns();
        let last = self.last.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval.as_nanos() as i64 {
            return false;
        }
        self.last
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

/// The Semtech UDP frontend.
pub struct UdpFrontend {
    server: Arc<dyn GatewayServer>,
    config: UdpConfig,
    socket: Arc<UdpSocket>,
    firewall: Arc<dyn Firewall>,
    counters: Arc<IoCounters>,
    cancel: CancellationToken,
    connections: DashMap<Eui64, Arc<UdpState>>,
    drop_log: LogThrottle,
}

impl Frontend for UdpFrontend {
    fn protocol(&self) -> &'static str {
        "udp"
    }

    fn supports_downlink_claim(&self) -> bool {
        true
    }
}

/// Serves the Semtech UDP protocol on `socket` until `cancel` fires.
pub async fn serve(
    server: Arc<dyn GatewayServer>,
    socket: UdpSocket,
    config: UdpConfig,
    counters: Arc<IoCounters>,
    cancel: CancellationToken,
) -> GwResult<()> {
    let firewall: Arc<dyn Firewall> = {
        let base: Box<dyn Firewall> = match config.addr_change_block {
            Some(block) if !block.is_zero() => Box::new(AddrChangeFirewall::new(block)),
            _ => Box::new(NoopFirewall),
        };
        if config.rate_limiting.enable {
            Arc::new(RateLimitingFirewall::wrap(
                base,
                config.rate_limiting.messages,
                config.rate_limiting.threshold,
            ))
        } else {
            Arc::from(base)
        }
    };

    let frontend = Arc::new(UdpFrontend {
        server,
        config,
        socket: Arc::new(socket),
        firewall,
        counters,
        cancel,
        connections: DashMap::new(),
        drop_log: LogThrottle::default(),
    });
    info!(addr = %frontend.socket.local_addr()?, "serving Semtech UDP");

    let tasks = TaskTracker::new();

    // Worker pool: the read loop never blocks on packet handling.
    let (work_tx, work_rx) =
        mpsc::channel::<(Packet, SocketAddr)>(frontend.config.packet_buffer.max(1));
    let work_rx = Arc::new(Mutex::new(work_rx));
    for _ in 0..frontend.config.packet_handlers.max(1) {
        let frontend = Arc::clone(&frontend);
        let work_rx = Arc::clone(&work_rx);
        tasks.spawn(async move {
            loop {
                let item = {
                    let mut rx = work_rx.lock().await;
                    tokio::select! {
                        _ = frontend.cancel.cancelled() => None,
                        item = rx.recv() => item,
                    }
                };
                match item {
                    Some((packet, addr)) => {
                        // A panic while handling one gateway's packet must
                        // not shrink the pool or reach other gateways.
                        let handled = std::panic::AssertUnwindSafe(
                            frontend.handle_packet(packet, addr),
                        )
                        .catch_unwind()
                        .await;
                        if handled.is_err() {
                            warn!(%addr, "packet handler panicked");
                        }
                    }
                    None => break,
                }
            }
        });
    }

    tasks.spawn(Arc::clone(&frontend).gc_task());
    tasks.spawn(Arc::clone(&frontend).firewall_sweep_task());

    frontend.read_loop(work_tx).await;

    // Drain: disconnect every gateway and join their tasks.
    tasks.close();
    let states: Vec<Arc<UdpState>> = frontend
        .connections
        .iter()
        .map(|e| Arc::clone(e.value()))
        .collect();
    for state in states {
        if let IoSlot::Ready(conn) = &*state.io_tx.borrow() {
            conn.disconnect(GwError::Disconnected("frontend shutting down".to_string()));
        }
        state.tasks.close();
        state.tasks.wait().await;
    }
    tasks.wait().await;
    Ok(())
}

impl UdpFrontend {
    /// Blocking socket read loop; applies the per-source-IP rate limit and
    /// hands decodable packets to the worker pool.
    async fn read_loop(self: &Arc<Self>, work_tx: mpsc::Sender<(Packet, SocketAddr)>) {
        let rate_limiter = self.server.rate_limiter();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let (len, addr) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(error = %e, "UDP read failed");
                        continue;
                    }
                },
            };
            if !rate_limiter.allow("gs:accept:udp", &addr.ip().to_string()) {
                IoCounters::incr(&self.counters.rate_limited);
                if self.drop_log.allow(DROP_LOG_INTERVAL) {
                    warn!(%addr, "source IP rate limited");
                }
                continue;
            }
            let packet = match Packet::unmarshal(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(%addr, error = %e, "failed to unmarshal packet");
                    continue;
                }
            };
            match packet.packet_type() {
                PacketType::PushData | PacketType::PullData | PacketType::TxAck => {}
                other => {
                    debug!(%addr, packet_type = %other, "dropping unexpected packet type");
                    continue;
                }
            }
            if packet.eui().is_none() {
                debug!(%addr, "dropping packet without gateway EUI");
                continue;
            }
            if work_tx.try_send((packet, addr)).is_err() && self.drop_log.allow(DROP_LOG_INTERVAL)
            {
                warn!(%addr, "packet handler queue full; dropping packet");
            }
        }
    }

    async fn handle_packet(self: &Arc<Self>, packet: Packet, addr: SocketAddr) {
        // Acknowledge first, best-effort; the ACK is never held back.
        if let Some(ack) = packet.ack() {
            match ack.marshal() {
                Ok(raw) => {
                    if let Err(e) = self.socket.send_to(&raw, addr).await {
                        warn!(%addr, error = %e, "failed to write acknowledgement");
                    }
                }
                Err(e) => warn!(error = %e, "failed to marshal acknowledgement"),
            }
        }

        let eui = match packet.eui() {
            Some(eui) => eui,
            None => return,
        };
        if let Err(e) = self.firewall.filter(eui, packet.packet_type(), addr) {
            match e {
                GwError::RateExceeded => IoCounters::incr(&self.counters.rate_limited),
                _ => IoCounters::incr(&self.counters.firewall_drops),
            }
            if self.drop_log.allow(DROP_LOG_INTERVAL) {
                warn!(%eui, %addr, error = %e, "firewall dropped packet");
            }
            return;
        }

        let (state, conn) = match self.connection(eui).await {
            Ok(ok) => ok,
            Err(e) => {
                if self.drop_log.allow(DROP_LOG_INTERVAL) {
                    warn!(%eui, %addr, error = %e, "failed to connect gateway");
                }
                return;
            }
        };

        match packet.data {
            PacketData::PullData { .. } => {
                state.last_seen_pull.store(now_ns(), Ordering::Relaxed);
                state.last_downlink_path.store(Some(Arc::new(DownlinkPathInfo {
                    addr,
                    protocol_version: packet.protocol_version,
                })));
                self.start_downlink_dispatcher(&state, &conn);
            }
            PacketData::PushData { payload, .. } => {
                state.last_seen_push.store(now_ns(), Ordering::Relaxed);
                let received_at = Utc::now();
                if !payload.rxpk.is_empty() {
                    if let Some(max_tmst) = payload.rxpk.iter().map(|rx| rx.tmst).max() {
                        conn.sync_clock(max_tmst, received_at);
                    }
                    let band = match conn.frequency_plan().band() {
                        Ok(band) => band,
                        Err(e) => {
                            warn!(%eui, error = %e, "unknown band; dropping uplinks");
                            return;
                        }
                    };
                    let clock = conn.clock();
                    let ids = &conn.gateway().ids;
                    let mut uplinks = Vec::with_capacity(payload.rxpk.len());
                    for rx in &payload.rxpk {
                        IoCounters::incr(&self.counters.uplinks_received);
                        match translate::rx_to_uplink(rx, ids, band, &clock, received_at) {
                            Ok(up) => uplinks.push(up),
                            Err(e) => debug!(%eui, error = %e, "invalid rxpk"),
                        }
                    }
                    for up in translate::dedup_uplinks(uplinks) {
                        match conn.handle_up(up) {
                            Ok(()) => IoCounters::incr(&self.counters.uplinks_forwarded),
                            Err(e) => {
                                IoCounters::incr(&self.counters.uplinks_dropped);
                                debug!(%eui, error = %e, "failed to forward uplink");
                            }
                        }
                    }
                }
                if let Some(stat) = payload.stat {
                    IoCounters::incr(&self.counters.status_received);
                    if let Err(e) = conn.handle_status(translate::stat_to_status(&stat)) {
                        debug!(%eui, error = %e, "failed to forward status");
                    }
                }
            }
            PacketData::TxAck { payload, .. } => {
                state.last_seen_pull.store(now_ns(), Ordering::Relaxed);
                state.last_downlink_path.store(Some(Arc::new(DownlinkPathInfo {
                    addr,
                    protocol_version: packet.protocol_version,
                })));
                if !state.received_tx_ack.swap(true, Ordering::AcqRel) {
                    debug!(%eui, "gateway acknowledges downlinks; JIT dispatch enabled");
                }
                let now = Utc::now();
                let correlation_ids = match conn.tokens().get(packet.token, now) {
                    Some((cids, age)) => {
                        conn.rtt().record(age, now);
                        cids
                    }
                    None => {
                        debug!(%eui, token = packet.token, "TX_ACK token not found");
                        Vec::new()
                    }
                };
                let result = translate::tx_ack_result(
                    payload
                        .as_ref()
                        .and_then(|p: &TxAckPayload| p.txpk_ack.error.as_deref()),
                );
                IoCounters::incr(&self.counters.tx_acks_received);
                if let Err(e) = conn.handle_tx_ack(TxAcknowledgment {
                    correlation_ids,
                    result,
                }) {
                    debug!(%eui, error = %e, "failed to forward TX_ACK");
                }
            }
            _ => {}
        }
    }

    /// Resolves or establishes the connection for `eui`.
    ///
    /// The first caller wins a CAS election and performs
    /// `fill_gateway_context` + `connect`; losers wait on the watch channel.
    /// Connect errors are cached for `connection_error_expires` so concurrent
    /// callers do not stampede the server.
    async fn connection(self: &Arc<Self>, eui: Eui64) -> GwResult<(Arc<UdpState>, Arc<Connection>)> {
        let state = self
            .connections
            .entry(eui)
            .or_insert_with(|| Arc::new(UdpState::new(eui)))
            .clone();
        loop {
            let slot = state.io_tx.borrow().clone();
            match slot {
                IoSlot::Ready(conn) => {
                    if conn.is_disconnected() {
                        // Awaiting GC; do not resurrect the entry here.
                        return Err(GwError::ConnectionNotReady);
                    }
                    return Ok((state, conn));
                }
                IoSlot::Failed { error, at }
                    if at.elapsed() < self.config.connection_error_expires =>
                {
                    return Err(GwError::Msg(error.to_string()));
                }
                IoSlot::Empty | IoSlot::Failed { .. } => {
                    if state
                        .connecting
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        state.io_tx.send_replace(IoSlot::Pending);
                        let result = self.establish(eui).await;
                        let slot = match &result {
                            Ok(conn) => IoSlot::Ready(Arc::clone(conn)),
                            Err(e) => {
                                warn!(%eui, error = %e, "gateway connect failed");
                                IoSlot::Failed {
                                    error: Arc::from(e.to_string().as_str()),
                                    at: Instant::now(),
                                }
                            }
                        };
                        state.io_tx.send_replace(slot);
                        state.connecting.store(false, Ordering::Release);
                        return result.map(|conn| (state, conn));
                    }
                    tokio::task::yield_now().await;
                }
                IoSlot::Pending => {
                    let mut rx = state.io_tx.subscribe();
                    let _ = rx
                        .wait_for(|slot| !matches!(slot, IoSlot::Pending))
                        .await;
                }
            }
        }
    }

    async fn establish(self: &Arc<Self>, eui: Eui64) -> GwResult<Arc<Connection>> {
        let ids = self
            .server
            .fill_gateway_context(GatewayIds::from_eui(eui))
            .await?;
        let frontend: Arc<dyn Frontend> = Arc::clone(self) as Arc<dyn Frontend>;
        let conn = self.server.connect(frontend, &ids).await?;
        info!(%eui, gateway_id = %ids.gateway_id, "gateway connected");
        Ok(conn)
    }

    /// Starts the per-connection downlink dispatcher, at most one at a time.
    /// The guard resets when the dispatcher exits so a later PULL_DATA can
    /// start a fresh one.
    fn start_downlink_dispatcher(self: &Arc<Self>, state: &Arc<UdpState>, conn: &Arc<Connection>) {
        if state
            .dispatcher_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let frontend = Arc::clone(self);
        let state = Arc::clone(state);
        let conn = Arc::clone(conn);
        state.tasks.clone().spawn(async move {
            let eui = state.eui;
            match frontend.downlink_dispatch(&state, &conn).await {
                Ok(()) => debug!(%eui, "downlink dispatcher stopped"),
                Err(e) => match e {
                    GwError::DownlinkPathExpired => {
                        info!(%eui, "downlink path expired")
                    }
                    e => warn!(%eui, error = %e, "downlink dispatcher failed"),
                },
            }
            state.last_downlink_path.store(None);
            if let Err(e) = frontend.server.unclaim_downlink(&conn.gateway().ids).await {
                warn!(%eui, error = %e, "failed to unclaim downlink path");
            }
            state.dispatcher_running.store(false, Ordering::Release);
        });
    }

    async fn downlink_dispatch(
        self: &Arc<Self>,
        state: &Arc<UdpState>,
        conn: &Arc<Connection>,
    ) -> GwResult<()> {
        self.server
            .claim_downlink(&conn.gateway().ids)
            .await
            .map_err(|e| GwError::DownlinkClaim(e.to_string()))?;

        // Recover the receiver parked by a previous dispatcher run.
        let mut down_rx = {
            let mut parked = state.down_rx.lock().await;
            match parked.take().or_else(|| conn.take_down()) {
                Some(rx) => rx,
                None => return Err(GwError::Msg("downlink receiver unavailable".to_string())),
            }
        };

        let mut ticker = interval(self.config.downlink_path_expires / 2);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                _ = conn.disconnected() => break Ok(()),
                msg = down_rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.write_downlink(state, conn, msg).await {
                            if e.is_drop() {
                                warn!(eui = %state.eui, error = %e, "dropping downlink");
                            } else {
                                conn.disconnect(GwError::Msg(e.to_string()));
                                break Err(e);
                            }
                        }
                    }
                    None => break Ok(()),
                },
                _ = ticker.tick() => {
                    let idle = now_ns().saturating_sub(state.last_seen_pull.load(Ordering::Relaxed));
                    if idle > self.config.downlink_path_expires.as_nanos() as i64 {
                        break Err(GwError::DownlinkPathExpired);
                    }
                }
            }
        };
        *state.down_rx.lock().await = Some(down_rx);
        result
    }

    /// Writes one downlink, choosing between just-in-time and scheduled-late
    /// dispatch.
    async fn write_downlink(
        &self,
        state: &Arc<UdpState>,
        conn: &Arc<Connection>,
        msg: DownlinkMessage,
    ) -> GwResult<()> {
        let path = state
            .last_downlink_path
            .load_full()
            .ok_or(GwError::DownlinkPathExpired)?;

        let (txpk, timestamp) = match &msg.settings {
            DownlinkSettings::Scheduled(settings) => (
                translate::settings_to_txpk(settings, &msg.raw_payload),
                settings.timestamp,
            ),
            // Without a connection-owned scheduler, timing is delegated to
            // the gateway's own timestamping.
            DownlinkSettings::Request(_) => translate::request_to_txpk(&msg)?,
        };

        // A gateway that acknowledges downlinks has a JIT queue; hand over
        // immediately. Otherwise hold the downlink until shortly before its
        // TX time, provided the clock is synchronized.
        if !state.received_tx_ack.load(Ordering::Acquire) {
            let clock = conn.clock();
            let server_time = clock
                .from_timestamp(timestamp)
                .and_then(|conc| clock.to_server_time(conc));
            match server_time {
                Some(server_time) => {
                    let target = server_time
                        - chrono::Duration::from_std(self.config.schedule_late_time)
                            .unwrap_or_else(|_| chrono::Duration::milliseconds(800));
                    let delay = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    if !delay.is_zero() {
                        debug!(eui = %state.eui, delay_ms = delay.as_millis() as u64, "scheduling downlink late");
                        tokio::select! {
                            _ = conn.disconnected() => {
                                return Err(GwError::Disconnected("while waiting to send".to_string()))
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                None => {
                    if conn.gateway().schedule_downlink_late {
                        warn!(eui = %state.eui, "gateway prefers late scheduling but the clock is not synchronized; sending immediately");
                    }
                }
            }
        }

        // Stamp a fresh token so the TX_ACK correlates back.
        let token = conn.tokens().next(&msg.correlation_ids, Utc::now());
        let packet = Packet {
            protocol_version: path.protocol_version,
            token,
            data: PacketData::PullResp {
                payload: PullRespPayload { txpk },
            },
        };
        self.socket.send_to(&packet.marshal()?, path.addr).await?;
        IoCounters::incr(&self.counters.downlinks_sent);
        debug!(eui = %state.eui, token, timestamp, "downlink written");
        Ok(())
    }

    /// Evicts idle or externally disconnected gateways. The GC is the only
    /// path that removes map entries, and it joins the state's tasks first.
    async fn gc_task(self: Arc<Self>) {
        let mut ticker = interval(self.config.connection_expires / 2);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let snapshot: Vec<(Eui64, Arc<UdpState>)> = self
                .connections
                .iter()
                .map(|e| (*e.key(), Arc::clone(e.value())))
                .collect();
            for (eui, state) in snapshot {
                let slot = state.io_tx.borrow().clone();
                let evict = match slot {
                    IoSlot::Ready(conn) => {
                        if conn.is_disconnected() {
                            true
                        } else if now_ns().saturating_sub(state.last_seen())
                            > self.config.connection_expires.as_nanos() as i64
                        {
                            conn.disconnect(GwError::ConnectionExpired);
                            true
                        } else {
                            false
                        }
                    }
                    IoSlot::Failed { at, .. } => at.elapsed() >= self.config.connection_error_expires,
                    IoSlot::Empty | IoSlot::Pending => false,
                };
                if evict {
                    state.tasks.close();
                    state.tasks.wait().await;
                    self.connections.remove(&eui);
                    info!(%eui, "gateway state evicted");
                }
            }
        }
    }

    async fn firewall_sweep_task(self: Arc<Self>) {
        let period = self
            .config
            .addr_change_block
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(60));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.firewall.sweep(Instant::now()),
            }
        }
    }
}
