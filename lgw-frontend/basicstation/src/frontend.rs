use crate::{
    config::WsConfig,
    id6,
    messages::{
        DiscoverResponse, MessageType, TimeSyncRequest, TimeSyncResponse, TxConfirmation, Version,
        TYPE_JOIN_REQUEST, TYPE_PROP_DATA_FRAME, TYPE_REMOTE_SHELL, TYPE_TIME_SYNC,
        TYPE_TX_CONFIRMATION, TYPE_UPLINK_DATA_FRAME, TYPE_VERSION,
    },
    routerconf::build_router_config,
    translate,
};
use actix_web::{
    http::header::AUTHORIZATION, web, Error as ActixError, HttpRequest, HttpResponse,
};
use actix_ws::Message as WsMessage;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lgw_core::{Connection, Frontend, GatewayServer, IoCounters};
use lgw_error::{web::WebError, GwError, GwResult};
use lgw_models::{Band, DownlinkMessage, Eui64, FrequencyPlan, GatewayIds, TxAckResult, TxAcknowledgment};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, RwLock,
};
use tokio::{
    sync::{mpsc, Mutex},
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The LBS LNS frontend.
pub struct LbsFrontend {
    server: Arc<dyn GatewayServer>,
    config: WsConfig,
    counters: Arc<IoCounters>,
    cancel: CancellationToken,
}

impl Frontend for LbsFrontend {
    fn protocol(&self) -> &'static str {
        "basicstation"
    }

    fn supports_downlink_claim(&self) -> bool {
        true
    }
}

impl LbsFrontend {
    pub fn new(
        server: Arc<dyn GatewayServer>,
        config: WsConfig,
        counters: Arc<IoCounters>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            config,
            counters,
            cancel,
        })
    }

    #[inline]
    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

/// Registers `/router-info` and `/traffic/{id}` on an actix service config.
pub fn configure(frontend: Arc<LbsFrontend>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(frontend))
            .route("/router-info", web::get().to(router_info))
            .route("/traffic/{id}", web::get().to(traffic));
    }
}

#[inline]
fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + t.timestamp_subsec_micros() as f64 / 1e6
}

/// Answers one discovery query frame.
pub async fn discover_response(
    frontend: &LbsFrontend,
    text: &str,
    host: &str,
) -> DiscoverResponse {
    let error = |msg: &str| DiscoverResponse {
        error: Some(msg.to_string()),
        ..Default::default()
    };
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(_) => return error("Invalid request"),
    };
    let (prefix, eui) = match &raw["router"] {
        serde_json::Value::String(s) => match id6::parse(s) {
            Ok(parsed) => parsed,
            Err(_) => return error("Invalid request"),
        },
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(v) if v > 0 => (None, Eui64::from_u64(v)),
            _ => return error("Invalid request"),
        },
        _ => return error("Invalid request"),
    };
    if eui.is_zero() {
        return error("Invalid request");
    }
    if let Err(e) = frontend
        .server
        .fill_gateway_context(GatewayIds::from_eui(eui))
        .await
    {
        debug!(%eui, error = %e, "discovery failed");
        return error("Router not provisioned");
    }
    let scheme = if frontend.config.use_traffic_tls_address {
        "wss"
    } else {
        "ws"
    };
    let router = match prefix {
        Some(prefix) => id6::format_with_prefix(&prefix, eui),
        None => id6::format(eui),
    };
    DiscoverResponse {
        router: Some(router),
        muxs: Some(id6::format_with_prefix("muxs", Eui64::default())),
        uri: Some(format!("{scheme}://{host}/traffic/eui-{eui}")),
        error: None,
    }
}

async fn router_info(
    req: HttpRequest,
    body: web::Payload,
    data: web::Data<Arc<LbsFrontend>>,
) -> Result<HttpResponse, ActixError> {
    let (res, mut session, mut stream) = actix_ws::handle(&req, body)?;
    let frontend = data.get_ref().clone();
    let host = req.connection_info().host().to_string();
    actix_web::rt::spawn(async move {
        let text = tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => None,
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => Some(text.to_string()),
                _ => None,
            },
        };
        let response = match text {
            Some(text) => discover_response(&frontend, &text, &host).await,
            None => DiscoverResponse {
                error: Some("Invalid request".to_string()),
                ..Default::default()
            },
        };
        if let Ok(json) = serde_json::to_string(&response) {
            let _ = session.text(json).await;
        }
        let _ = session.close(None).await;
    });
    Ok(res)
}

/// Parses a traffic endpoint id of the form `eui-<16 hex>`.
pub fn parse_traffic_id(id: &str) -> GwResult<Eui64> {
    let hex = id
        .strip_prefix("eui-")
        .ok_or_else(|| GwError::InvalidGatewayId(id.to_string()))?;
    if hex.len() != 16 {
        return Err(GwError::InvalidGatewayId(id.to_string()));
    }
    hex.parse()
        .map_err(|_| GwError::InvalidGatewayId(id.to_string()))
}

async fn traffic(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    data: web::Data<Arc<LbsFrontend>>,
) -> Result<HttpResponse, ActixError> {
    let frontend = data.get_ref().clone();
    let eui = parse_traffic_id(&path.into_inner()).map_err(WebError::from)?;

    let credentials = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_string());
    if credentials.is_none() && !frontend.config.allow_unauthenticated {
        return Err(WebError::from(GwError::NoAuthProvided).into());
    }

    let ids = frontend
        .server
        .fill_gateway_context(GatewayIds::from_eui(eui))
        .await
        .map_err(WebError::from)?;
    frontend
        .server
        .authorize(&ids, credentials.as_deref())
        .await
        .map_err(WebError::from)?;
    let conn = frontend
        .server
        .connect(frontend.clone() as Arc<dyn Frontend>, &ids)
        .await
        .map_err(WebError::from)?;
    info!(%eui, gateway_id = %ids.gateway_id, "gateway connected");

    let (res, session, stream) = actix_ws::handle(&req, body)?;
    actix_web::rt::spawn(run_traffic(frontend, conn, session, stream));
    Ok(res)
}

struct SessionState {
    /// Upper 16 bits of the latest upstream `xtime`; mixed into outgoing
    /// `xtime` so downlinks reference the session the uplink came from.
    session_id: u16,
    time_sync: bool,
}

/// Protocol core of one traffic socket, independent of the WebSocket glue.
pub struct Traffic {
    frontend: Arc<LbsFrontend>,
    conn: Arc<Connection>,
    frequency_plan: Arc<FrequencyPlan>,
    band: &'static Band,
    state: RwLock<SessionState>,
}

impl Traffic {
    pub fn new(frontend: Arc<LbsFrontend>, conn: Arc<Connection>) -> GwResult<Self> {
        let frequency_plan = Arc::clone(conn.frequency_plan());
        let band = frequency_plan.band()?;
        let time_sync = frontend.config.time_sync;
        Ok(Self {
            frontend,
            conn,
            frequency_plan,
            band,
            state: RwLock::new(SessionState {
                session_id: 0,
                time_sync,
            }),
        })
    }

    #[inline]
    pub fn session_id(&self) -> u16 {
        self.state.read().unwrap().session_id
    }

    fn record_session(&self, xtime: i64) {
        if xtime != 0 {
            self.state.write().unwrap().session_id = translate::session_id(xtime);
        }
    }

    fn record_ref_time_rtt(&self, ref_time: f64, now: DateTime<Utc>) {
        if ref_time <= 0.0 {
            return;
        }
        let rtt_micros = (unix_seconds(now) - ref_time) * 1e6;
        if rtt_micros > 0.0 {
            self.conn
                .rtt()
                .record(chrono::Duration::microseconds(rtt_micros as i64), now);
        }
    }

    /// Dispatches one upstream text frame; the return value is the frame to
    /// write back, if any.
    pub async fn handle_text(&self, text: &str, now: DateTime<Utc>) -> GwResult<Option<String>> {
        let envelope: MessageType = serde_json::from_str(text)?;
        match envelope.msgtype.as_str() {
            TYPE_VERSION => {
                let version: Version = serde_json::from_str(text)?;
                info!(
                    station = %version.station,
                    firmware = %version.firmware,
                    model = %version.model,
                    features = %version.features,
                    "station version"
                );
                let config = build_router_config(
                    &self.frequency_plan,
                    self.band,
                    &version.features,
                    unix_seconds(now),
                )?;
                IoCounters::incr(&self.frontend.counters.status_received);
                if let Err(e) = self.conn.handle_status(translate::version_to_status(&version)) {
                    debug!(error = %e, "failed to forward version status");
                }
                Ok(Some(serde_json::to_string(&config)?))
            }
            TYPE_JOIN_REQUEST => {
                let jreq: crate::messages::JoinRequest = serde_json::from_str(text)?;
                self.record_session(jreq.radio.upinfo.xtime);
                self.record_ref_time_rtt(jreq.ref_time, now);
                self.forward_uplink(
                    translate::jreq_to_uplink(&jreq, &self.conn.gateway().ids, self.band, now),
                );
                Ok(None)
            }
            TYPE_UPLINK_DATA_FRAME => {
                let updf: crate::messages::UplinkDataFrame = serde_json::from_str(text)?;
                self.record_session(updf.radio.upinfo.xtime);
                self.record_ref_time_rtt(updf.ref_time, now);
                self.forward_uplink(
                    translate::updf_to_uplink(&updf, &self.conn.gateway().ids, self.band, now),
                );
                Ok(None)
            }
            TYPE_TX_CONFIRMATION => {
                let conf: TxConfirmation = serde_json::from_str(text)?;
                self.record_session(conf.xtime);
                let correlation_ids = match self.conn.tokens().get(conf.diid as u16, now) {
                    Some((cids, _)) => cids,
                    None => {
                        debug!(diid = conf.diid, "dntxed for unknown diid");
                        return Ok(None);
                    }
                };
                if conf.mux_time > 0.0 {
                    let rtt_micros = (unix_seconds(now) - conf.mux_time) * 1e6;
                    if rtt_micros > 0.0 {
                        self.conn
                            .rtt()
                            .record(chrono::Duration::microseconds(rtt_micros as i64), now);
                    }
                }
                IoCounters::incr(&self.frontend.counters.tx_acks_received);
                if let Err(e) = self.conn.handle_tx_ack(TxAcknowledgment {
                    correlation_ids,
                    result: TxAckResult::Success,
                }) {
                    debug!(error = %e, "failed to forward tx confirmation");
                }
                Ok(None)
            }
            TYPE_TIME_SYNC => {
                let request: TimeSyncRequest = serde_json::from_str(text)?;
                let response = self.time_sync_response(&request, now);
                Ok(Some(serde_json::to_string(&response)?))
            }
            TYPE_PROP_DATA_FRAME | TYPE_REMOTE_SHELL => {
                debug!(
                    msgtype = %envelope.msgtype,
                    error = %GwError::MessageTypeNotImplemented(envelope.msgtype.clone()),
                    "dropping frame"
                );
                Ok(None)
            }
            other => {
                debug!(msgtype = %other, "ignoring unknown message type");
                Ok(None)
            }
        }
    }

    fn forward_uplink(&self, uplink: GwResult<lgw_models::UplinkMessage>) {
        IoCounters::incr(&self.frontend.counters.uplinks_received);
        match uplink {
            Ok(up) => {
                self.conn.sync_clock(up.settings.timestamp, up.received_at);
                match self.conn.handle_up(up) {
                    Ok(()) => IoCounters::incr(&self.frontend.counters.uplinks_forwarded),
                    Err(e) => {
                        IoCounters::incr(&self.frontend.counters.uplinks_dropped);
                        debug!(error = %e, "failed to forward uplink");
                    }
                }
            }
            Err(e) => {
                IoCounters::incr(&self.frontend.counters.uplinks_dropped);
                debug!(error = %e, "dropping invalid uplink frame");
            }
        }
    }

    /// With time-sync enabled the reply carries GPS time and the current
    /// session `xtime`; otherwise only `MuxTime`.
    fn time_sync_response(&self, request: &TimeSyncRequest, now: DateTime<Utc>) -> TimeSyncResponse {
        let mux_time = unix_seconds(now);
        if !self.state.read().unwrap().time_sync {
            return TimeSyncResponse {
                txtime: request.txtime,
                xtime: None,
                gpstime: None,
                mux_time,
            };
        }
        let clock = self.conn.clock();
        let xtime = clock
            .concentrator_time_at(now)
            .map(|conc| translate::concentrator_time_to_xtime(self.session_id(), conc));
        let gpstime = lgw_utils::gpstime::to_gps(now).map(|d| d.as_micros() as i64);
        TimeSyncResponse {
            txtime: request.txtime,
            xtime,
            gpstime,
            mux_time,
        }
    }

    /// Encodes one downlink as a `dnmsg`, stamping a fresh correlation token
    /// as `diid`.
    pub fn encode_downlink(&self, msg: &DownlinkMessage, now: DateTime<Utc>) -> GwResult<String> {
        let diid = self.conn.tokens().next(&msg.correlation_ids, now);
        let frame = translate::build_downlink_frame(
            msg,
            self.session_id(),
            self.band,
            &self.conn.clock(),
            diid as i64,
            unix_seconds(now),
        )?;
        IoCounters::incr(&self.frontend.counters.downlinks_sent);
        Ok(serde_json::to_string(&frame)?)
    }
}

async fn run_traffic(
    frontend: Arc<LbsFrontend>,
    conn: Arc<Connection>,
    session: actix_ws::Session,
    mut stream: actix_ws::MessageStream,
) {
    let gateway_id = conn.gateway().ids.gateway_id.clone();
    let traffic = match Traffic::new(Arc::clone(&frontend), Arc::clone(&conn)) {
        Ok(traffic) => Arc::new(traffic),
        Err(e) => {
            warn!(%gateway_id, error = %e, "failed to set up traffic session");
            conn.disconnect(e);
            return;
        }
    };
    let down_rx = match conn.take_down() {
        Some(rx) => rx,
        None => {
            warn!(%gateway_id, "downlink receiver already taken");
            conn.disconnect(GwError::ConnectionNotReady);
            return;
        }
    };

    // All socket writes go through this mutex; uplink dispatch and downlink
    // encoding run concurrently.
    let writer = Arc::new(Mutex::new(session.clone()));
    let missed_pongs = Arc::new(AtomicU32::new(0));

    let downstream = actix_web::rt::spawn(downstream_loop(
        Arc::clone(&frontend),
        Arc::clone(&conn),
        Arc::clone(&traffic),
        Arc::clone(&writer),
        Arc::clone(&missed_pongs),
        down_rx,
    ));

    while let Some(item) = stream.next().await {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%gateway_id, error = %e, "traffic stream error");
                break;
            }
        };
        match msg {
            WsMessage::Text(text) => {
                let reply = traffic.handle_text(&text, Utc::now()).await;
                match reply {
                    Ok(Some(frame)) => {
                        let mut writer = writer.lock().await;
                        if writer.text(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(%gateway_id, error = %e, "failed to handle frame"),
                }
            }
            WsMessage::Ping(payload) => {
                let mut writer = writer.lock().await;
                if writer.pong(&payload).await.is_err() {
                    break;
                }
            }
            WsMessage::Pong(_) => missed_pongs.store(0, Ordering::Relaxed),
            WsMessage::Close(reason) => {
                debug!(%gateway_id, ?reason, "traffic socket closed by station");
                break;
            }
            _ => {}
        }
    }

    conn.disconnect(GwError::Disconnected("websocket closed".to_string()));
    let _ = downstream.await;
    info!(%gateway_id, "traffic session ended");
}

async fn downstream_loop(
    frontend: Arc<LbsFrontend>,
    conn: Arc<Connection>,
    traffic: Arc<Traffic>,
    writer: Arc<Mutex<actix_ws::Session>>,
    missed_pongs: Arc<AtomicU32>,
    mut down_rx: mpsc::Receiver<DownlinkMessage>,
) {
    let mut ping_ticker = interval(frontend.config.ws_ping_interval);
    ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = frontend.cancel.cancelled() => break,
            _ = conn.disconnected() => break,
            _ = ping_ticker.tick() => {
                if missed_pongs.load(Ordering::Relaxed) >= frontend.config.missed_pong_threshold {
                    conn.disconnect(GwError::Timeout(frontend.config.ws_ping_interval.into()));
                    break;
                }
                let mut writer = writer.lock().await;
                if writer.ping(b"").await.is_err() {
                    conn.disconnect(GwError::Disconnected("ping write failed".to_string()));
                    break;
                }
                missed_pongs.fetch_add(1, Ordering::Relaxed);
            }
            msg = down_rx.recv() => match msg {
                Some(msg) => match traffic.encode_downlink(&msg, Utc::now()) {
                    Ok(frame) => {
                        let mut writer = writer.lock().await;
                        if writer.text(frame).await.is_err() {
                            conn.disconnect(GwError::Disconnected(
                                "downlink write failed".to_string(),
                            ));
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping unencodable downlink"),
                },
                None => break,
            },
        }
    }
}
