use crate::global_conf::build_global_conf;
use actix_web::{
    http::header::{ACCEPT, AUTHORIZATION},
    web, HttpRequest, HttpResponse, ResponseError,
};
use lgw_core::GatewayServer;
use lgw_error::{web::WebError, GwError};
use lgw_models::GatewayIds;
use std::sync::Arc;
use tracing::debug;

/// Configuration of the web side-channel.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Enforce gateway-info rights from the bearer credential.
    pub require_auth: bool,
    /// Address advertised to the packet forwarder in `gateway_conf`.
    pub server_address: String,
    pub serv_port_up: u16,
    pub serv_port_down: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            server_address: "localhost".to_string(),
            serv_port_up: 1700,
            serv_port_down: 1700,
        }
    }
}

/// Shared state of the web endpoints.
pub struct WebState {
    pub server: Arc<dyn GatewayServer>,
    pub config: WebConfig,
}

/// Registers the gateway configuration endpoint.
pub fn configure(state: Arc<WebState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(state)).route(
            "/api/v3/gs/gateways/{gateway_id}/global_conf.json",
            web::get().to(global_conf),
        );
    }
}

/// Renders an error as JSON when the client accepts it, plain text
/// otherwise.
fn error_response(req: &HttpRequest, err: WebError) -> HttpResponse {
    let wants_json = req
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("json"))
        .unwrap_or(false);
    if wants_json {
        err.error_response()
    } else {
        HttpResponse::build(err.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(err.to_string())
    }
}

async fn global_conf(
    req: HttpRequest,
    path: web::Path<String>,
    data: web::Data<Arc<WebState>>,
) -> HttpResponse {
    let state = data.get_ref();
    let gateway_id = path.into_inner();

    let credentials = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_string());
    if state.config.require_auth && credentials.is_none() {
        return error_response(&req, WebError::from(GwError::NoAuthProvided));
    }

    let mut ids = GatewayIds::new(gateway_id.clone());
    if let Some(hex) = gateway_id.strip_prefix("eui-") {
        ids.eui = hex.parse().ok();
    }

    let ids = match state.server.fill_gateway_context(ids).await {
        Ok(ids) => ids,
        Err(e) => {
            debug!(%gateway_id, error = %e, "failed to resolve gateway");
            return error_response(&req, WebError::from(e));
        }
    };
    if state.config.require_auth {
        if let Err(e) = state.server.authorize(&ids, credentials.as_deref()).await {
            return error_response(&req, WebError::from(e));
        }
    }
    let plan = match state.server.frequency_plan(&ids).await {
        Ok(plan) => plan,
        Err(e) => return error_response(&req, WebError::from(e)),
    };
    match build_global_conf(
        &plan,
        ids.eui,
        &state.config.server_address,
        state.config.serv_port_up,
        state.config.serv_port_down,
    ) {
        Ok(conf) => HttpResponse::Ok().json(conf),
        Err(e) => error_response(&req, WebError::from(e)),
    }
}
