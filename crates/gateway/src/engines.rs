//! Engine kinds the gateway can front, and the route table each one exposes.

use std::{fmt, sync::Arc};

use {
    axum::{Router, extract::State, http::StatusCode, routing::get},
    serde::Serialize,
    serde_json::{Value, json},
    tracing::warn,
};

use {booster_common::ServerErrCode, booster_config::{EngineStoreConfig, GatewayConfig}};

use crate::{activation::EngineResource, envelope::RestResponse};

/// One of the independent build-acceleration back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Distributed compile.
    DistCc,
    /// Fast build.
    FastBuild,
    /// Job dispatch.
    ApisJob,
    /// Task distribution.
    DistTask,
}

impl EngineKind {
    /// The order engines are activated in at startup.
    pub const ACTIVATION_ORDER: [Self; 4] =
        [Self::DistCc, Self::FastBuild, Self::ApisJob, Self::DistTask];

    /// Path segment and config table name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DistCc => "distcc",
            Self::FastBuild => "fastbuild",
            Self::ApisJob => "apisjob",
            Self::DistTask => "disttask",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::DistCc => "distributed-compile",
            Self::FastBuild => "fast-build",
            Self::ApisJob => "job-dispatch",
            Self::DistTask => "task-distribution",
        }
    }

    pub fn store_config(self, config: &GatewayConfig) -> &EngineStoreConfig {
        match self {
            Self::DistCc => &config.distcc,
            Self::FastBuild => &config.fastbuild,
            Self::ApisJob => &config.apisjob,
            Self::DistTask => &config.disttask,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the route table for an activated engine.
///
/// Routes are prefixed with the engine's path segment, so tables of different
/// engines never overlap and can be merged in any order.
pub fn route_table(resource: Arc<EngineResource>) -> Router {
    let prefix = resource.kind.as_str();
    Router::new()
        .route(&format!("/{prefix}/health"), get(engine_health))
        .route(&format!("/{prefix}/info"), get(engine_info))
        .with_state(resource)
}

async fn engine_health(State(resource): State<Arc<EngineResource>>) -> RestResponse {
    let kind = resource.kind;
    match resource.store.ping().await {
        Ok(()) => RestResponse::ok(json!({ "engine": kind, "status": "ok" })),
        Err(e) => {
            warn!(engine = %kind, error = %e, "engine store ping failed");
            RestResponse::error(ServerErrCode::EngineUnavailable, e.to_string())
                .with_status(StatusCode::SERVICE_UNAVAILABLE)
                .with_data(json!({ "engine": kind, "status": "unavailable" }))
        },
    }
}

async fn engine_info(State(resource): State<Arc<EngineResource>>) -> RestResponse<Value> {
    RestResponse::ok(json!({
        "engine": resource.kind,
        "name": resource.kind.display_name(),
        "database": resource.store.database(),
        "debug": resource.debug,
    }))
}
