use axum::{
    extract::State as AxumState,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

use crate::Simulator;

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn stats(AxumState(simulator): AxumState<Arc<Simulator>>) -> Response {
    Json(simulator.stats()).into_response()
}
