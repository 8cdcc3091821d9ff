use axum::{routing::get, Router};
use std::sync::Arc;

use crate::Simulator;

mod http;
mod ws;

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(http::healthz))
            .route("/stats", get(http::stats))
            .route("/ws", get(ws::battle_ws))
            .with_state(self.simulator.clone())
    }
}
