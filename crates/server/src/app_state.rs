use std::time::Duration;

use server_api::{auth::SessionConfig, ApiContext};

/// Push socket liveness: the server pings every `ping_interval` and drops a
/// socket that sends nothing, pongs included, for `idle_timeout`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Heartbeat {
    pub(crate) ping_interval: Duration,
    pub(crate) idle_timeout: Duration,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) session: SessionConfig,
    pub(crate) heartbeat: Heartbeat,
}
