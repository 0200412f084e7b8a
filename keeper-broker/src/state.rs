use std::time::Duration;

use keeper_core::VaultService;

use crate::auth::{AuthGateway, TokenService};
use crate::config::ServerConfig;

/// Request-level bounds enforced by the HTTP layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerLimits {
    pub max_request_bytes: usize,
    pub request_timeout: Duration,
}

impl From<&ServerConfig> for ServerLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_request_bytes: config.max_request_bytes,
            request_timeout: config.request_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub vault: VaultService,
    pub auth: AuthGateway,
    pub tokens: TokenService,
    pub limits: ServerLimits,
}

impl AppState {
    pub fn new(
        vault: VaultService,
        auth: AuthGateway,
        tokens: TokenService,
        limits: ServerLimits,
    ) -> Self {
        Self {
            vault,
            auth,
            tokens,
            limits,
        }
    }
}
