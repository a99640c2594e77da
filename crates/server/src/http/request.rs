use std::ops::Deref;

use config::Config;
use hyper::{StatusCode, body::Incoming};

use crate::SharedState;

use super::response::ServerResponse;

pub type HyperRequest = hyper::Request<Incoming>;

/// Deserializes a query string, answering 400 when it doesn't fit `Qu`.
pub fn parse_query<Qu: serde::de::DeserializeOwned>(query: Option<&str>) -> Result<Qu, ServerResponse> {
    serde_urlencoded::from_str::<Qu>(query.unwrap_or_default()).map_err(|err| {
        ServerResponse::new()
            .status(StatusCode::BAD_REQUEST)
            .body(format!("invalid query params: {err}"))
    })
}

pub struct ServerRequest {
    req: HyperRequest,
    state: SharedState,
}

impl ServerRequest {
    pub fn new(req: HyperRequest, state: SharedState) -> Self {
        Self { req, state }
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Shared state that outlives the request, for use across awaits.
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }
}

impl Deref for ServerRequest {
    type Target = HyperRequest;

    fn deref(&self) -> &Self::Target {
        &self.req
    }
}
