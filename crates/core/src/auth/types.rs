use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::config::AuthMethod;

/// User id recorded for operator actions when the API is open.
pub const UNAUTHENTICATED_OPERATOR: &str = "unauthenticated";

/// What the authenticator gets to see of an HTTP request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Operator behind a request. `user_id` ends up in activity events for
/// aborts, restores and reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: AuthMethod,
}

impl Identity {
    pub fn unauthenticated() -> Self {
        Self {
            user_id: UNAUTHENTICATED_OPERATOR.to_string(),
            method: AuthMethod::None,
        }
    }
}
