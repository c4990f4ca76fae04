use crate::consts::AUTH_PATH_PREFIX;
use crate::http::{ApiRequest, Middleware};

use super::session::SessionManager;
use super::token::bearer_value;

/// Attaches the session's bearer token to outgoing requests and ends the
/// session when the server answers 401 to one of them.
pub(crate) struct BearerAuth {
    session: SessionManager,
}

impl BearerAuth {
    pub(crate) fn new(session: SessionManager) -> Self {
        Self { session }
    }
}

fn is_auth_endpoint(path: &str) -> bool {
    let path = format!("/{}", path.trim_start_matches('/'));
    path.starts_with(AUTH_PATH_PREFIX)
}

impl Middleware for BearerAuth {
    fn before_request(&self, request: &mut ApiRequest) {
        match self.session.credential() {
            Some((token, epoch)) => match bearer_value(&token) {
                Some(value) => {
                    request.set_header("Authorization", format!("Bearer {value}"));
                    request.session_epoch = Some(epoch);
                }
                None => {
                    tracing::warn!("stored token cannot be sent as a header; request goes out unauthenticated");
                }
            },
            None if !is_auth_endpoint(&request.path) => {
                tracing::warn!(path = %request.path, "no session; request goes out unauthenticated");
            }
            None => {}
        }
    }

    fn after_response(&self, request: &ApiRequest, status: u16) {
        if status != 401 {
            return;
        }
        match request.session_epoch {
            Some(epoch) => {
                if !self.session.handle_unauthorized(epoch) {
                    tracing::debug!(epoch, "401 for a session that already ended");
                }
            }
            None => tracing::debug!(path = %request.path, "401 on a request without credentials"),
        }
    }
}
