//! Authentication: token validation, persisted identity and the session
//! lifecycle, plus the middleware that ties it to outgoing requests.

mod interceptor;
mod session;
mod storage;
mod token;

pub(crate) use interceptor::BearerAuth;
pub(crate) use session::{LogoutReason, Session, SessionEvent, SessionManager};
pub(crate) use storage::Store;
pub(crate) use token::TokenValidator;
#[cfg(test)]
pub(crate) use token::{decode_claims, encode_token};
