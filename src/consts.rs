use std::time::Duration;

/// Development backend used when neither the CLI nor the config names one
pub(crate) const DEFAULT_BASE_URL: &str = "http://localhost:5001/api";

/// Streaming readings endpoint, relative to the base URL
pub(crate) const DEFAULT_STREAM_PATH: &str = "/Lecturas/geo-lecturas-stream";

pub(crate) const LOGIN_PATH: &str = "/auth/login";

/// Paths under this prefix never carry (or expect) a bearer token
pub(crate) const AUTH_PATH_PREFIX: &str = "/auth/";

pub(crate) const EXPECTED_ISSUER: &str = "RiegoAPI";
pub(crate) const EXPECTED_AUDIENCE: &str = "RiegoUsers";

/// Tokens this close to `exp` are already treated as expired
pub(crate) const EXPIRY_GRACE_MS: i64 = 30_000;

// Persisted storage keys
pub(crate) const TOKEN_KEY: &str = "token";
pub(crate) const USERNAME_KEY: &str = "username";
pub(crate) const ROLE_KEY: &str = "role";

pub(crate) const NDJSON_MIME: &str = "application/x-ndjson";

pub(crate) const DEFAULT_BATCH_SIZE: usize = 2000;
pub(crate) const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(2000);
pub(crate) const DEFAULT_MILESTONE: u64 = 2000;

/// Progress added per flush, and the ceiling it may reach before completion
pub(crate) const PROGRESS_STEP: u8 = 2;
pub(crate) const PROGRESS_CAP: u8 = 95;

pub(crate) const READ_CHUNK_SIZE: usize = 16 * 1024;
