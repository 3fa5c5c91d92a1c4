use config::Config;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

// Pagination bounds for cursor-based listings.
pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 100;

// Attachment upload constraints.
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
pub const ALLOWED_MIME_TYPES: [&str; 9] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
    "image/jpeg",
    "image/png",
    "image/gif",
];

// Fixed-window rate limits per principal.
pub const READ_REQUESTS_PER_WINDOW: u32 = 100;
pub const WRITE_REQUESTS_PER_WINDOW: u32 = 30;
pub const RATE_WINDOW_SECS: i64 = 60;
pub const RATE_SWEEP_THRESHOLD: usize = 10_000;

// Rule tree nesting bound.
pub const MAX_RULE_DEPTH: u32 = 16;

// Worker retry budget.
pub const MAX_JOB_RETRIES: i32 = 3;

pub const SESSION_COOKIE: &str = "session";
pub const ACCESS_TOKEN_HEADER: &str = "accessToken";
pub const MIN_SECRET_BYTES: usize = 32;

/// One page of a cursor-based listing. `next_cursor` is the opaque id of the
/// last returned item and is present only when more rows exist.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> CursorPage<T> {
    /// Build a page from a `limit + 1` probe fetch: the extra row proves more
    /// exist and is discarded.
    pub fn from_probe(mut rows: Vec<T>, limit: u64, id_of: impl Fn(&T) -> String) -> Self {
        let has_more = rows.len() as u64 > limit;
        if has_more {
            rows.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            rows.last().map(&id_of)
        } else {
            None
        };
        Self {
            items: rows,
            next_cursor,
            has_more,
        }
    }
}

/// Clamp a caller-supplied page limit into `[1, MAX_PAGE_LIMIT]`.
pub fn clamp_limit(limit: Option<u64>) -> u64 {
    limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Clone, Debug, Default)]
pub struct AppState {
    pub app_config: Config,
    pub database_connection: DatabaseConnection,
    pub token_secret_key: String,
}

impl AppState {
    pub fn mode(&self) -> String {
        self.app_config
            .get_string("vigil.mode")
            .unwrap_or("development".to_string())
    }

    pub fn is_production(&self) -> bool {
        self.mode() == "production"
    }

    pub fn worker_poll_ms(&self) -> u64 {
        self.app_config.get_int("worker.pollMs").unwrap_or(5000) as u64
    }

    pub fn worker_batch_size(&self) -> u64 {
        self.app_config.get_int("worker.batchSize").unwrap_or(10) as u64
    }

    pub fn realtime_poll_ms(&self) -> u64 {
        self.app_config.get_int("realtime.pollMs").unwrap_or(2000) as u64
    }

    pub fn session_expire_seconds(&self) -> i64 {
        self.app_config
            .get_int("auth.token.expireSeconds")
            .unwrap_or(7 * 24 * 3600)
    }
}

/// Error body shape shared by middleware rejections and handler failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResult {
    pub timestamp: String,
    pub status: i32,
    pub error: String,
    pub message: String,
}

impl ErrorResult {
    pub fn new(status: i32, error: &str, message: String) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status,
            error: error.to_string(),
            message,
        }
    }
}
