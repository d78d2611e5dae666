use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use mongodb::bson::doc;
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde::Serialize;

use crate::config::Config;

pub const MAX_CONNECT_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 10_000;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
const MAX_POOL_SIZE: u32 = 10;
const MIN_POOL_SIZE: u32 = 1;
const DEFAULT_DATABASE: &str = "todo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retry budget exhausted; only an explicit `connect` call leaves this
    /// state.
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    /// Numeric code matching the mongoose readyState convention the health
    /// endpoint exposes: 0 disconnected, 1 connected, 2 connecting.
    pub fn ready_state(self) -> u8 {
        match self {
            ConnectionState::Connected => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Disconnected | ConnectionState::Failed => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Side-effect-free snapshot of the manager, consumed by `/health`.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub ready_state: u8,
    pub connected: bool,
    pub attempts: u32,
    pub last_error: Option<LastError>,
    pub host: Option<String>,
    pub database: Option<String>,
    pub has_uri: bool,
}

struct Inner {
    state: ConnectionState,
    client: Option<Client>,
    attempts: u32,
    last_error: Option<LastError>,
    host: Option<String>,
    database: Option<String>,
}

/// Owns the single shared MongoDB client and its lifecycle. Connection
/// failures are never fatal: they are recorded, retried with capped
/// exponential backoff, and surfaced through `status()`.
pub struct ConnectionManager {
    uri: String,
    has_uri: bool,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(config: &Config) -> Self {
        Self {
            uri: config.mongodb_uri.clone(),
            has_uri: config.has_mongo_uri,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                client: None,
                attempts: 0,
                last_error: None,
                host: None,
                database: None,
            }),
        }
    }

    /// Connects to the store, retrying with exponential backoff until either
    /// the connection is established or the retry budget runs out. Idempotent:
    /// returns immediately when already connected or while another call is
    /// mid-attempt.
    pub async fn connect(self: Arc<Self>) {
        loop {
            if !self.begin_attempt() {
                debug!("connect skipped, connection already active or in progress");
                return;
            }
            let attempt = self.status().attempts;
            info!("connecting to MongoDB (attempt {attempt}/{MAX_CONNECT_ATTEMPTS})");
            match self.try_connect().await {
                Ok((client, host, database)) => {
                    self.record_success(client, host, database);
                    info!("MongoDB connection established");
                    return;
                }
                Err(err) => {
                    let (kind, message) = describe_error(&err);
                    error!("MongoDB connection failed ({kind}): {message}");
                    match self.record_failure(kind, message) {
                        Some(delay) => {
                            warn!("retrying MongoDB connection in {}ms", delay.as_millis());
                            actix_web::rt::time::sleep(delay).await;
                        }
                        None => {
                            error!(
                                "reached the maximum of {MAX_CONNECT_ATTEMPTS} MongoDB \
                                 connection attempts, manual reconnect required"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Called when a store operation fails at the connection level. Drops the
    /// client, flips to `Disconnected` and schedules a reconnect after a fixed
    /// short delay when retry budget remains.
    pub fn mark_disconnected(self: &Arc<Self>, err: &mongodb::error::Error) {
        let (kind, message) = describe_error(err);
        let retry = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != ConnectionState::Connected {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            inner.client = None;
            inner.last_error = Some(LastError {
                kind: kind.to_string(),
                message: message.clone(),
                at: Utc::now(),
            });
            inner.attempts < MAX_CONNECT_ATTEMPTS
        };
        warn!("MongoDB connection lost ({kind}): {message}");
        if retry {
            let manager = Arc::clone(self);
            actix_web::rt::spawn(async move {
                actix_web::rt::time::sleep(RECONNECT_DELAY).await;
                manager.connect().await;
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().state == ConnectionState::Connected
    }

    pub fn client(&self) -> Option<Client> {
        self.inner.lock().unwrap().client.clone()
    }

    pub fn database_name(&self) -> String {
        self.inner
            .lock()
            .unwrap()
            .database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
    }

    pub fn status(&self) -> ConnectionStatus {
        let inner = self.inner.lock().unwrap();
        ConnectionStatus {
            state: inner.state,
            ready_state: inner.state.ready_state(),
            connected: inner.state == ConnectionState::Connected,
            attempts: inner.attempts,
            last_error: inner.last_error.clone(),
            host: inner.host.clone(),
            database: inner.database.clone(),
            has_uri: self.has_uri,
        }
    }

    async fn try_connect(
        &self,
    ) -> Result<(Client, Option<String>, Option<String>), mongodb::error::Error> {
        let mut options = ClientOptions::parse(&self.uri).await?;
        options.server_selection_timeout = Some(CONNECT_TIMEOUT);
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.heartbeat_freq = Some(HEARTBEAT_FREQUENCY);
        options.max_pool_size = Some(MAX_POOL_SIZE);
        options.min_pool_size = Some(MIN_POOL_SIZE);
        options.retry_writes = Some(true);
        let host = options.hosts.first().map(|h| h.to_string());
        let database = options.default_database.clone();
        let client = Client::with_options(options)?;
        // Client::with_options does not dial anything, the ping does.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok((client, host, database))
    }

    fn begin_attempt(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ConnectionState::Connected | ConnectionState::Connecting => false,
            ConnectionState::Disconnected | ConnectionState::Failed => {
                inner.state = ConnectionState::Connecting;
                inner.attempts += 1;
                true
            }
        }
    }

    fn record_success(&self, client: Client, host: Option<String>, database: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = ConnectionState::Connected;
        inner.client = Some(client);
        inner.attempts = 0;
        inner.host = host;
        inner.database = database;
    }

    fn record_failure(&self, kind: &str, message: String) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        inner.client = None;
        inner.last_error = Some(LastError {
            kind: kind.to_string(),
            message,
            at: Utc::now(),
        });
        if inner.attempts < MAX_CONNECT_ATTEMPTS {
            inner.state = ConnectionState::Disconnected;
            Some(backoff_delay(inner.attempts))
        } else {
            inner.state = ConnectionState::Failed;
            None
        }
    }
}

/// Delay before retry number `attempt + 1`, doubling per attempt and capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let millis = BACKOFF_BASE_MS
        .saturating_mul(1u64 << exponent)
        .min(BACKOFF_CAP_MS);
    Duration::from_millis(millis)
}

pub fn is_connection_error(err: &mongodb::error::Error) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
    )
}

fn describe_error(err: &mongodb::error::Error) -> (&'static str, String) {
    let kind = match &*err.kind {
        ErrorKind::ServerSelection { .. } => "ServerSelection",
        ErrorKind::Io(_) => "Io",
        ErrorKind::Authentication { .. } => "Authentication",
        ErrorKind::DnsResolve { .. } => "DnsResolve",
        ErrorKind::InvalidArgument { .. } => "InvalidArgument",
        ErrorKind::ConnectionPoolCleared { .. } => "ConnectionPoolCleared",
        _ => "Other",
    };
    (kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(&Config::with_uri(
            "mongodb://localhost:27017/todo".to_string(),
        ))
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(5), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn begin_attempt_is_idempotent_while_connecting() {
        let manager = manager();
        assert!(manager.begin_attempt());
        assert_eq!(manager.status().state, ConnectionState::Connecting);
        assert_eq!(manager.status().ready_state, 2);
        // A second caller must not start a duplicate attempt.
        assert!(!manager.begin_attempt());
        assert_eq!(manager.status().attempts, 1);
    }

    #[test]
    fn failures_accumulate_until_the_budget_is_spent() {
        let manager = manager();
        for attempt in 1..MAX_CONNECT_ATTEMPTS {
            assert!(manager.begin_attempt());
            let delay = manager.record_failure("ServerSelection", "no reachable servers".into());
            assert_eq!(delay, Some(backoff_delay(attempt)));
            assert_eq!(manager.status().state, ConnectionState::Disconnected);
        }
        assert!(manager.begin_attempt());
        let delay = manager.record_failure("ServerSelection", "no reachable servers".into());
        assert_eq!(delay, None);
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.ready_state, 0);
        assert_eq!(status.attempts, MAX_CONNECT_ATTEMPTS);
        let last = status.last_error.unwrap();
        assert_eq!(last.kind, "ServerSelection");
        // A manual reconnect is still allowed out of Failed.
        assert!(manager.begin_attempt());
    }

    #[test]
    fn failure_records_the_error_for_status() {
        let manager = manager();
        manager.begin_attempt();
        manager.record_failure("Io", "connection refused".into());
        let status = manager.status();
        assert!(!status.connected);
        let last = status.last_error.unwrap();
        assert_eq!(last.kind, "Io");
        assert_eq!(last.message, "connection refused");
    }

    #[test]
    fn fresh_manager_reports_disconnected() {
        let status = manager().status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.ready_state, 0);
        assert!(!status.connected);
        assert_eq!(status.attempts, 0);
        assert!(status.last_error.is_none());
        assert!(status.host.is_none());
        assert!(status.has_uri);
    }
}
