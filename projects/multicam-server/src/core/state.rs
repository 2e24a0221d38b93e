use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Initializing,
    Capturing,
    Reconnecting,
    Stopped,
}

/// Connection status of one device, written only by its capture worker.
///
/// `connected` drops to false after the consecutive read-failure threshold, and
/// also when an explicit reconnect fails, since that attempt closes the device.
/// Only the former counts towards `error_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    /// Number of persistent failures (reconnect sequences entered). Never decreases.
    pub error_count: u64,
    pub reconnect_attempts: u32,
    pub state: WorkerPhase,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connected: false,
            error_count: 0,
            reconnect_attempts: 0,
            state: WorkerPhase::Initializing,
        }
    }
}
