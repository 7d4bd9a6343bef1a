use crate::store::fetch::FetchCause;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Lookup,
    Stat,
    Read,
    ReadDir,
    ReadLink,
    Write,
}

/// Destination for per-operation access records. Implementations must
/// be cheap; `record` is called synchronously on the callback path.
pub trait AccessLogSink: Send + Sync {
    fn record(&self, pid: u32, path: &[u8], access_type: AccessType, cause: FetchCause);
}

/// Sink that drops everything.
pub struct NullAccessLog;

impl AccessLogSink for NullAccessLog {
    fn record(&self, _pid: u32, _path: &[u8], _access_type: AccessType, _cause: FetchCause) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub pid: u32,
    pub path: Vec<u8>,
    pub access_type: AccessType,
    pub cause: FetchCause,
}

/// Sink that keeps every record, for tests.
#[derive(Default)]
pub struct RecordingAccessLog {
    records: Mutex<Vec<AccessRecord>>,
}

impl RecordingAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AccessLogSink for RecordingAccessLog {
    fn record(&self, pid: u32, path: &[u8], access_type: AccessType, cause: FetchCause) {
        self.records.lock().unwrap().push(AccessRecord {
            pid,
            path: path.to_vec(),
            access_type,
            cause,
        });
    }
}
