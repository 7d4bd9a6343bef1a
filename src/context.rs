use crate::access_log::{AccessLogSink, AccessType, NullAccessLog};
use crate::store::fetch::FetchCause;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Ambient state for one in-flight filesystem request: a transaction
/// id, the cause annotation forwarded to the object store, and the sink
/// receiving access records.
pub struct RequestContext {
    request_id: u64,
    pid: u32,
    cause: FetchCause,
    access_log: Arc<dyn AccessLogSink>,
}

impl RequestContext {
    pub fn new(pid: u32, cause: FetchCause, access_log: Arc<dyn AccessLogSink>) -> Self {
        Self {
            request_id: NEXT_REQUEST_ID.fetch_add(1, AtomicOrdering::SeqCst),
            pid,
            cause,
            access_log,
        }
    }

    /// Context with no caller attribution and a discarding sink.
    pub fn anonymous() -> Self {
        Self::new(0, FetchCause::Unknown, Arc::new(NullAccessLog))
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn cause(&self) -> FetchCause {
        self.cause
    }

    pub fn record_access(&self, path: &[u8], access_type: AccessType) {
        self.access_log
            .record(self.pid, path, access_type, self.cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::RecordingAccessLog;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestContext::anonymous();
        let b = RequestContext::anonymous();
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_record_access_forwards_to_sink() {
        let log = Arc::new(RecordingAccessLog::new());
        let ctx = RequestContext::new(77, FetchCause::Fs, log.clone());
        ctx.record_access(b"lib.rs", AccessType::Lookup);

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pid, 77);
        assert_eq!(records[0].cause, FetchCause::Fs);
    }
}
