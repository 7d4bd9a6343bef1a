use tokio_util::sync::CancellationToken;

/// High-level reason an object fetch was issued. Threaded through the
/// store so backends can attribute and prioritize traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCause {
    Unknown,
    Fs,
    Mount,
    Prefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchPriority {
    Low,
    Normal,
    High,
}

/// Capability token passed into object-store reads. Read-only; carries
/// cause detail and priority and answers cancellation polls.
pub trait ObjectFetchContext: Send + Sync {
    fn cause(&self) -> FetchCause;

    fn cause_detail(&self) -> Option<&str> {
        None
    }

    fn priority(&self) -> FetchPriority {
        FetchPriority::Normal
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Contextless fetches share one immutable instance for the life of the
/// process.
pub struct NullFetchContext;

static NULL_FETCH_CONTEXT: NullFetchContext = NullFetchContext;

impl NullFetchContext {
    pub fn get() -> &'static NullFetchContext {
        &NULL_FETCH_CONTEXT
    }
}

impl ObjectFetchContext for NullFetchContext {
    fn cause(&self) -> FetchCause {
        FetchCause::Unknown
    }
}

/// Fetch context backed by a cancellation token, used for kernel
/// callbacks that may be aborted mid-flight.
pub struct CancellableFetchContext {
    cause: FetchCause,
    detail: Option<String>,
    priority: FetchPriority,
    token: CancellationToken,
}

impl CancellableFetchContext {
    pub fn new(cause: FetchCause, priority: FetchPriority, token: CancellationToken) -> Self {
        Self {
            cause,
            detail: None,
            priority,
            token,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl ObjectFetchContext for CancellableFetchContext {
    fn cause(&self) -> FetchCause {
        self.cause
    }

    fn cause_detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    fn priority(&self) -> FetchPriority {
        self.priority
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
