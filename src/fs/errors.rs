use crate::store::StoreError;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,

    #[error("inode is stale")]
    Stale,

    #[error("not a directory")]
    NotADirectory,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("read-only filesystem")]
    ReadOnly,

    #[error("I/O error")]
    IoError,

    #[error("out of memory")]
    OutOfMemory,

    #[error("resource temporarily unavailable")]
    Again,

    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

impl FsError {
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Stale => libc::ESTALE,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::ReadOnly => libc::EROFS,
            FsError::IoError => libc::EIO,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::Again => libc::EAGAIN,
            FsError::Fatal(_) => libc::EIO,
        }
    }
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        match e {
            // A hash the store no longer knows means the projection the
            // client holds is out of date.
            StoreError::NotFound => FsError::Stale,
            StoreError::Transient(msg) => {
                warn!("transient object store failure: {}", msg);
                FsError::IoError
            }
            StoreError::Fatal(msg) => FsError::Fatal(msg),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsError::Stale.to_errno(), libc::ESTALE);
        assert_eq!(FsError::ReadOnly.to_errno(), libc::EROFS);
        assert_eq!(FsError::NotADirectory.to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::InvalidArgument.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_store_error_conversion() {
        assert!(matches!(FsError::from(StoreError::NotFound), FsError::Stale));
        assert!(matches!(
            FsError::from(StoreError::Transient("x".into())),
            FsError::IoError
        ));
        assert!(matches!(
            FsError::from(StoreError::Fatal("x".into())),
            FsError::Fatal(_)
        ));
    }
}
