// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Job control primitives. */

use {
    crate::error::{ErrorKind, MirrorError, Result},
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Cooperative cancellation flag shared between a job and its controller.
///
/// Jobs check the token at file boundaries. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error with [MirrorError::Cancelled] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MirrorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The structured failure of a job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&MirrorError> for JobFailure {
    fn from(e: &MirrorError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Final status of a job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus<T> {
    Completed(T),
    Failed(JobFailure),
}

impl<T> JobStatus<T> {
    /// Summarize a job result.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(v) => Self::Completed(v),
            Err(e) => Self::Failed(JobFailure::from(&e)),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(MirrorError::Cancelled)));
    }

    #[test]
    fn failure_summary() {
        let status = JobStatus::<()>::from_result(Err(MirrorError::RemoteIntegrity {
            path: "repodata/primary.xml.gz".into(),
            reason: "digest mismatch".into(),
        }));

        match status {
            JobStatus::Failed(failure) => {
                assert_eq!(failure.kind, ErrorKind::RemoteIntegrity);
                assert!(failure.message.contains("repodata/primary.xml.gz"));
                assert!(failure
                    .to_string()
                    .starts_with("RemoteIntegrityError: "));
            }
            JobStatus::Completed(_) => panic!("expected failure"),
        }
    }
}
