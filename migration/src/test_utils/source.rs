use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::source::base::{EnumerationStream, SequenceStore};
use crate::test_utils::take_fault;
use crate::types::{EnumerationRequest, SequenceNumber};

#[derive(Debug, Default)]
struct Faults {
    failing_enumerations: AtomicU32,
    failing_sequence_reads: AtomicU32,
    corrupted_pages: AtomicU32,
    failing_rejects: AtomicU32,
    enumerations: AtomicU32,
    rejects: AtomicU32,
    resumes: AtomicU32,
}

/// Wraps a [`SequenceStore`] to inject failures and count gate calls.
///
/// Clones share the injected faults and the counters.
#[derive(Debug, Clone)]
pub struct FaultInjectingSequenceStore<S> {
    inner: S,
    faults: Arc<Faults>,
}

impl<S> FaultInjectingSequenceStore<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Makes the next `n` enumerations fail with [`ErrorKind::SourceUnavailable`].
    pub fn fail_next_enumerations(&self, n: u32) {
        self.faults.failing_enumerations.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` first/last sequence number reads fail with
    /// [`ErrorKind::SourceUnavailable`].
    pub fn fail_next_sequence_reads(&self, n: u32) {
        self.faults.failing_sequence_reads.store(n, Ordering::SeqCst);
    }

    /// Tampers with the next `n` non-empty pages so that they fail their
    /// integrity check.
    pub fn corrupt_next_pages(&self, n: u32) {
        self.faults.corrupted_pages.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` reject calls report that writes could not be drained.
    pub fn fail_next_rejects(&self, n: u32) {
        self.faults.failing_rejects.store(n, Ordering::SeqCst);
    }

    pub fn enumeration_calls(&self) -> u32 {
        self.faults.enumerations.load(Ordering::SeqCst)
    }

    pub fn reject_calls(&self) -> u32 {
        self.faults.rejects.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> u32 {
        self.faults.resumes.load(Ordering::SeqCst)
    }

    fn check_sequence_read(&self) -> MigrationResult<()> {
        if take_fault(&self.faults.failing_sequence_reads) {
            bail!(
                ErrorKind::SourceUnavailable,
                "Injected source failure",
                "sequence number read"
            );
        }

        Ok(())
    }
}

impl<S> SequenceStore for FaultInjectingSequenceStore<S>
where
    S: SequenceStore + Send + Sync,
{
    async fn get_first_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.check_sequence_read()?;

        self.inner.get_first_sequence_number().await
    }

    async fn get_last_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.check_sequence_read()?;

        self.inner.get_last_sequence_number().await
    }

    async fn enumerate(&self, request: EnumerationRequest) -> MigrationResult<EnumerationStream> {
        self.faults.enumerations.fetch_add(1, Ordering::SeqCst);
        if take_fault(&self.faults.failing_enumerations) {
            bail!(
                ErrorKind::SourceUnavailable,
                "Injected source failure",
                "enumeration"
            );
        }

        let pages = self.inner.enumerate(request).await?;
        let faults = self.faults.clone();
        let pages = pages.map(move |page| {
            page.map(|mut page| {
                if !page.key_value_pairs.is_empty() && take_fault(&faults.corrupted_pages) {
                    page.key_value_pairs[0].key.push('~');
                }
                page
            })
        });

        Ok(pages.boxed())
    }

    async fn try_abort_existing_transactions_and_reject_writes(&self) -> MigrationResult<bool> {
        self.faults.rejects.fetch_add(1, Ordering::SeqCst);
        if take_fault(&self.faults.failing_rejects) {
            return Ok(false);
        }

        self.inner
            .try_abort_existing_transactions_and_reject_writes()
            .await
    }

    async fn resume_writes(&self) -> MigrationResult<bool> {
        self.faults.resumes.fetch_add(1, Ordering::SeqCst);

        self.inner.resume_writes().await
    }
}
