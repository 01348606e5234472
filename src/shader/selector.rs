use parking_lot::{Mutex, MutexGuard};
use std::collections::TryReserveError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use super::{ShaderProgram, ShaderVariant};
use crate::binary::ShaderBinary;
use crate::cache::ProgramDigest;
use crate::key::{SelectorId, StageRole, VariantKey};
use crate::runtime::task::{Fence, JobStatus, JobTicket};

const LIVE: u8 = 0;
const TEARING_DOWN: u8 = 1;
const DESTROYED: u8 = 2;

/// Everything guarded by the selector lock.
pub(crate) struct SelectorState {
    /// Append-only; a variant's index never changes.
    pub(crate) variants: Vec<Arc<ShaderVariant>>,
    pub(crate) main_parts: [Option<Arc<ShaderBinary>>; StageRole::COUNT],
}

impl SelectorState {
    /// First variant whose key equals `key`, ignoring `skip`.
    pub(crate) fn find(
        &self,
        key: &VariantKey,
        skip: Option<&Arc<ShaderVariant>>,
    ) -> Option<Arc<ShaderVariant>> {
        self.variants
            .iter()
            .filter(|variant| skip.is_none_or(|skip| !Arc::ptr_eq(variant, skip)))
            .find(|variant| variant.key() == key)
            .cloned()
    }

    /// Append a variant built by `make` from its index. Nothing is published
    /// if the list cannot grow.
    pub(crate) fn try_append(
        &mut self,
        make: impl FnOnce(usize) -> ShaderVariant,
    ) -> Result<Arc<ShaderVariant>, TryReserveError> {
        self.variants.try_reserve(1)?;
        let variant = Arc::new(make(self.variants.len()));
        self.variants.push(Arc::clone(&variant));
        Ok(variant)
    }
}

pub struct SelectorInner {
    id: SelectorId,
    program: ShaderProgram,
    digest: ProgramDigest,
    initial_role: StageRole,
    state: Mutex<SelectorState>,
    ready: Arc<Fence>,
    jobs: Mutex<Vec<Arc<JobTicket>>>,
    lifecycle: AtomicU8,
}

/// Shared handle to one program and every variant built for it.
#[derive(Clone)]
pub struct Selector {
    inner: Arc<SelectorInner>,
}

impl Selector {
    pub(crate) fn new(id: SelectorId, program: ShaderProgram, initial_role: StageRole) -> Self {
        let digest = ProgramDigest::of_program(&program);
        Self {
            inner: Arc::new(SelectorInner {
                id,
                program,
                digest,
                initial_role,
                state: Mutex::new(SelectorState {
                    variants: Vec::new(),
                    main_parts: Default::default(),
                }),
                ready: Arc::new(Fence::new()),
                jobs: Mutex::new(Vec::new()),
                lifecycle: AtomicU8::new(LIVE),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SelectorInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SelectorInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> SelectorId {
        self.inner.id
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.inner.program
    }

    pub fn digest(&self) -> &ProgramDigest {
        &self.inner.digest
    }

    /// Role of the main part compiled when the program was defined.
    pub fn initial_role(&self) -> StageRole {
        self.inner.initial_role
    }

    /// Signalled once the definition-time compile has finished, whatever
    /// its outcome.
    pub fn ready_fence(&self) -> &Arc<Fence> {
        &self.inner.ready
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the variant list in insertion order.
    pub fn variants(&self) -> Vec<Arc<ShaderVariant>> {
        self.inner.state.lock().variants.clone()
    }

    pub fn variant_count(&self) -> usize {
        self.inner.state.lock().variants.len()
    }

    pub fn find_variant(&self, key: &VariantKey) -> Option<Arc<ShaderVariant>> {
        self.inner.state.lock().find(key, None)
    }

    pub fn main_part(&self, role: StageRole) -> Option<Arc<ShaderBinary>> {
        self.inner.state.lock().main_parts[role.index()].clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lifecycle.load(Ordering::Acquire) == DESTROYED
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SelectorState> {
        self.inner.state.lock()
    }

    /// Panics if the selector was destroyed; using one afterwards is a
    /// lifetime bug in the caller.
    pub(crate) fn assert_live(&self) {
        assert!(
            !self.is_destroyed(),
            "shader selector {} used after it was destroyed",
            self.inner.id
        );
    }

    /// Remember a job that references this selector, forgetting finished ones.
    pub(crate) fn track_job(&self, ticket: Arc<JobTicket>) {
        let mut jobs = self.inner.jobs.lock();
        jobs.retain(|job| matches!(job.status(), JobStatus::Queued | JobStatus::Running));
        jobs.push(ticket);
    }

    pub(crate) fn take_jobs(&self) -> Vec<Arc<JobTicket>> {
        std::mem::take(&mut *self.inner.jobs.lock())
    }

    /// Returns false if teardown already started.
    pub(crate) fn begin_teardown(&self) -> bool {
        self.inner
            .lifecycle
            .compare_exchange(LIVE, TEARING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish_teardown(&self) {
        self.inner.lifecycle.store(DESTROYED, Ordering::Release);
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.inner.id)
            .field("stage", &self.inner.program.stage())
            .field("label", &self.inner.program.label())
            .field("digest", &format_args!("{}", self.inner.digest))
            .finish_non_exhaustive()
    }
}
