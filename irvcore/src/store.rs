//! Published design snapshots and the single-writer discipline.
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use irvmodel::{hierarchy::Hierarchy, macros::MacroParser, macros::MacroLibrary};
use log::{debug, info};
use parking_lot::RwLock;
use strum::{Display, EnumIs};

use crate::utils::error::{IrvError, IrvResult};

/// State of the design a snapshot was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs, Display)]
pub enum LoadStatus {
    /// Nothing was loaded yet.
    Empty,
    /// A load is running; the snapshot is partial but consistent.
    Loading,
    Complete,
    /// The load was cancelled; the snapshot holds what was done before.
    Cancelled,
    /// The load stopped on an error.
    Failed,
}

/// An immutable view of the design at one point of a load.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub status: LoadStatus,
    pub published_at: chrono::NaiveDateTime,
    pub hierarchy: Hierarchy,
}

/// Holds the latest snapshot and admits one writer at a time.
#[derive(Debug)]
pub struct DesignStore {
    current: RwLock<Arc<Snapshot>>,
    generation: AtomicU64,
    writing: AtomicBool,
}

impl Default for DesignStore {
    fn default() -> Self {
        Self::with_hierarchy(Hierarchy::default())
    }
}

impl DesignStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store whose loads parse macro files with `parser`.
    pub fn with_macro_parser(parser: Arc<dyn MacroParser>) -> Arc<Self> {
        Arc::new(Self::with_hierarchy(Hierarchy::new(MacroLibrary::with_parser(
            parser,
        ))))
    }

    /// A store seeded with an existing hierarchy; loads start from it.
    pub fn with_hierarchy(hierarchy: Hierarchy) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot {
                generation: 0,
                status: LoadStatus::Empty,
                published_at: chrono::Local::now().naive_local(),
                hierarchy,
            })),
            generation: AtomicU64::new(0),
            writing: AtomicBool::new(false),
        }
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.writing.load(Ordering::Acquire)
    }

    /// Claim the writer slot until the returned guard is dropped.
    pub(crate) fn acquire_writer(self: &Arc<Self>) -> IrvResult<WriterGuard> {
        self.writing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| IrvError::LoadInProgress)?;
        debug!("Design store writer acquired");
        Ok(WriterGuard {
            store: self.clone(),
        })
    }

    /// Replace the current snapshot. Only the writer calls this.
    pub(crate) fn publish(&self, status: LoadStatus, hierarchy: Hierarchy) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = Arc::new(Snapshot {
            generation,
            status,
            published_at: chrono::Local::now().naive_local(),
            hierarchy,
        });
        *self.current.write() = snapshot;
        if !status.is_loading() {
            info!("Published design snapshot #{} ({})", generation, status);
        }
        generation
    }
}

/// Exclusive right to publish into a [`DesignStore`].
#[derive(Debug)]
pub(crate) struct WriterGuard {
    store: Arc<DesignStore>,
}

impl WriterGuard {
    pub(crate) fn store(&self) -> &DesignStore {
        &self.store
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.store.writing.store(false, Ordering::Release);
        debug!("Design store writer released");
    }
}
