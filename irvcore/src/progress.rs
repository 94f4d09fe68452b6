//! Coarse progress events emitted by a design load.
use std::path::PathBuf;

use crossbeam::channel::Sender;
use log::{info, warn};
use strum::{EnumIs, IntoStaticStr};

use crate::store::LoadStatus;

#[derive(Debug, Clone, PartialEq, Eq, EnumIs, IntoStaticStr)]
pub enum ProgressKind {
    Started {
        files: usize,
        constraints: usize,
    },
    MacroLoaded {
        path: PathBuf,
        count: usize,
    },
    MacroFailed {
        path: PathBuf,
        reason: String,
    },
    FileScanned {
        file: PathBuf,
        modules: usize,
    },
    /// The file could not be read; the load went on without it.
    FileSkipped {
        file: PathBuf,
        reason: String,
    },
    /// A later file replaced an earlier definition of the same module.
    ModuleRedefined {
        name: String,
        file: PathBuf,
        previous_file: PathBuf,
    },
    Resolved {
        resolved: usize,
        pending: usize,
        pending_references: usize,
    },
    ConstraintAttached {
        path: String,
    },
    ConstraintRejected {
        index: usize,
        path: String,
        reason: String,
    },
    Cancelled,
    Finished {
        generation: u64,
        status: LoadStatus,
    },
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub timepoint: chrono::NaiveDateTime,
    /// Coarse steps done so far, out of `total`.
    pub step: usize,
    pub total: usize,
    pub kind: ProgressKind,
}

impl Progress {
    pub fn new(step: usize, total: usize, kind: ProgressKind) -> Self {
        Self {
            timepoint: chrono::Local::now().naive_local(),
            step,
            total,
            kind,
        }
    }
}

/// Receives the progress events of a load, on the load thread.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl ProgressSink for Sender<Progress> {
    fn report(&self, progress: Progress) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.send(progress);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _progress: Progress) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, progress: Progress) {
        let name: &'static str = (&progress.kind).into();
        match &progress.kind {
            ProgressKind::FileSkipped { .. }
            | ProgressKind::MacroFailed { .. }
            | ProgressKind::ConstraintRejected { .. } => {
                warn!("[{}/{}] {}: {:?}", progress.step, progress.total, name, progress.kind)
            }
            _ => info!("[{}/{}] {}", progress.step, progress.total, name),
        }
    }
}
