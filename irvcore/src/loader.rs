//! The background design load.
//!
//! A load runs on its own thread over a private copy of the store's current
//! hierarchy. The phases are macros, stackup, source discovery, instance
//! resolution, placement constraints, top module and alignment. Between files
//! and between constraint records the job checks its [`CancelToken`]; a
//! cancelled load publishes what it has, which is always a consistent graph.
//! The constraint phase replaces whatever constraints the copy carried over.
use std::{
    io,
    ops::ControlFlow,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use irvmodel::{
    constraints::manager::{PlacementConstraintManager, RecordOutcome},
    hierarchy::{Hierarchy, Registration, ResolutionSummary, attach::AlignmentSummary},
    scanner,
};
use log::{debug, info, warn};

use crate::{
    config::ProjectConfig,
    magic::LOADER_THREAD_NAME,
    progress::{Progress, ProgressKind, ProgressSink},
    store::{DesignStore, LoadStatus, WriterGuard},
    utils::error::{IrvError, IrvResult},
};

/// Shared flag asking a load to stop at its next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Totals of one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub generation: u64,
    pub status: LoadStatus,
    pub macro_files: usize,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub modules: usize,
    pub resolution: ResolutionSummary,
    pub constraints_attached: usize,
    pub constraints_rejected: usize,
    /// Set when an unknown constraint type stopped the constraint batch.
    pub constraints_aborted: bool,
    pub alignment: AlignmentSummary,
}

impl Default for LoadSummary {
    fn default() -> Self {
        Self {
            generation: 0,
            status: LoadStatus::Loading,
            macro_files: 0,
            files_scanned: 0,
            files_skipped: 0,
            modules: 0,
            resolution: ResolutionSummary::default(),
            constraints_attached: 0,
            constraints_rejected: 0,
            constraints_aborted: false,
            alignment: AlignmentSummary::default(),
        }
    }
}

/// Handle on a running load.
#[derive(Debug)]
pub struct LoadHandle {
    cancel: CancelToken,
    thread: JoinHandle<IrvResult<LoadSummary>>,
}

impl LoadHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the load to end.
    pub fn join(self) -> IrvResult<LoadSummary> {
        self.thread.join().map_err(|_| IrvError::LoaderPanicked)?
    }
}

impl DesignStore {
    /// Start a load of `config` on a background thread.
    ///
    /// Fails with [`IrvError::LoadInProgress`] while another load runs. The
    /// store is marked as loading before this returns.
    pub fn begin_load(
        self: &Arc<Self>,
        config: ProjectConfig,
        manager: PlacementConstraintManager,
        sink: Arc<dyn ProgressSink>,
    ) -> IrvResult<LoadHandle> {
        self.begin_load_with(config, manager, sink, CancelToken::new())
    }

    /// Like [`DesignStore::begin_load`], observing an existing cancel token.
    pub fn begin_load_with(
        self: &Arc<Self>,
        config: ProjectConfig,
        manager: PlacementConstraintManager,
        sink: Arc<dyn ProgressSink>,
        cancel: CancelToken,
    ) -> IrvResult<LoadHandle> {
        self.start_load(config, manager, sink, cancel, |job| {
            std::thread::Builder::new()
                .name(LOADER_THREAD_NAME.to_string())
                .spawn(move || job.run())
        })
    }

    /// Mark the store as loading and hand the job to `spawn`.
    ///
    /// When `spawn` fails the store is published as [`LoadStatus::Failed`]
    /// before the writer is released.
    fn start_load<S>(
        self: &Arc<Self>,
        config: ProjectConfig,
        manager: PlacementConstraintManager,
        sink: Arc<dyn ProgressSink>,
        cancel: CancelToken,
        spawn: S,
    ) -> IrvResult<LoadHandle>
    where
        S: FnOnce(LoadJob) -> io::Result<JoinHandle<IrvResult<LoadSummary>>>,
    {
        let writer = Arc::new(self.acquire_writer()?);
        let hierarchy = self.snapshot().hierarchy.clone();
        writer.store().publish(LoadStatus::Loading, hierarchy.clone());

        let reporter = Reporter {
            writer: writer.clone(),
            sink,
            step: 0,
            total: 0,
            unpublished: 0,
            publish_interval: config.load.publish_interval.max(1),
        };
        let job = LoadJob {
            reporter,
            config,
            manager,
            cancel: cancel.clone(),
            hierarchy,
            summary: LoadSummary::default(),
        };

        match spawn(job) {
            Ok(thread) => Ok(LoadHandle { cancel, thread }),
            Err(e) => {
                warn!("Could not start the loader thread: {}", e);
                let hierarchy = self.snapshot().hierarchy.clone();
                writer.store().publish(LoadStatus::Failed, hierarchy);
                Err(e.into())
            }
        }
    }

    /// Run a load to completion on a background thread and wait for it.
    pub fn load(
        self: &Arc<Self>,
        config: ProjectConfig,
        manager: PlacementConstraintManager,
        sink: Arc<dyn ProgressSink>,
    ) -> IrvResult<LoadSummary> {
        self.begin_load(config, manager, sink)?.join()
    }
}

/// Outcome of a phase: keep going, or stop because of a cancellation.
enum Flow {
    Continue,
    Cancelled,
}

/// Progress events and intermediate publication of a running load.
struct Reporter {
    writer: Arc<WriterGuard>,
    sink: Arc<dyn ProgressSink>,
    step: usize,
    total: usize,
    unpublished: usize,
    publish_interval: usize,
}

impl Reporter {
    fn emit(&self, kind: ProgressKind) {
        self.sink.report(Progress::new(self.step, self.total, kind));
    }

    /// Count one coarse step and publish when the interval is reached.
    fn advance(&mut self, hierarchy: &Hierarchy) {
        self.step += 1;
        self.unpublished += 1;
        if self.unpublished >= self.publish_interval {
            self.unpublished = 0;
            self.writer
                .store()
                .publish(LoadStatus::Loading, hierarchy.clone());
        }
    }
}

struct LoadJob {
    reporter: Reporter,
    config: ProjectConfig,
    manager: PlacementConstraintManager,
    cancel: CancelToken,
    hierarchy: Hierarchy,
    summary: LoadSummary,
}

impl LoadJob {
    fn run(mut self) -> IrvResult<LoadSummary> {
        let files = self.source_files();
        let constraints = self.config.placement_constraints.len();
        self.reporter.total = self.config.macros.eager.len() + files.len() + constraints + 2;
        info!(
            "Loading design: {} source files, {} placement constraints",
            files.len(),
            constraints
        );
        self.emit(ProgressKind::Started {
            files: files.len(),
            constraints,
        });

        match self.load(files) {
            Ok(Flow::Continue) => Ok(self.finish(LoadStatus::Complete)),
            Ok(Flow::Cancelled) => {
                info!(
                    "Design load cancelled at step {}/{}",
                    self.reporter.step, self.reporter.total
                );
                self.emit(ProgressKind::Cancelled);
                Ok(self.finish(LoadStatus::Cancelled))
            }
            Err(e) => {
                warn!("Design load failed: {}", e);
                self.finish(LoadStatus::Failed);
                Err(e)
            }
        }
    }

    fn load(&mut self, files: Vec<PathBuf>) -> IrvResult<Flow> {
        if let Flow::Cancelled = self.load_macros() {
            return Ok(Flow::Cancelled);
        }

        let stackup = self.config.stackup()?;
        self.hierarchy.set_stackup(stackup);
        self.advance();

        if let Flow::Cancelled = self.discover(files) {
            return Ok(Flow::Cancelled);
        }

        let resolution = self.hierarchy.resolve_instances();
        self.summary.resolution = resolution;
        self.summary.modules = self.hierarchy.module_count();
        self.emit(ProgressKind::Resolved {
            resolved: resolution.resolved,
            pending: resolution.pending,
            pending_references: resolution.pending_references,
        });
        self.advance();

        if let Flow::Cancelled = self.attach_constraints() {
            return Ok(Flow::Cancelled);
        }

        self.select_top_module();
        self.summary.resolution = self.hierarchy.resolve_pending();
        self.summary.alignment = self.hierarchy.check_alignment_all();
        Ok(Flow::Continue)
    }

    fn source_files(&self) -> Vec<PathBuf> {
        let sources = &self.config.sources;
        let mut files: Vec<PathBuf> = sources
            .dirs
            .iter()
            .flat_map(|dir| scanner::source_files_in(dir, &sources.extension))
            .collect();
        files.extend(sources.files.iter().cloned());
        files
    }

    fn load_macros(&mut self) -> Flow {
        let eager = self.config.macros.eager.clone();
        for path in eager {
            if self.cancel.is_cancelled() {
                return Flow::Cancelled;
            }
            match self.hierarchy.macros_mut().add_by_path(&path) {
                Ok(count) => {
                    self.summary.macro_files += 1;
                    self.emit(ProgressKind::MacroLoaded { path, count });
                }
                Err(e) => {
                    warn!("Macro library skipped: {}", e);
                    self.emit(ProgressKind::MacroFailed {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
            self.advance();
        }

        for entry in &self.config.macros.lazy {
            self.hierarchy
                .macros_mut()
                .add_lazy_by_path(entry.name.clone(), entry.path.clone());
        }
        Flow::Continue
    }

    fn discover(&mut self, files: Vec<PathBuf>) -> Flow {
        for file in files {
            if self.cancel.is_cancelled() {
                return Flow::Cancelled;
            }
            match self.hierarchy.register_file(&file) {
                Ok(registrations) => {
                    self.summary.files_scanned += 1;
                    let modules = registrations.len();
                    for registration in registrations {
                        if let Registration::Redefined { key, previous_file } = registration {
                            let name = self
                                .hierarchy
                                .module(key)
                                .map(|module| module.name().to_string())
                                .unwrap_or_default();
                            self.emit(ProgressKind::ModuleRedefined {
                                name,
                                file: file.clone(),
                                previous_file,
                            });
                        }
                    }
                    self.emit(ProgressKind::FileScanned { file, modules });
                }
                Err(e) => {
                    warn!("Skipping source file: {}", e);
                    self.summary.files_skipped += 1;
                    self.emit(ProgressKind::FileSkipped {
                        file,
                        reason: e.to_string(),
                    });
                }
            }
            self.advance();
        }
        Flow::Continue
    }

    /// Replace the attached constraints with the configured batch.
    fn attach_constraints(&mut self) -> Flow {
        if self.cancel.is_cancelled() {
            return Flow::Cancelled;
        }
        self.hierarchy.clear_constraints();

        let Self {
            reporter,
            config,
            manager,
            cancel,
            hierarchy,
            summary,
        } = self;
        let report = manager.deserialize_all_with(
            &config.placement_constraints,
            hierarchy,
            config.load.on_unknown_constraint,
            |hierarchy, index, record, outcome| {
                reporter.emit(match outcome {
                    RecordOutcome::Attached(_) => ProgressKind::ConstraintAttached {
                        path: record.path.clone(),
                    },
                    RecordOutcome::Rejected(e) => ProgressKind::ConstraintRejected {
                        index,
                        path: record.path.clone(),
                        reason: e.to_string(),
                    },
                });
                reporter.advance(hierarchy);
                if cancel.is_cancelled() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );

        summary.constraints_attached = report.attached.len();
        summary.constraints_rejected = report.rejected.len();
        summary.constraints_aborted = report.aborted;
        if report.interrupted {
            Flow::Cancelled
        } else {
            Flow::Continue
        }
    }

    fn select_top_module(&mut self) {
        if let Some(name) = self.config.top_module.clone() {
            if let Err(e) = self.hierarchy.set_top_module_by_name(&name) {
                warn!("Configured top module ignored: {}", e);
            }
            return;
        }
        if self.hierarchy.top_module().is_some() {
            return;
        }
        if let [only] = self.hierarchy.candidate_tops().as_slice() {
            let name = self
                .hierarchy
                .module(*only)
                .map(|module| module.name().to_string())
                .unwrap_or_default();
            debug!("Top module inferred as `{}`", name);
            self.hierarchy.set_top_module(Some(*only));
        }
    }

    fn emit(&self, kind: ProgressKind) {
        self.reporter.emit(kind);
    }

    fn advance(&mut self) {
        self.reporter.advance(&self.hierarchy);
    }

    fn finish(&mut self, status: LoadStatus) -> LoadSummary {
        let hierarchy = std::mem::take(&mut self.hierarchy);
        let generation = self.reporter.writer.store().publish(status, hierarchy);
        self.summary.generation = generation;
        self.summary.status = status;
        self.emit(ProgressKind::Finished { generation, status });
        self.summary.clone()
    }
}
