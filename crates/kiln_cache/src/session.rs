//! The session driver.
//!
//! A [`Session`] owns the registry, graph, fingerprints and result cache for
//! one compilation run:
//!
//! 1. [`Session::start`] loads the previous state (incremental mode only),
//!    fingerprints the supplied inputs, detects changes and invalidates
//!    every entry that depends on a changed input.
//! 2. [`Session::run_phase`] executes a phase. Steps whose node is still
//!    cached are reused; the rest run in waves on a rayon pool, each wave
//!    against an immutable snapshot of available values, with results
//!    committed sequentially between waves.
//! 3. [`Session::finish`] prunes unreachable nodes and persists the state.
//!    Dropping a session without finishing it persists nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use kiln_common::{Fingerprint, NodeId};
use rayon::prelude::*;
use serde::de::DeserializeOwned;

use crate::changes::ChangeSet;
use crate::codec;
use crate::context::{QueryContext, StepError};
use crate::descriptor::{Descriptor, NodeKind};
use crate::error::SessionError;
use crate::fingerprints::FingerprintStore;
use crate::graph::DependencyGraph;
use crate::invalidate::invalidate;
use crate::manifest::{CacheManifest, CacheState};
use crate::registry::NodeRegistry;
use crate::result_cache::ResultCache;
use crate::step::Step;

/// Version stamped into caches by default. A cache written by another
/// version is discarded on load.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How a session loads, runs and persists.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory holding the manifest and value artifacts.
    pub cache_dir: PathBuf,

    /// Version string stamped into the cache. A different version discards it.
    pub tool_version: String,

    /// Reuse the previous session's results. When `false` the session
    /// recomputes everything and overwrites the cache.
    pub incremental: bool,

    /// Drop nodes not reachable from anything this session touched.
    pub prune_unvisited: bool,

    /// Worker threads for parallel waves; `0` picks rayon's default.
    pub jobs: usize,
}

impl SessionOptions {
    /// Incremental options for `cache_dir` with pruning and default threads.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            tool_version: TOOL_VERSION.to_string(),
            incremental: true,
            prune_unvisited: true,
            jobs: 0,
        }
    }

    /// Sets incremental or batch mode.
    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Sets the version stamped into the cache.
    pub fn tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    /// Enables or disables pruning of unvisited nodes.
    pub fn prune_unvisited(mut self, prune: bool) -> Self {
        self.prune_unvisited = prune;
        self
    }

    /// Sets the number of worker threads.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }
}

/// Inputs supplied to a session, keyed by descriptor.
#[derive(Debug, Clone, Default)]
pub struct InputSet {
    inputs: BTreeMap<Descriptor, Vec<u8>>,
}

impl InputSet {
    /// Creates an empty input set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an input. Rejects derived descriptors.
    pub fn insert(
        &mut self,
        descriptor: Descriptor,
        content: impl Into<Vec<u8>>,
    ) -> Result<(), SessionError> {
        if descriptor.kind() != NodeKind::Input {
            return Err(SessionError::NotAnInput {
                node: descriptor.to_string(),
            });
        }
        self.inputs.insert(descriptor, content.into());
        Ok(())
    }

    /// Returns the content of `descriptor`, if supplied.
    pub fn get(&self, descriptor: &Descriptor) -> Option<&[u8]> {
        self.inputs.get(descriptor).map(Vec::as_slice)
    }

    /// Returns the number of inputs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns `true` if there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// What happened during one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    /// Phase name.
    pub name: String,
    /// Nodes served from the cache.
    pub reused: Vec<String>,
    /// Nodes computed, in commit order.
    pub computed: Vec<String>,
    /// Number of parallel waves executed.
    pub waves: usize,
}

/// What happened during a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Whether the session ran in incremental mode.
    pub incremental: bool,
    /// Whether a previous cache was loaded.
    pub loaded: bool,
    /// Inputs not seen by the previous session.
    pub new_inputs: usize,
    /// Inputs whose content changed.
    pub modified_inputs: usize,
    /// Inputs that disappeared.
    pub deleted_inputs: usize,
    /// Inputs with unchanged content.
    pub unchanged_inputs: usize,
    /// Cache entries removed by invalidation.
    pub invalidated: usize,
    /// Recomputed values that turned out byte-identical to their previous value.
    pub unchanged_recomputations: usize,
    /// Nodes dropped at the end of the session as unreachable.
    pub pruned: usize,
    /// Per-phase details, in execution order.
    pub phases: Vec<PhaseReport>,
}

impl SessionReport {
    /// Total nodes served from the cache.
    pub fn reused(&self) -> usize {
        self.phases.iter().map(|p| p.reused.len()).sum()
    }

    /// Total nodes computed.
    pub fn computed(&self) -> usize {
        self.phases.iter().map(|p| p.computed.len()).sum()
    }
}

/// One compilation run over an exclusively owned cache.
pub struct Session {
    options: SessionOptions,
    state: CacheState,
    values: HashMap<NodeId, Vec<u8>>,
    written: HashSet<NodeId>,
    visited: BTreeSet<NodeId>,
    previous: BTreeMap<NodeId, Fingerprint>,
    pool: rayon::ThreadPool,
    report: SessionReport,
    aborted: bool,
}

impl Session {
    /// Starts a session over `inputs`.
    ///
    /// In incremental mode the previous state is loaded from
    /// `options.cache_dir`; an absent, foreign or corrupt cache silently
    /// degrades to a fresh one. Stale entries are removed before this
    /// returns, so every remaining cache entry is valid for the session.
    pub fn start(options: SessionOptions, inputs: InputSet) -> Result<Self, SessionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .map_err(|e| SessionError::ThreadPool(e.to_string()))?;

        let (mut state, loaded) = if options.incremental {
            load_state(&options)
        } else {
            (CacheState::fresh(&options.cache_dir, &options.tool_version), false)
        };

        let mut values = HashMap::with_capacity(inputs.len());
        let mut current = BTreeMap::new();
        for (descriptor, content) in inputs.inputs {
            let id = state.registry.intern(&descriptor);
            current.insert(id, Fingerprint::of(&content));
            values.insert(id, content);
        }

        let registry = &state.registry;
        let previous_inputs = state
            .fingerprints
            .filtered(|n| registry.kind(n) == Some(NodeKind::Input));
        let previous = state
            .fingerprints
            .filtered(|n| registry.kind(n) == Some(NodeKind::Derived));
        let changes = ChangeSet::detect(&current, &previous_inputs);

        let removed = invalidate(
            &changes.changed(),
            &mut state.graph,
            &mut state.fingerprints,
            &mut state.cache,
        )?;
        for &gone in &changes.deleted_inputs {
            state.fingerprints.remove(gone);
            state.graph.remove_node(gone);
        }
        for (&id, &fingerprint) in &current {
            state.fingerprints.record(id, fingerprint);
            state.graph.add_node(id);
        }

        let report = SessionReport {
            incremental: options.incremental,
            loaded,
            new_inputs: changes.new_inputs.len(),
            modified_inputs: changes.modified_inputs.len(),
            deleted_inputs: changes.deleted_inputs.len(),
            unchanged_inputs: changes.unchanged_inputs.len(),
            invalidated: removed.len(),
            ..SessionReport::default()
        };
        tracing::info!(
            "session started ({} mode): {} new, {} modified, {} deleted, {} unchanged input(s); {} entr(ies) invalidated",
            if options.incremental { "incremental" } else { "batch" },
            report.new_inputs,
            report.modified_inputs,
            report.deleted_inputs,
            report.unchanged_inputs,
            report.invalidated
        );

        Ok(Self {
            options,
            state,
            values,
            written: HashSet::new(),
            visited: current.into_keys().collect(),
            previous,
            pool,
            report,
            aborted: false,
        })
    }

    /// Runs one phase.
    ///
    /// Each step's node is reused from the cache when present and computed
    /// otherwise. A step that reads another step of the same phase waits
    /// for it. Fails if a node is written twice in the session, if a step
    /// reads something that will never exist, if steps wait on each other
    /// in a cycle, or if a computation fails.
    ///
    /// Any failure aborts the session: later phases and [`Session::finish`]
    /// return [`SessionError::Aborted`] and nothing is persisted.
    pub fn run_phase(&mut self, name: &str, steps: Vec<Step>) -> Result<PhaseReport, SessionError> {
        if self.aborted {
            return Err(SessionError::Aborted);
        }
        let result = self.execute_phase(name, steps);
        if let Err(e) = &result {
            tracing::warn!("phase {name} aborted the session: {e}");
            self.aborted = true;
        }
        result
    }

    fn execute_phase(&mut self, name: &str, steps: Vec<Step>) -> Result<PhaseReport, SessionError> {
        let mut phase = PhaseReport {
            name: name.to_string(),
            ..PhaseReport::default()
        };

        let mut pending: Vec<(NodeId, Step)> = Vec::with_capacity(steps.len());
        for step in steps {
            let descriptor = step.descriptor();
            if descriptor.kind() != NodeKind::Derived {
                return Err(SessionError::InputWrite {
                    node: descriptor.to_string(),
                });
            }
            let id = self.state.registry.intern(descriptor);
            if !self.written.insert(id) {
                return Err(SessionError::DuplicateWrite {
                    node: descriptor.to_string(),
                });
            }
            match self.state.cache.get(id) {
                Some(value) => {
                    tracing::debug!("reuse {descriptor}");
                    phase.reused.push(descriptor.to_string());
                    self.values.insert(id, value);
                    self.visited.insert(id);
                }
                None => pending.push((id, step)),
            }
        }

        while !pending.is_empty() {
            phase.waves += 1;
            let scheduled: HashSet<NodeId> = pending.iter().map(|(id, _)| *id).collect();
            let registry = &self.state.registry;
            let values = &self.values;
            let outcomes: Vec<(Result<Vec<u8>, StepError>, BTreeSet<NodeId>)> =
                self.pool.install(|| {
                    pending
                        .par_iter()
                        .map(|(id, step)| {
                            let mut cx = QueryContext::new(registry, values, &scheduled, *id);
                            let result = step.run(&mut cx);
                            (result, cx.into_reads())
                        })
                        .collect()
                });

            let mut deferred = Vec::new();
            for ((id, step), (result, reads)) in pending.into_iter().zip(outcomes) {
                match result {
                    Ok(value) => {
                        tracing::debug!("computed {}", step.descriptor());
                        phase.computed.push(step.descriptor().to_string());
                        self.commit(id, value, reads)?;
                    }
                    Err(StepError::NotReady(_)) => deferred.push((id, step)),
                    Err(StepError::Missing(dependency)) => {
                        return Err(SessionError::MissingDependency {
                            node: step.descriptor().to_string(),
                            dependency: self.state.registry.describe(dependency),
                        });
                    }
                    Err(StepError::Decode { node, reason }) => {
                        return Err(SessionError::Decode {
                            node: self.state.registry.describe(node),
                            reason,
                        });
                    }
                    Err(StepError::Failed(message)) => {
                        return Err(SessionError::StepFailed {
                            node: step.descriptor().to_string(),
                            message,
                        });
                    }
                }
            }

            if !deferred.is_empty() && deferred.len() == scheduled.len() {
                return Err(SessionError::DependencyCycle {
                    nodes: deferred
                        .iter()
                        .map(|(_, step)| step.descriptor().to_string())
                        .collect(),
                });
            }
            pending = deferred;
        }

        tracing::info!(
            "phase {name}: {} reused, {} computed in {} wave(s)",
            phase.reused.len(),
            phase.computed.len(),
            phase.waves
        );
        self.report.phases.push(phase.clone());
        Ok(phase)
    }

    fn commit(
        &mut self,
        id: NodeId,
        value: Vec<u8>,
        reads: BTreeSet<NodeId>,
    ) -> Result<(), SessionError> {
        self.state.graph.set_dependencies(id, reads)?;
        let fingerprint = self
            .state
            .cache
            .put(id, value.clone(), &mut self.state.fingerprints);
        if self.previous.get(&id) == Some(&fingerprint) {
            tracing::debug!(
                "{} recomputed to an identical value",
                self.state.registry.describe(id)
            );
            self.report.unchanged_recomputations += 1;
        }
        self.values.insert(id, value);
        self.visited.insert(id);
        Ok(())
    }

    /// Returns the bytes of `descriptor` if it is available in this session.
    pub fn value(&self, descriptor: &Descriptor) -> Option<&[u8]> {
        let id = self.state.registry.get(descriptor)?;
        self.values.get(&id).map(Vec::as_slice)
    }

    /// Returns the decoded value of a derived node if it is available.
    pub fn value_as<T: DeserializeOwned>(
        &self,
        descriptor: &Descriptor,
    ) -> Result<Option<T>, SessionError> {
        self.value(descriptor)
            .map(|bytes| {
                codec::decode(bytes).map_err(|reason| SessionError::Decode {
                    node: descriptor.to_string(),
                    reason,
                })
            })
            .transpose()
    }

    /// Returns the report so far.
    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Returns the node registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.state.registry
    }

    /// Returns the dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.state.graph
    }

    /// Returns the fingerprint store.
    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.state.fingerprints
    }

    /// Returns the result cache.
    pub fn cache(&self) -> &ResultCache {
        &self.state.cache
    }

    /// Ends the session and persists its state.
    ///
    /// Value artifacts are written first and the manifest last, so an
    /// interruption leaves the previous manifest in charge.
    ///
    /// Fails with [`SessionError::Aborted`] after a failed phase.
    pub fn finish(mut self) -> Result<SessionReport, SessionError> {
        if self.aborted {
            return Err(SessionError::Aborted);
        }
        self.state.graph.dependency_order()?;

        if self.options.prune_unvisited {
            let live = self
                .state
                .graph
                .reachable_from(self.visited.iter().copied());
            for node in self.state.graph.nodes() {
                if !live.contains(&node) {
                    self.state.graph.remove_node(node);
                    self.state.fingerprints.remove(node);
                    self.state.cache.remove(node);
                    self.report.pruned += 1;
                }
            }
        }

        let written = self.state.cache.flush()?;
        CacheManifest::capture(&self.options.tool_version, &self.state)
            .save(&self.options.cache_dir)?;
        let collected = self.state.cache.gc()?;

        tracing::info!(
            "session finished: {} reused, {} computed, {} pruned, {} artifact(s) written, {} collected",
            self.report.reused(),
            self.report.computed(),
            self.report.pruned,
            written,
            collected
        );
        Ok(self.report)
    }
}

fn load_state(options: &SessionOptions) -> (CacheState, bool) {
    let fresh = || CacheState::fresh(&options.cache_dir, &options.tool_version);
    let Some(manifest) = CacheManifest::load(&options.cache_dir) else {
        return (fresh(), false);
    };
    if !manifest.is_compatible(&options.tool_version) {
        tracing::warn!(
            "cache in {} was written by version {}; starting fresh",
            options.cache_dir.display(),
            manifest.tool_version
        );
        return (fresh(), false);
    }
    match manifest.restore(&options.cache_dir) {
        Ok(state) => (state, true),
        Err(e) => {
            tracing::warn!(
                "discarding cache in {}: {e}",
                options.cache_dir.display()
            );
            (fresh(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &std::path::Path) -> SessionOptions {
        SessionOptions::new(dir).tool_version("test").jobs(2)
    }

    fn cell(name: &str) -> Descriptor {
        Descriptor::input("cell", name)
    }

    fn parse_cell(cx: &mut QueryContext<'_>, name: &str) -> Result<i64, StepError> {
        cx.read_text(&cell(name))?
            .trim()
            .parse::<i64>()
            .map_err(|e| StepError::failed(format!("{e}")))
    }

    #[test]
    fn input_set_rejects_derived() {
        let mut inputs = InputSet::new();
        assert!(inputs.insert(Descriptor::derived("q", "x"), "1").is_err());
        assert!(inputs.is_empty());
    }

    #[test]
    fn step_for_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
        let err = session
            .run_phase("p", vec![Step::new(cell("a"), |_| Ok(1i64))])
            .unwrap_err();
        assert!(matches!(err, SessionError::InputWrite { .. }));
    }

    #[test]
    fn duplicate_write_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
        let d = Descriptor::derived("const", "one");
        session
            .run_phase("p1", vec![Step::new(d.clone(), |_| Ok(1i64))])
            .unwrap();
        let err = session
            .run_phase("p2", vec![Step::new(d, |_| Ok(1i64))])
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateWrite { .. }));
    }

    #[test]
    fn steps_in_one_phase_wait_for_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = InputSet::new();
        inputs.insert(cell("a"), "20").unwrap();
        let mut session = Session::start(options(dir.path()), inputs).unwrap();

        let double = Descriptor::derived("double", "a");
        let plus_one = Descriptor::derived("plus_one", "double");
        let d = double.clone();
        let phase = session
            .run_phase(
                "analyze",
                vec![
                    Step::new(plus_one.clone(), move |cx| Ok(cx.read::<i64>(&d)? + 1)),
                    Step::new(double, |cx| Ok(parse_cell(cx, "a")? * 2)),
                ],
            )
            .unwrap();
        assert_eq!(phase.waves, 2);
        assert_eq!(session.value_as::<i64>(&plus_one).unwrap(), Some(41));
    }

    #[test]
    fn mutual_reads_are_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
        let x = Descriptor::derived("v", "x");
        let y = Descriptor::derived("v", "y");
        let (rx, ry) = (y.clone(), x.clone());
        let err = session
            .run_phase(
                "analyze",
                vec![
                    Step::new(x, move |cx| cx.read::<i64>(&rx)),
                    Step::new(y, move |cx| cx.read::<i64>(&ry)),
                ],
            )
            .unwrap_err();
        match err {
            SessionError::DependencyCycle { nodes } => assert_eq!(nodes.len(), 2),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn self_read_is_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
        let x = Descriptor::derived("v", "x");
        let me = x.clone();
        let err = session
            .run_phase("p", vec![Step::new(x, move |cx| cx.read::<i64>(&me))])
            .unwrap_err();
        assert!(matches!(err, SessionError::DependencyCycle { .. }));
    }

    #[test]
    fn reading_an_unknown_node_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
        let err = session
            .run_phase(
                "p",
                vec![Step::new(Descriptor::derived("v", "x"), |cx| {
                    cx.read::<i64>(&Descriptor::derived("v", "nowhere"))
                })],
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingDependency { .. }));
    }

    #[test]
    fn failed_step_aborts_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
            let err = session
                .run_phase(
                    "p",
                    vec![Step::new(Descriptor::derived("v", "x"), |_| {
                        Err::<i64, _>(StepError::failed("boom"))
                    })],
                )
                .unwrap_err();
            assert!(err.to_string().contains("boom"));
        }
        assert!(CacheManifest::load(dir.path()).is_none());
    }

    #[test]
    fn failed_phase_blocks_later_phases_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::start(options(dir.path()), InputSet::new()).unwrap();
        session
            .run_phase("p", vec![Step::new(Descriptor::derived("v", "ok"), |_| Ok(1i64))])
            .unwrap();
        session
            .run_phase(
                "q",
                vec![Step::new(Descriptor::derived("v", "bad"), |_| {
                    Err::<i64, _>(StepError::failed("boom"))
                })],
            )
            .unwrap_err();

        let err = session
            .run_phase("r", vec![Step::new(Descriptor::derived("v", "late"), |_| Ok(2i64))])
            .unwrap_err();
        assert!(matches!(err, SessionError::Aborted));
        assert!(matches!(session.finish(), Err(SessionError::Aborted)));
        assert!(CacheManifest::load(dir.path()).is_none());
        assert!(!dir.path().join("values").exists());
    }

    #[test]
    fn batch_mode_ignores_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let d = Descriptor::derived("const", "one");
        for incremental in [true, false] {
            let mut session =
                Session::start(options(dir.path()).incremental(incremental), InputSet::new())
                    .unwrap();
            session
                .run_phase("p", vec![Step::new(d.clone(), |_| Ok(1i64))])
                .unwrap();
            let report = session.finish().unwrap();
            assert!(!report.loaded);
            assert_eq!(report.computed(), 1);
        }
    }

    #[test]
    fn foreign_version_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let d = Descriptor::derived("const", "one");
        let mut first = Session::start(options(dir.path()), InputSet::new()).unwrap();
        first
            .run_phase("p", vec![Step::new(d.clone(), |_| Ok(1i64))])
            .unwrap();
        first.finish().unwrap();

        let mut second = Session::start(
            options(dir.path()).tool_version("other"),
            InputSet::new(),
        )
        .unwrap();
        let phase = second
            .run_phase("p", vec![Step::new(d, |_| Ok(1i64))])
            .unwrap();
        assert!(!second.report().loaded);
        assert_eq!(phase.computed.len(), 1);
    }

    #[test]
    fn unvisited_nodes_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let keep = Descriptor::derived("const", "keep");
        let drop = Descriptor::derived("const", "drop");

        let mut first = Session::start(options(dir.path()), InputSet::new()).unwrap();
        first
            .run_phase(
                "p",
                vec![
                    Step::new(keep.clone(), |_| Ok(1i64)),
                    Step::new(drop.clone(), |_| Ok(2i64)),
                ],
            )
            .unwrap();
        first.finish().unwrap();

        let mut second = Session::start(options(dir.path()), InputSet::new()).unwrap();
        second
            .run_phase("p", vec![Step::new(keep, |_| Ok(1i64))])
            .unwrap();
        let report = second.finish().unwrap();
        assert_eq!(report.pruned, 1);

        let manifest = CacheManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.entries.len(), 1);
        let values = std::fs::read_dir(dir.path().join("values")).unwrap().count();
        assert_eq!(values, 1);
    }
}
