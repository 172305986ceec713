//! End-to-end behaviour of sessions across runs over a shared cache directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_cache::{
    CacheManifest, Descriptor, InputSet, QueryContext, Session, SessionOptions, SessionReport,
    Step, StepError,
};

fn cell(name: &str) -> Descriptor {
    Descriptor::input("cell", name)
}

fn var(name: &str) -> Descriptor {
    Descriptor::derived("var", name)
}

fn number(cx: &mut QueryContext<'_>, name: &str) -> Result<i64, StepError> {
    cx.read_text(&cell(name))?
        .trim()
        .parse::<i64>()
        .map_err(|e| StepError::failed(format!("cell {name}: {e}")))
}

/// Counts how often each derived variable is computed.
#[derive(Default, Clone)]
struct Counters {
    v1: Arc<AtomicUsize>,
    v2: Arc<AtomicUsize>,
}

impl Counters {
    fn take(&self) -> (usize, usize) {
        (self.v1.swap(0, Ordering::SeqCst), self.v2.swap(0, Ordering::SeqCst))
    }
}

/// `v1 = b * c` in phase "analyze", `v2 = a + v1` in phase "link".
fn run(
    dir: &Path,
    cells: &[(&str, &str)],
    counters: &Counters,
    incremental: bool,
) -> (SessionReport, i64, i64) {
    let mut inputs = InputSet::new();
    for (name, text) in cells {
        inputs.insert(cell(name), *text).unwrap();
    }
    let options = SessionOptions::new(dir)
        .tool_version("test")
        .incremental(incremental)
        .jobs(2);
    let mut session = Session::start(options, inputs).unwrap();

    let calls = Arc::clone(&counters.v1);
    session
        .run_phase(
            "analyze",
            vec![Step::new(var("v1"), move |cx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(number(cx, "b")? * number(cx, "c")?)
            })],
        )
        .unwrap();

    let calls = Arc::clone(&counters.v2);
    session
        .run_phase(
            "link",
            vec![Step::new(var("v2"), move |cx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(number(cx, "a")? + cx.read::<i64>(&var("v1"))?)
            })],
        )
        .unwrap();

    let v1 = session.value_as::<i64>(&var("v1")).unwrap().unwrap();
    let v2 = session.value_as::<i64>(&var("v2")).unwrap().unwrap();
    (session.finish().unwrap(), v1, v2)
}

const BASE: &[(&str, &str)] = &[("a", "1"), ("b", "2"), ("c", "3")];

#[test]
fn first_session_computes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    let (report, v1, v2) = run(dir.path(), BASE, &counters, true);
    assert_eq!((v1, v2), (6, 7));
    assert_eq!(counters.take(), (1, 1));
    assert!(!report.loaded);
    assert_eq!(report.new_inputs, 3);
    assert_eq!(report.computed(), 2);
}

#[test]
fn changing_a_reuses_v1_and_recomputes_v2() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    run(dir.path(), BASE, &counters, true);
    counters.take();

    let (report, v1, v2) = run(dir.path(), &[("a", "4"), ("b", "2"), ("c", "3")], &counters, true);
    assert_eq!((v1, v2), (6, 10));
    assert_eq!(counters.take(), (0, 1));
    assert_eq!(report.modified_inputs, 1);
    assert_eq!(report.invalidated, 1);
    assert_eq!(report.phases[0].reused, vec!["derived:var:v1".to_string()]);
}

#[test]
fn changing_b_recomputes_both() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    run(dir.path(), BASE, &counters, true);
    counters.take();

    let (report, v1, v2) = run(dir.path(), &[("a", "1"), ("b", "5"), ("c", "3")], &counters, true);
    assert_eq!((v1, v2), (15, 16));
    assert_eq!(counters.take(), (1, 1));
    assert_eq!(report.invalidated, 2);
}

#[test]
fn unchanged_inputs_reuse_everything() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    run(dir.path(), BASE, &counters, true);
    counters.take();

    let (report, v1, v2) = run(dir.path(), BASE, &counters, true);
    assert_eq!((v1, v2), (6, 7));
    assert_eq!(counters.take(), (0, 0));
    assert!(report.loaded);
    assert_eq!(report.invalidated, 0);
    assert_eq!(report.reused(), 2);
    assert_eq!(report.pruned, 0);
}

#[test]
fn unrelated_edit_invalidates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    let with_extra = [("a", "1"), ("b", "2"), ("c", "3"), ("z", "100")];
    run(dir.path(), &with_extra, &counters, true);
    counters.take();

    let edited = [("a", "1"), ("b", "2"), ("c", "3"), ("z", "-5")];
    let (report, _, _) = run(dir.path(), &edited, &counters, true);
    assert_eq!(report.modified_inputs, 1);
    assert_eq!(report.invalidated, 0);
    assert_eq!(counters.take(), (0, 0));
}

#[test]
fn equal_recomputation_is_counted() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    run(dir.path(), BASE, &counters, true);

    // b*c stays 6 when b and c swap.
    let swapped = [("a", "1"), ("b", "3"), ("c", "2")];
    let (report, v1, _) = run(dir.path(), &swapped, &counters, true);
    assert_eq!(v1, 6);
    assert_eq!(report.unchanged_recomputations, 2);
}

#[test]
fn incremental_matches_batch() {
    let edits: [&[(&str, &str)]; 4] = [
        BASE,
        &[("a", "4"), ("b", "2"), ("c", "3")],
        &[("a", "4"), ("b", "-7"), ("c", "3")],
        &[("a", "0"), ("b", "-7"), ("c", "9")],
    ];
    let incremental_dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    for cells in edits {
        let batch_dir = tempfile::tempdir().unwrap();
        let (_, i1, i2) = run(incremental_dir.path(), cells, &counters, true);
        let (_, b1, b2) = run(batch_dir.path(), cells, &counters, false);
        assert_eq!((i1, i2), (b1, b2));
    }
}

#[test]
fn corrupt_manifest_falls_back_to_recomputation() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    run(dir.path(), BASE, &counters, true);
    counters.take();

    std::fs::write(CacheManifest::path(dir.path()), "{ not json").unwrap();
    let (report, v1, v2) = run(dir.path(), BASE, &counters, true);
    assert!(!report.loaded);
    assert_eq!((v1, v2), (6, 7));
    assert_eq!(counters.take(), (1, 1));
}

#[test]
fn corrupt_artifacts_are_misses() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Counters::default();
    run(dir.path(), BASE, &counters, true);
    counters.take();

    for entry in std::fs::read_dir(dir.path().join("values")).unwrap() {
        std::fs::write(entry.unwrap().path(), b"garbage").unwrap();
    }
    let (_, v1, v2) = run(dir.path(), BASE, &counters, true);
    assert_eq!((v1, v2), (6, 7));
    assert_eq!(counters.take(), (1, 1));
}

#[test]
fn persisted_graph_is_acyclic_and_recorded_as_read() {
    let dir = tempfile::tempdir().unwrap();
    run(dir.path(), BASE, &Counters::default(), true);

    let manifest = CacheManifest::load(dir.path()).unwrap();
    let names: BTreeMap<_, _> = manifest
        .nodes
        .iter()
        .enumerate()
        .map(|(i, d)| (i as u32, d.clone()))
        .collect();
    let mut edges: Vec<(String, String)> = manifest
        .edges
        .iter()
        .map(|(from, to)| (names[&from.as_raw()].clone(), names[&to.as_raw()].clone()))
        .collect();
    edges.sort();
    assert_eq!(
        edges,
        vec![
            ("derived:var:v1".into(), "input:cell:b".into()),
            ("derived:var:v1".into(), "input:cell:c".into()),
            ("derived:var:v2".into(), "derived:var:v1".into()),
            ("derived:var:v2".into(), "input:cell:a".into()),
        ]
    );

    let state = manifest.restore(dir.path()).unwrap();
    assert!(state.graph.dependency_order().is_ok());
}

#[test]
fn absent_input_probe_is_invalidated_when_input_appears() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = Descriptor::derived("fallback", "x");
    let go = |inputs: InputSet| {
        let mut session =
            Session::start(SessionOptions::new(dir.path()).tool_version("test"), inputs).unwrap();
        session
            .run_phase(
                "analyze",
                vec![Step::new(fallback.clone(), |cx| {
                    if cx.probe_input(&cell("x"))? {
                        number(cx, "x")
                    } else {
                        Ok(0)
                    }
                })],
            )
            .unwrap();
        let value = session.value_as::<i64>(&fallback).unwrap();
        session.finish().unwrap();
        value
    };

    assert_eq!(go(InputSet::new()), Some(0));
    let mut inputs = InputSet::new();
    inputs.insert(cell("x"), "42").unwrap();
    assert_eq!(go(inputs), Some(42));
}
