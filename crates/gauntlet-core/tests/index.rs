//! Provenance index behavior: registration idempotence, evaluator
//! replacement, the single-evaluation rule, and cascading deletes.

use gauntlet_core::config::CpKey;
use gauntlet_core::db::deps::{self, Dependent};
use gauntlet_core::db::model::RunStats;
use gauntlet_core::db::Index;
use gauntlet_core::errors::Fatal;

fn cp() -> CpKey {
    "1-0-2".parse().unwrap()
}

fn fresh_index() -> Index {
    let index = Index::open_in_memory().unwrap();
    index.init_schema().unwrap();
    index
}

/// team + problem + one engine, the floor every other entity stands on.
fn seed_engine(index: &Index) -> String {
    index
        .session(|s| {
            s.insert_team("GALOIS", "reference team")?;
            s.insert_challenge_problem(cp(), None)?;
            s.register_engine(1, "engine0000", "/opt/engine")?;
            Ok(())
        })
        .unwrap();
    "engine0000".to_string()
}

fn seed_graph(index: &Index) {
    seed_engine(index);
    index
        .session(|s| {
            s.register_dataset(cp(), "data0000", "truth0000", "in", "eval")?;
            s.register_solution("engine0000", cp(), "sol0000", None)?;
            s.register_configuration("sol0000", "conf0000", "slam.conf")?;
            s.register_evaluator(cp(), "eval0000")?;
            let run_id = s.save_run(
                "engine0000",
                "sol0000",
                "conf0000",
                "data0000",
                "out0000",
                None,
                &RunStats::default(),
            )?;
            s.save_evaluation(run_id, "verdict0000", true)?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn engine_registration_is_idempotent() {
    let index = fresh_index();
    let id = seed_engine(&index);
    let fresh = index
        .session(|s| s.register_engine(1, &id, "/opt/engine"))
        .unwrap();
    assert!(!fresh);
}

#[test]
fn registration_validates_references_by_name() {
    let index = fresh_index();
    seed_engine(&index);
    let err = index
        .session(|s| s.register_solution("nonexistent", cp(), "sol0000", None))
        .unwrap_err();
    match err.downcast_ref::<Fatal>() {
        Some(Fatal::ForeignKey { table, key }) => {
            assert_eq!(*table, "engine");
            assert_eq!(key, "nonexistent");
        }
        other => panic!("expected ForeignKey, got {other:?}"),
    }
}

#[test]
fn replacing_an_evaluator_keeps_its_evaluations() {
    let index = fresh_index();
    seed_graph(&index);

    let replaced = index
        .session(|s| s.register_evaluator(cp(), "eval1111"))
        .unwrap();
    assert_eq!(replaced.as_deref(), Some("eval0000"));

    index
        .session(|s| {
            // Old evaluator row is gone, the verdict it produced is not.
            assert!(s.get_evaluator("eval0000")?.is_none());
            let kept = s.get_evaluation("verdict0000")?.expect("evaluation kept");
            assert_eq!(kept.evaluator_id, "eval0000");
            Ok(())
        })
        .unwrap();
}

#[test]
fn a_run_has_at_most_one_evaluation() {
    let index = fresh_index();
    seed_graph(&index);

    index
        .session(|s| {
            s.save_evaluation(1, "verdict1111", false)?;
            assert!(s.get_evaluation("verdict0000")?.is_none());
            let latest = s.get_evaluation("verdict1111")?.expect("latest verdict");
            assert!(!latest.did_succeed);
            Ok(())
        })
        .unwrap();
}

#[test]
fn unevaluated_runs_are_listed_in_order() {
    let index = fresh_index();
    seed_graph(&index);

    index
        .session(|s| {
            let second = s.save_run(
                "engine0000",
                "sol0000",
                "conf0000",
                "data0000",
                "out1111",
                None,
                &RunStats::default(),
            )?;
            let third = s.save_run(
                "engine0000",
                "sol0000",
                "conf0000",
                "data0000",
                "out2222",
                Some("log0000"),
                &RunStats::default(),
            )?;
            assert_eq!(s.unevaluated_run_ids()?, vec![second, third]);
            assert_eq!(s.run_count("conf0000", "sol0000", "data0000")?, 3);
            Ok(())
        })
        .unwrap();
}

#[test]
fn sessions_are_not_reentrant() {
    let index = fresh_index();
    let err = index
        .session(|_| index.session(|_| Ok(())))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Fatal>(),
        Some(Fatal::NotReentrant)
    ));
    // The guard resets, so the next session works.
    index.session(|_| Ok(())).unwrap();
}

#[test]
fn a_failed_session_rolls_back() {
    let index = fresh_index();
    seed_engine(&index);

    let result: anyhow::Result<()> = index.session(|s| {
        s.register_solution("engine0000", cp(), "sol0000", None)?;
        anyhow::bail!("late failure")
    });
    assert!(result.is_err());

    index
        .session(|s| {
            assert!(s.get_solution("sol0000")?.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn engine_dependents_cover_the_whole_subgraph() {
    let index = fresh_index();
    seed_graph(&index);

    index
        .session(|s| {
            let found = deps::engine_deps(s, "engine0000")?;
            let expected: Vec<Dependent> = vec![
                Dependent::Solution("sol0000".into()),
                Dependent::ConfiguredSolution {
                    id: "conf0000".into(),
                    solution_id: "sol0000".into(),
                },
                Dependent::Run(1),
                Dependent::Evaluation {
                    id: "verdict0000".into(),
                    evaluator_id: "eval0000".into(),
                    run_id: 1,
                },
            ];
            for dep in &expected {
                assert!(found.contains(dep), "missing dependent: {dep}");
            }
            assert_eq!(found.len(), expected.len());
            Ok(())
        })
        .unwrap();
}

#[test]
fn deleting_an_engine_removes_its_subgraph() {
    let index = fresh_index();
    seed_graph(&index);

    index
        .session(|s| deps::delete_engine(s, "engine0000"))
        .unwrap();

    index
        .session(|s| {
            assert!(s.get_engine("engine0000")?.is_none());
            assert!(s.get_solution("sol0000")?.is_none());
            assert!(s.get_configurations_by_id("conf0000")?.is_empty());
            assert!(s.get_run(1)?.is_none());
            assert!(s.get_evaluation("verdict0000")?.is_none());
            // Unrelated entities survive.
            assert!(s.get_dataset("data0000")?.is_some());
            assert!(s.get_evaluator("eval0000")?.is_some());
            Ok(())
        })
        .unwrap();
}

#[test]
fn deleting_a_dataset_takes_its_runs() {
    let index = fresh_index();
    seed_graph(&index);

    index
        .session(|s| {
            let dependents = deps::dataset_deps(s, "data0000")?;
            assert!(dependents.contains(&Dependent::Run(1)));
            deps::delete_dataset(s, "data0000")
        })
        .unwrap();

    index
        .session(|s| {
            assert!(s.get_dataset("data0000")?.is_none());
            assert!(s.get_run(1)?.is_none());
            assert!(s.get_solution("sol0000")?.is_some());
            Ok(())
        })
        .unwrap();
}
