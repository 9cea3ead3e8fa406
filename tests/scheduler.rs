//! End-to-end scheduler tests: configuration → agents → store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mindgraph::agent::{Agent, CycleContext, CycleResult, DerivationRule, QueryProcessor};
use mindgraph::atom::{AtomSpec, AtomType};
use mindgraph::config::MindConfig;
use mindgraph::pattern::Pattern;
use mindgraph::scheduler::{CollectingSink, EventSink, Scheduler, SchedulerConfig, SchedulerEvent};
use mindgraph::store::KnowledgeStore;

fn new_scheduler(config: SchedulerConfig) -> (Arc<Scheduler>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let scheduler = Scheduler::new(Arc::new(KnowledgeStore::new()), config)
        .with_sink(Arc::clone(&sink) as Arc<dyn EventSink>);
    (Arc::new(scheduler), sink)
}

#[test]
fn configured_agents_chain_through_the_store() {
    let config = MindConfig::parse(
        r#"
[[agents]]
name = "inherit-to-similar"
pattern = { atom_type = "Inheritance", arity = 2 }
rule = { kind = "retype", link_type = "Similarity" }

[[agents]]
name = "similarity-closure"
pattern = { atom_type = "Similarity", arity = 2 }
rule = { kind = "symmetric" }
"#,
        "inline",
    )
    .unwrap();

    let store = Arc::new(KnowledgeStore::new());
    let cat = store.assert(AtomSpec::node(AtomType::Concept, "cat")).unwrap();
    let pet = store.assert(AtomSpec::node(AtomType::Concept, "pet")).unwrap();
    store
        .assert(AtomSpec::link(AtomType::Inheritance, vec![cat, pet]))
        .unwrap();

    let (scheduler, _) = config.build_scheduler(Arc::clone(&store)).unwrap();

    // Agents run in registration order, so the closure already sees the
    // similarity link asserted earlier in the same tick.
    let first = scheduler.tick().unwrap();
    assert_eq!(first.runs[0].result, CycleResult::Asserted { count: 1 });
    assert_eq!(first.runs[1].result, CycleResult::Asserted { count: 1 });
    let reverse = AtomSpec::link(AtomType::Similarity, vec![pet, cat]);
    assert!(store.find(&reverse).unwrap().is_some());
    assert_eq!(store.len().unwrap(), 5);

    // Fixpoint: the second tick only re-asserts existing atoms.
    let second = scheduler.tick().unwrap();
    assert_eq!(second.runs[1].result, CycleResult::Asserted { count: 2 });
    assert_eq!(store.len().unwrap(), 5);
}

#[test]
fn period_controls_invocation_count() {
    struct Count(Arc<AtomicUsize>);
    impl Agent for Count {
        fn name(&self) -> &str {
            "count"
        }
        fn run(&mut self, _store: &KnowledgeStore, _ctx: &CycleContext) -> CycleResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            CycleResult::Completed
        }
    }

    let (scheduler, _) = new_scheduler(SchedulerConfig::default());
    let every = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));
    scheduler.register(Count(Arc::clone(&every)), 1, 0).unwrap();
    scheduler.register(Count(Arc::clone(&third)), 3, 0).unwrap();

    scheduler.run_ticks(9).unwrap();
    assert_eq!(every.load(Ordering::SeqCst), 9);
    assert_eq!(third.load(Ordering::SeqCst), 3);
}

#[test]
fn stop_cancels_run_in_progress() {
    struct Spinner(mpsc::Sender<()>);
    impl Agent for Spinner {
        fn name(&self) -> &str {
            "spinner"
        }
        fn run(&mut self, _store: &KnowledgeStore, ctx: &CycleContext) -> CycleResult {
            self.0.send(()).ok();
            while !ctx.should_stop() {
                thread::sleep(Duration::from_millis(1));
            }
            CycleResult::Cancelled { asserted: 0 }
        }
    }

    let (scheduler, _) = new_scheduler(SchedulerConfig::default());
    let (tx, rx) = mpsc::channel();
    let id = scheduler.register(Spinner(tx), 1, 0).unwrap();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || scheduler.tick().unwrap())
    };
    rx.recv().unwrap();
    scheduler.set_running(id, false).unwrap();
    let report = worker.join().unwrap();
    assert_eq!(report.runs[0].result, CycleResult::Cancelled { asserted: 0 });

    // Not invoked again while stopped; cancellation is not a failure.
    assert!(scheduler.tick().unwrap().runs.is_empty());
    let status = scheduler.status(id).unwrap();
    assert_eq!(status.failures, 0);
    assert_eq!(status.cancellations, 1);
}

#[test]
fn agent_never_overlaps_itself() {
    struct Exclusive {
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }
    impl Agent for Exclusive {
        fn name(&self) -> &str {
            "exclusive"
        }
        fn run(&mut self, _store: &KnowledgeStore, _ctx: &CycleContext) -> CycleResult {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(2));
            self.busy.store(false, Ordering::SeqCst);
            CycleResult::Completed
        }
    }

    let (scheduler, _) = new_scheduler(SchedulerConfig::default());
    let overlaps = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(
            Exclusive {
                busy: Arc::new(AtomicBool::new(false)),
                overlaps: Arc::clone(&overlaps),
            },
            1,
            0,
        )
        .unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for _ in 0..10 {
                    scheduler.tick().unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn failing_agent_is_stopped_once_and_others_continue() {
    struct AlwaysFails;
    impl Agent for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }
        fn run(&mut self, _store: &KnowledgeStore, _ctx: &CycleContext) -> CycleResult {
            CycleResult::Failed {
                reason: "no luck".into(),
            }
        }
    }

    let (scheduler, sink) = new_scheduler(SchedulerConfig {
        failure_threshold: 3,
        ..SchedulerConfig::default()
    });
    let bad = scheduler.register(AlwaysFails, 1, 0).unwrap();
    let good = scheduler
        .register(
            QueryProcessor::from_rule("closure", Pattern::any(), DerivationRule::Symmetric),
            1,
            0,
        )
        .unwrap();

    scheduler.run_ticks(10).unwrap();

    let events = sink.events();
    let stopped: Vec<_> = events.iter().filter(|e| e.is_agent_stopped()).collect();
    assert_eq!(stopped.len(), 1);
    assert!(matches!(
        stopped[0],
        SchedulerEvent::AgentStopped { id, tick: 3, .. } if *id == bad
    ));
    assert_eq!(scheduler.status(bad).unwrap().runs, 3);
    assert_eq!(scheduler.status(good).unwrap().runs, 10);
    // Stopped, not unregistered.
    assert_eq!(scheduler.agent_count(), 2);
}

#[test]
fn parallel_ticks_match_sequential_outcome() {
    let (scheduler, _) = new_scheduler(SchedulerConfig {
        parallel: true,
        ..SchedulerConfig::default()
    });
    let store = Arc::clone(scheduler.store());
    let mut nodes = Vec::new();
    for i in 0..20 {
        nodes.push(store.assert(AtomSpec::node(AtomType::Concept, format!("n{i}"))).unwrap());
    }
    for pair in nodes.windows(2) {
        store
            .assert(AtomSpec::link(AtomType::Similarity, vec![pair[0], pair[1]]))
            .unwrap();
    }
    for tag in ["red", "green", "blue"] {
        scheduler
            .register(
                QueryProcessor::from_rule(
                    tag,
                    Pattern::of_type(AtomType::Concept),
                    DerivationRule::Tag {
                        link_type: AtomType::Member,
                        concept: tag.into(),
                    },
                ),
                1,
                0,
            )
            .unwrap();
    }
    scheduler
        .register(
            QueryProcessor::from_rule(
                "closure",
                Pattern::of_type(AtomType::Similarity).with_arity(2),
                DerivationRule::Symmetric,
            ),
            1,
            0,
        )
        .unwrap();

    scheduler.run_ticks(2).unwrap();

    // 19 links and their 19 mirrors.
    assert_eq!(store.query(&Pattern::of_type(AtomType::Similarity)).unwrap().count(), 38);
    // Each tagger tags at least the 20 original nodes.
    for tag in ["red", "green", "blue"] {
        let concept = store
            .find(&AtomSpec::node(AtomType::Concept, tag))
            .unwrap()
            .unwrap();
        assert!(store.incoming(concept).unwrap().len() >= 20);
    }
}
