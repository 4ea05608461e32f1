//! End-to-end learning and recall scenarios
//!
//! These drive the public `Engine` API only: train on text, then check what
//! the cascade reports back.

use neurogrow::*;

const VOCAB: &[&str] = &[
    "garden", "river", "window", "silver", "morning", "coffee", "bridge", "yellow", "planet", "music", "winter",
    "forest", "engine", "market", "pillow", "candle", "rocket", "harbor", "tunnel", "meadow", "button", "lantern",
    "orange", "saddle", "pocket", "violin", "desert", "summer", "island", "thunder",
];

fn manual_config() -> EngineConfig {
    EngineConfig {
        checkpoint: CheckpointPolicy::manual(),
        ..EngineConfig::default()
    }
}

/// 1,000 sentences; every 20th pairs "cat" with "dog"
fn corpus() -> Vec<String> {
    (0..1000)
        .map(|i| {
            let pick = |k: usize| VOCAB[(i * 7 + k * 13) % VOCAB.len()];
            if i % 20 == 0 {
                format!("the cat and the dog near the {}", pick(0))
            } else {
                format!("{} {} {} {}", pick(0), pick(1), pick(2), pick(3))
            }
        })
        .collect()
}

#[test]
fn test_trained_concept_cascades() {
    let engine = Engine::new(manual_config()).unwrap();
    let report = engine.train(&mut corpus().into_iter(), &CancelFlag::new());
    assert_eq!(report.steps, 1000);
    assert!(report.final_checkpoint.is_committed());

    let cat = engine.query("cat");
    assert!(cat.seed_count > 0);
    assert!(cat.max_depth >= 1, "depth {}", cat.max_depth);
    assert!(cat.activated_count > cat.seed_count);
}

#[test]
fn test_unseen_string_is_maximally_novel() {
    let engine = Engine::new(manual_config()).unwrap();
    for text in corpus().iter().take(200) {
        engine.learn(text);
    }

    let result = engine.query("qzxjklvwmp");
    assert_eq!(result.activated_count, result.seed_count);
    assert_eq!(result.max_depth, 0);
    assert_eq!(result.novelty_score, 1.0);
    assert_eq!(result.classification, Classification::Novel);
}

#[test]
fn test_novelty_orders_trained_before_unseen() {
    let engine = Engine::new(manual_config()).unwrap();
    for _ in 0..60 {
        engine.learn("cat");
    }

    let known = engine.query("cat");
    let unseen = engine.query("qzxjklvwmp");
    assert!(known.novelty_score < unseen.novelty_score);
    assert_ne!(known.classification, Classification::Novel);
    assert_eq!(unseen.activated_count, unseen.seed_count);
    assert_eq!(unseen.max_depth, 0);
}

#[test]
fn test_overlapping_contexts_link_clusters() {
    let engine = Engine::new(manual_config()).unwrap();
    engine.learn("red");
    engine.learn("fruit");
    for _ in 0..5 {
        engine.learn("red apple");
        engine.learn("apple fruit");
    }

    let red = engine.cluster_of("red").unwrap();
    let fruit = engine.cluster_of("fruit").unwrap();
    let apple = engine.cluster_of("apple").unwrap();
    assert_ne!(red, apple);
    assert_ne!(fruit, apple);

    assert!(engine.cluster_links(apple, red) > 0);
    assert!(engine.cluster_links(apple, fruit) > 0);
    assert!(engine.cluster_links(red, apple) > 0);
}

#[test]
fn test_resident_set_stays_bounded() {
    let mut config = manual_config();
    config.colony.max_loaded_clusters = 10;
    let engine = Engine::new(config).unwrap();

    let words = [
        "apple", "river", "mountain", "guitar", "bucket", "planet", "coffee", "window", "tiger", "violin", "desert",
        "lemon", "thunder", "pencil", "jungle",
    ];
    for word in words {
        engine.learn(word);
        assert!(engine.stats().colony.resident_clusters <= 10);
    }

    let stats = engine.stats();
    assert_eq!(stats.colony.clusters, 15);
    assert!(stats.colony.evictions >= 5);
    assert!(stats.colony.resident_neurons < stats.colony.total_neurons);

    // Queries only drop clean clusters, so persist the learner's work first
    assert!(engine.checkpoint().is_committed());
    let spills = engine.stats().colony.spills;
    for word in words {
        let result = engine.query(word);
        assert!(result.seed_count > 0, "{} not reachable", word);
        assert!(engine.stats().colony.resident_clusters <= 10);
    }
    assert!(engine.stats().colony.partition_loads > 0);
    assert_eq!(engine.stats().colony.spills, spills);
}

#[test]
fn test_growth_varies_with_demand() {
    let engine = Engine::new(manual_config()).unwrap();
    for _ in 0..40 {
        engine.learn("frequent");
    }
    engine.learn("ox");

    let frequent = engine.cluster_meta(engine.cluster_of("frequent").unwrap()).unwrap();
    let rare = engine.cluster_meta(engine.cluster_of("ox").unwrap()).unwrap();
    assert!(frequent.members.len() > rare.members.len());
}

#[test]
fn test_cancel_stops_training_between_steps() {
    struct Cancelling {
        cancel: CancelFlag,
        served: usize,
    }

    impl TrainingSource for Cancelling {
        fn next_text(&mut self) -> Option<String> {
            self.served += 1;
            if self.served == 3 {
                self.cancel.cancel();
            }
            Some(format!("concept{}", self.served))
        }
    }

    let engine = Engine::new(manual_config()).unwrap();
    let cancel = CancelFlag::new();
    let mut source = Cancelling {
        cancel: cancel.clone(),
        served: 0,
    };
    let report = engine.train(&mut source, &cancel);

    assert!(report.cancelled);
    assert_eq!(report.steps, 3);
    assert!(report.final_checkpoint.is_committed());
    assert_eq!(engine.pending_steps(), 0);
}
