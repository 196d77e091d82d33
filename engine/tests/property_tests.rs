use proptest::prelude::*;
use sdk::ValidationError;
use std::collections::HashMap;
use waypoint_engine::conductor::Planner;
use waypoint_engine::config::{Config, OrchestratorConfig, PlannerConfig};
use waypoint_engine::graph::{Dependency, TaskGraph, TaskSpec};
use waypoint_engine::memory::{LearnedPattern, PatternKey, PatternSnapshot};

/// Random DAG: edges only point from a later task to an earlier one
fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..12).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..n * 2).prop_map(|pairs| {
            pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| if a > b { (a, b) } else { (b, a) })
                .collect::<Vec<_>>()
        });
        (Just(n), edges)
    })
}

fn build(n: usize, edges: &[(usize, usize)]) -> Result<TaskGraph, ValidationError> {
    let specs = (0..n)
        .map(|i| TaskSpec::new(format!("t{}", i), "tool"))
        .collect();
    let deps = edges
        .iter()
        .map(|(task, dep)| Dependency::new(format!("t{}", task), format!("t{}", dep)))
        .collect();
    TaskGraph::build(specs, deps)
}

// Every task is planned exactly once and after all of its dependencies
proptest! {
    #[test]
    fn test_plan_is_topological((n, edges) in dag()) {
        let graph = build(n, &edges).unwrap();
        let planner = Planner::new(PlannerConfig::default());
        let plan = planner.plan_with(&graph, &PatternSnapshot::default()).unwrap();

        let mut group_of = HashMap::new();
        for (index, group) in plan.groups.iter().enumerate() {
            prop_assert!(!group.is_empty());
            for id in group {
                prop_assert!(group_of.insert(id.clone(), index).is_none(), "{} planned twice", id);
            }
        }
        prop_assert_eq!(group_of.len(), n);

        for (task, dep) in &edges {
            let task_group = group_of[&format!("t{}", task)];
            let dep_group = group_of[&format!("t{}", dep)];
            prop_assert!(dep_group < task_group);
        }
    }
}

// Closing any path back on itself is rejected at construction
proptest! {
    #[test]
    fn test_cycle_is_rejected(len in 2usize..8) {
        let mut edges: Vec<(usize, usize)> = (1..len).map(|i| (i, i - 1)).collect();
        edges.push((0, len - 1));

        let result = build(len, &edges);
        prop_assert!(matches!(result, Err(ValidationError::Cycle { .. })), "expected cycle, got {:?}", result.err());
    }
}

// Backoff grows with each attempt and never passes the cap
proptest! {
    #[test]
    fn test_backoff_capped(base in 1u64..1_000, cap in 1u64..60_000, attempt in 0u32..80) {
        let config = OrchestratorConfig {
            backoff_base_ms: base,
            backoff_cap_ms: cap,
            ..Default::default()
        };

        let delay = config.backoff_delay(attempt);
        let next = config.backoff_delay(attempt + 1);
        prop_assert!(delay.as_millis() <= cap as u128);
        prop_assert!(next >= delay);
    }
}

// The moving average stays a probability and confidence never exceeds it
proptest! {
    #[test]
    fn test_pattern_rate_bounded(
        samples in prop::collection::vec(any::<bool>(), 1..50),
        alpha in 0.01f64..=1.0,
    ) {
        let mut pattern = LearnedPattern::new(PatternKey::new("tool", "-"));
        for success in &samples {
            pattern.apply(*success, alpha);
            prop_assert!((0.0..=1.0).contains(&pattern.success_rate));
            prop_assert!(pattern.confidence() <= pattern.success_rate);
        }
        prop_assert_eq!(pattern.sample_count, samples.len() as u64);
    }
}

proptest! {
    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        concurrency in 1usize..64,
        max_attempts in 1u32..10,
        threshold in 0.0..=1.0f64,
        alpha in 0.01..=1.0f64,
        auto_replan in any::<bool>(),
    ) {
        let baseline_toml = r#"
[core]
workspace = "~/projects"
log_level = "info"
data_dir = "~/.waypoint/data"

[orchestrator]
concurrency = 4

[tools]
web_operations = false
"#;
        let mut config: Config = toml::from_str(baseline_toml)
            .expect("Failed to parse baseline config");

        config.core.log_level = log_level;
        config.orchestrator.concurrency = concurrency;
        config.orchestrator.max_attempts = max_attempts;
        config.orchestrator.auto_replan = auto_replan;
        config.planner.low_confidence_threshold = threshold;
        config.memory.ewma_alpha = alpha;

        let toml_string = toml::to_string(&config).expect("Failed to serialize Config to string");
        let parsed: Config = toml::from_str(&toml_string).expect("Failed to deserialize TOML to Config");

        prop_assert_eq!(config.core.log_level, parsed.core.log_level);
        prop_assert_eq!(config.orchestrator.concurrency, parsed.orchestrator.concurrency);
        prop_assert_eq!(config.orchestrator.max_attempts, parsed.orchestrator.max_attempts);
        prop_assert_eq!(config.orchestrator.auto_replan, parsed.orchestrator.auto_replan);
        prop_assert_eq!(config.planner.low_confidence_threshold, parsed.planner.low_confidence_threshold);
        prop_assert_eq!(config.memory.ewma_alpha, parsed.memory.ewma_alpha);
        prop_assert!(!parsed.tools.web_operations);
    }
}
