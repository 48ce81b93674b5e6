//! Round-by-round readiness evaluation.

use super::StageGraph;
use crate::core::StageStatus;
use std::collections::{BTreeMap, BTreeSet};

/// What one scheduling round should do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundPlan {
    /// Stages whose dependencies are all satisfied, in execution order.
    pub ready: Vec<String>,
    /// Stages to skip this round, with the reason.
    pub skipped: Vec<(String, String)>,
    /// Stages still waiting on unresolved dependencies.
    pub waiting: Vec<String>,
    /// True when nothing was ready while stages were still waiting.
    pub deadlocked: bool,
}

impl RoundPlan {
    /// Returns true if the round has nothing to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.skipped.is_empty()
    }
}

/// Plans the next round.
///
/// `known` maps every stage that already has an outcome to its status;
/// pre-completed stages appear as `completed`. Stages with a failed or
/// skipped dependency are skipped, and the skip cascades to their own
/// dependents in the same round. When nothing is ready but stages are still
/// waiting, every waiting stage is skipped and the plan is marked
/// deadlocked.
#[must_use]
pub fn plan_round(graph: &StageGraph, known: &BTreeMap<String, StageStatus>) -> RoundPlan {
    let mut plan = RoundPlan::default();
    let mut skipped_now: BTreeSet<&str> = BTreeSet::new();

    for name in graph.execution_order() {
        if known.contains_key(name) {
            continue;
        }
        let Some(stage) = graph.get(name) else {
            continue;
        };

        let mut poisoned = None;
        let mut all_completed = true;
        for dep in &stage.depends_on {
            let status = if skipped_now.contains(dep.as_str()) {
                Some(StageStatus::Skipped)
            } else {
                known.get(dep).copied()
            };
            match status {
                Some(StageStatus::Completed) => {}
                Some(s) if s.poisons_dependents() => {
                    poisoned = Some((dep, s));
                    break;
                }
                _ => all_completed = false,
            }
        }

        if let Some((dep, status)) = poisoned {
            skipped_now.insert(name);
            plan.skipped
                .push((name.clone(), format!("Dependency '{dep}' {status}")));
        } else if all_completed {
            plan.ready.push(name.clone());
        } else {
            plan.waiting.push(name.clone());
        }
    }

    if plan.ready.is_empty() && !plan.waiting.is_empty() {
        plan.deadlocked = true;
        for name in plan.waiting.drain(..) {
            let unresolved: Vec<&str> = graph
                .get(&name)
                .map(|s| {
                    s.depends_on
                        .iter()
                        .filter(|d| known.get(*d) != Some(&StageStatus::Completed))
                        .map(String::as_str)
                        .collect()
                })
                .unwrap_or_default();
            let reason = format!(
                "Unresolvable dependencies: {}",
                unresolved.join(", ")
            );
            plan.skipped.push((name, reason));
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageDefinition;
    use crate::pipeline::PipelineBuilder;
    use pretty_assertions::assert_eq;

    fn chain() -> StageGraph {
        PipelineBuilder::new("m")
            .stage(StageDefinition::new("a", "k"))
            .stage(StageDefinition::new("b", "k").with_dependency("a"))
            .stage(StageDefinition::new("c", "k").with_dependency("b"))
            .stage(StageDefinition::new("d", "k"))
            .build()
            .unwrap()
    }

    fn known(entries: &[(&str, StageStatus)]) -> BTreeMap<String, StageStatus> {
        entries.iter().map(|(n, s)| ((*n).to_string(), *s)).collect()
    }

    #[test]
    fn test_first_round() {
        let plan = plan_round(&chain(), &BTreeMap::new());
        assert_eq!(plan.ready, vec!["a", "d"]);
        assert_eq!(plan.waiting, vec!["b", "c"]);
        assert!(plan.skipped.is_empty());
        assert!(!plan.deadlocked);
    }

    #[test]
    fn test_failure_cascades_in_one_round() {
        let plan = plan_round(&chain(), &known(&[("a", StageStatus::Failed), ("d", StageStatus::Completed)]));

        assert!(plan.ready.is_empty());
        assert_eq!(plan.skipped.len(), 2);
        assert_eq!(plan.skipped[0].0, "b");
        assert!(plan.skipped[0].1.contains("'a' failed"));
        assert_eq!(plan.skipped[1].0, "c");
        assert!(plan.skipped[1].1.contains("'b' skipped"));
        assert!(!plan.deadlocked);
    }

    #[test]
    fn test_pre_completed_dependency_is_satisfied() {
        let plan = plan_round(&chain(), &known(&[("a", StageStatus::Completed), ("d", StageStatus::Completed)]));
        assert_eq!(plan.ready, vec!["b"]);
        assert_eq!(plan.waiting, vec!["c"]);
    }

    #[test]
    fn test_all_known_is_idle() {
        let all = known(&[
            ("a", StageStatus::Completed),
            ("b", StageStatus::Completed),
            ("c", StageStatus::Skipped),
            ("d", StageStatus::Failed),
        ]);
        assert!(plan_round(&chain(), &all).is_idle());
    }

    #[test]
    fn test_deadlock_skips_waiting_stages() {
        // "a" is still running elsewhere: nothing it gates can become ready.
        let mut state = known(&[("d", StageStatus::Completed)]);
        state.insert("a".to_string(), StageStatus::Running);

        let plan = plan_round(&chain(), &state);

        assert!(plan.deadlocked);
        assert!(plan.waiting.is_empty());
        let names: Vec<&str> = plan.skipped.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(plan.skipped[0].1.contains('a'));
    }
}
