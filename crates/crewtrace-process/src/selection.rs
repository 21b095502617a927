//! Worker selection for hierarchical runs.
//!
//! Tiers are tried in order: explicit assignment, tool overlap, keyword
//! overlap, round-robin. Within a tier the highest score wins and ties go to
//! the earliest worker in pool order.

use std::collections::BTreeSet;

use serde::Serialize;

use crewtrace_core::task::Task;
use crewtrace_core::types::AgentProfile;

/// Shortest word considered when matching role/expertise keywords.
const MIN_KEYWORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTier {
    Assigned,
    ToolOverlap,
    KeywordOverlap,
    RoundRobin,
}

impl std::fmt::Display for SelectionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SelectionTier::Assigned => "explicit assignment",
            SelectionTier::ToolOverlap => "tool overlap",
            SelectionTier::KeywordOverlap => "keyword overlap",
            SelectionTier::RoundRobin => "round-robin",
        };
        f.write_str(s)
    }
}

/// Outcome of one selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Index into the worker slice passed to [`WorkerSelector::select`].
    pub worker: usize,
    pub tier: SelectionTier,
    /// Tier-specific score (matched tools or keywords; 0 otherwise).
    pub score: usize,
}

impl Selection {
    /// Human-readable justification, used as decision reasoning.
    pub fn reasoning(&self, task: &Task, worker: &AgentProfile) -> String {
        match self.tier {
            SelectionTier::Assigned => format!(
                "Task '{}' was explicitly assigned to {}.",
                task.id, worker.role
            ),
            SelectionTier::ToolOverlap => format!(
                "Selected {} by tool overlap: {} of {} required tool(s) available.",
                worker.role,
                self.score,
                task.tools.len()
            ),
            SelectionTier::KeywordOverlap => format!(
                "Selected {} by keyword overlap: {} role/expertise keyword(s) match the task description.",
                worker.role, self.score
            ),
            SelectionTier::RoundRobin => format!(
                "No worker matched task '{}' by tools or keywords; {} chosen round-robin.",
                task.id, worker.role
            ),
        }
    }
}

/// Deterministic worker selector. Holds the round-robin cursor for one run.
#[derive(Debug, Default)]
pub struct WorkerSelector {
    next: usize,
}

impl WorkerSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose a worker for `task`. `workers` must be non-empty.
    pub fn select(&mut self, task: &Task, workers: &[&AgentProfile]) -> Selection {
        if let Some(assigned) = task.agent.as_deref() {
            if let Some(worker) = workers.iter().position(|w| w.id == assigned) {
                return Selection {
                    worker,
                    tier: SelectionTier::Assigned,
                    score: 0,
                };
            }
        }

        if let Some((worker, score)) = best(workers, |w| tool_overlap(w, task)) {
            return Selection {
                worker,
                tier: SelectionTier::ToolOverlap,
                score,
            };
        }

        let description = keywords(&task.description);
        if let Some((worker, score)) = best(workers, |w| keyword_overlap(w, &description)) {
            return Selection {
                worker,
                tier: SelectionTier::KeywordOverlap,
                score,
            };
        }

        let worker = self.next % workers.len().max(1);
        self.next += 1;
        Selection {
            worker,
            tier: SelectionTier::RoundRobin,
            score: 0,
        }
    }
}

/// Highest positive score; earliest worker wins ties.
fn best(workers: &[&AgentProfile], score: impl Fn(&AgentProfile) -> usize) -> Option<(usize, usize)> {
    let mut winner: Option<(usize, usize)> = None;
    for (i, worker) in workers.iter().enumerate() {
        let s = score(*worker);
        if s > 0 && winner.map_or(true, |(_, top)| s > top) {
            winner = Some((i, s));
        }
    }
    winner
}

fn tool_overlap(worker: &AgentProfile, task: &Task) -> usize {
    task.tools.iter().filter(|t| worker.tools.contains(t)).count()
}

fn keyword_overlap(worker: &AgentProfile, description: &BTreeSet<String>) -> usize {
    let mut own = keywords(&worker.role);
    for entry in &worker.expertise {
        own.extend(keywords(entry));
    }
    own.iter()
        .filter(|k| {
            description
                .iter()
                .any(|d| k.starts_with(d.as_str()) || d.starts_with(k.as_str()))
        })
        .count()
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers() -> Vec<AgentProfile> {
        vec![
            AgentProfile::new("researcher", "Senior Researcher")
                .with_tools(vec!["web_search".into()])
                .with_expertise(vec!["market trends".into()]),
            AgentProfile::new("analyst", "Financial Analyst")
                .with_tools(vec!["calculator".into(), "web_search".into()])
                .with_expertise(vec!["finance".into(), "filings".into()]),
            AgentProfile::new("writer", "Technical Writer"),
        ]
    }

    fn select(task: &Task) -> Selection {
        let pool = workers();
        let refs: Vec<&AgentProfile> = pool.iter().collect();
        WorkerSelector::new().select(task, &refs)
    }

    #[test]
    fn test_assignment_wins() {
        let task = Task::new("t", "Write docs")
            .with_agent("analyst")
            .with_tools(vec!["web_search".into()]);
        let s = select(&task);
        assert_eq!((s.worker, s.tier), (1, SelectionTier::Assigned));
    }

    #[test]
    fn test_tool_overlap_prefers_higher_score() {
        let task = Task::new("t", "Crunch numbers").with_tools(vec!["calculator".into(), "web_search".into()]);
        let s = select(&task);
        assert_eq!(s, Selection { worker: 1, tier: SelectionTier::ToolOverlap, score: 2 });
    }

    #[test]
    fn test_tool_tie_goes_to_earliest_worker() {
        let task = Task::new("t", "Look things up").with_tools(vec!["web_search".into()]);
        assert_eq!(select(&task).worker, 0);
    }

    #[test]
    fn test_keyword_overlap() {
        let task = Task::new("t", "Research current market trends");
        let s = select(&task);
        assert_eq!(s.tier, SelectionTier::KeywordOverlap);
        assert_eq!(s.worker, 0);
        assert_eq!(s.score, 3);

        let task = Task::new("t", "Summarize the latest filings");
        assert_eq!(select(&task).worker, 1);
    }

    #[test]
    fn test_round_robin_fallback() {
        let pool = workers();
        let refs: Vec<&AgentProfile> = pool.iter().collect();
        let mut selector = WorkerSelector::new();
        let task = Task::new("t", "Do it");

        let picks: Vec<usize> = (0..4).map(|_| selector.select(&task, &refs).worker).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
        assert!(selector
            .select(&task, &refs)
            .reasoning(&task, refs[1])
            .contains("round-robin"));
    }

    #[test]
    fn test_unknown_assignment_falls_through() {
        let task = Task::new("t", "Do it").with_agent("manager");
        assert_eq!(select(&task).tier, SelectionTier::RoundRobin);
    }
}
