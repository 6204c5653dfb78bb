use crate::HunkId;
use crate::report::{BenchmarkObservation, ResultSet, TestResultSet};
use std::collections::BTreeSet;
use std::fmt;

/// A test only takes part in selection when its median delta is below this
/// (percent).
pub const REGRESSION_THRESHOLD: f64 = -3.0;

/// Default gap between the best hunk and the median needed to flag it.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 9.0;

/// Lower median: element `(n - 1) / 2` of the sorted values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted[(sorted.len() - 1) / 2])
}

/// Verdict for one hunk on one test, with the numbers behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub test: String,
    pub hunk: HunkId,
    pub selected: bool,
    pub median: f64,
    pub max: f64,
    pub difference: f64,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} (max {:.2} vs median {:.2}, diff {:.2})",
            if self.selected { "select" } else { "keep  " },
            self.hunk,
            self.test,
            self.max,
            self.median,
            self.difference
        )
    }
}

/// Descriptive numbers for one test, printed with `--explain`.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSummary {
    pub count: usize,
    pub confident: usize,
    pub mean: f64,
    pub median: f64,
    pub best: (HunkId, f64),
    pub worst: (HunkId, f64),
}

pub fn summarize(set: &TestResultSet) -> Option<TestSummary> {
    let deltas: Vec<f64> = set.iter().map(|o| o.delta).collect();
    let median = median(&deltas)?;
    let best = extreme(set, |candidate, current| candidate > current)?;
    let worst = extreme(set, |candidate, current| candidate < current)?;

    Some(TestSummary {
        count: deltas.len(),
        confident: set.iter().filter(|o| o.confident).count(),
        mean: deltas.iter().sum::<f64>() / deltas.len() as f64,
        median,
        best: (best.hunk.clone(), best.delta),
        worst: (worst.hunk.clone(), worst.delta),
    })
}

/// First observation in hunk order that `better` prefers over all others.
fn extreme<F>(set: &TestResultSet, better: F) -> Option<&BenchmarkObservation>
where
    F: Fn(f64, f64) -> bool,
{
    set.iter().fold(None, |acc: Option<&BenchmarkObservation>, obs| match acc {
        Some(cur) if !better(obs.delta, cur.delta) => Some(cur),
        _ => Some(obs),
    })
}

/// Median/max outlier rule over the aggregated results.
#[derive(Debug, Clone, Copy)]
pub struct RegressionSelector {
    pub threshold: f64,
}

impl Default for RegressionSelector {
    fn default() -> Self {
        Self::new(DEFAULT_OUTLIER_THRESHOLD)
    }
}

impl RegressionSelector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Decide one test. `None` when the test has no confident observation or
    /// its median does not show a regression.
    pub fn decide_test(&self, test: &str, set: &TestResultSet) -> Option<Decision> {
        if !set.has_confident() {
            return None;
        }

        let deltas: Vec<f64> = set.iter().map(|o| o.delta).collect();
        let median = median(&deltas)?;
        if median >= REGRESSION_THRESHOLD {
            return None;
        }

        let best = extreme(set, |candidate, current| candidate > current)?;
        let difference = best.delta - median;

        Some(Decision {
            test: test.to_string(),
            hunk: best.hunk.clone(),
            selected: difference > self.threshold,
            median,
            max: best.delta,
            difference,
        })
    }

    /// Decisions for every test that reached the max comparison.
    pub fn decide(&self, results: &ResultSet) -> Vec<Decision> {
        results
            .tests()
            .filter_map(|(test, set)| self.decide_test(test, set))
            .collect()
    }

    /// Union of the hunks selected by any test.
    pub fn select(&self, results: &ResultSet) -> BTreeSet<HunkId> {
        self.decide(results)
            .into_iter()
            .filter(|d| d.selected)
            .map(|d| d.hunk)
            .collect()
    }
}
