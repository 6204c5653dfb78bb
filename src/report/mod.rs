use crate::HunkId;
use regex::Regex;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::{self, BufRead};
use std::sync::LazyLock;

/// `<test>  <marks>  <delta> %  <three interval fields>`
static ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^*]+?)\s+(\**)\s*(-?\d+\.\d\d)\s%(?:\s+.\d+\.\d+%){3}$")
        .expect("row pattern is valid")
});

/// One data row of a comparison table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub test: String,
    pub confident: bool,
    pub delta: f64,
}

/// Parse one table line. Banners, separators and anything else that is not a
/// data row yield `None`.
pub fn parse_row(line: &str) -> Option<Row> {
    let line = line.trim_end();
    if !line.ends_with('%') {
        return None;
    }
    let Some(caps) = ROW.captures(line) else {
        tracing::trace!(line, "skipping non-row line ending in %");
        return None;
    };

    Some(Row {
        test: caps[1].trim().to_string(),
        confident: !caps[2].is_empty(),
        delta: caps[3].parse().ok()?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkObservation {
    pub test: String,
    pub hunk: HunkId,
    pub delta: f64,
    pub confident: bool,
}

/// Observations of one test, keyed by the hunk that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestResultSet {
    observations: BTreeMap<HunkId, BenchmarkObservation>,
    has_confident: bool,
}

impl TestResultSet {
    /// Record an observation. A second observation for the same hunk is
    /// dropped and `false` returned.
    pub fn insert(&mut self, obs: BenchmarkObservation) -> bool {
        match self.observations.entry(obs.hunk.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(test = %obs.test, hunk = %obs.hunk, "duplicate result row ignored");
                false
            }
            Entry::Vacant(slot) => {
                self.has_confident |= obs.confident;
                slot.insert(obs);
                true
            }
        }
    }

    pub fn get(&self, hunk: &HunkId) -> Option<&BenchmarkObservation> {
        self.observations.get(hunk)
    }

    /// Whether at least one observation carries confidence marks.
    pub fn has_confident(&self) -> bool {
        self.has_confident
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Observations in hunk order.
    pub fn iter(&self) -> impl Iterator<Item = &BenchmarkObservation> {
        self.observations.values()
    }
}

/// All tests seen across every hunk's report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    tests: BTreeMap<String, TestResultSet>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, obs: BenchmarkObservation) -> bool {
        self.tests.entry(obs.test.clone()).or_default().insert(obs)
    }

    /// Fold one line of `hunk`'s report into the set. Returns whether the line
    /// was a data row.
    pub fn ingest_line(&mut self, hunk: &HunkId, line: &str) -> bool {
        let Some(row) = parse_row(line) else {
            return false;
        };
        self.record(BenchmarkObservation {
            test: row.test,
            hunk: hunk.clone(),
            delta: row.delta,
            confident: row.confident,
        });
        true
    }

    /// Fold a whole report. Returns the number of data rows.
    pub fn ingest<R: BufRead>(&mut self, hunk: &HunkId, reader: R) -> io::Result<usize> {
        let mut rows = 0;
        for line in reader.lines() {
            if self.ingest_line(hunk, &line?) {
                rows += 1;
            }
        }
        Ok(rows)
    }

    /// Move every observation of `other` into `self`.
    pub fn merge(&mut self, other: ResultSet) {
        for (_, set) in other.tests {
            for obs in set.observations.into_values() {
                self.record(obs);
            }
        }
    }

    pub fn get(&self, test: &str) -> Option<&TestResultSet> {
        self.tests.get(test)
    }

    pub fn tests(&self) -> impl Iterator<Item = (&str, &TestResultSet)> {
        self.tests.iter().map(|(name, set)| (name.as_str(), set))
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
