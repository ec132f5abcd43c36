//! Independent units of work on a bounded thread pool.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{error, warn};

use super::{BenchmarkError, Result};

/// A point in time after which a unit should give up. Checked cooperatively.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    pub fn never() -> Self {
        Self { at: None }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Run `f` once per unit on a pool of `n_jobs` threads.
///
/// Each unit gets its own [`Deadline`], started when the unit starts. A unit
/// that times out is recorded as `None` and its siblings carry on. Any other
/// failure is returned after every unit has finished.
pub fn run_units<K, T, F>(
    units: Vec<K>,
    n_jobs: usize,
    budget: Option<Duration>,
    show_progress: bool,
    f: F,
) -> Result<BTreeMap<K, Option<T>>>
where
    K: Ord + Display + Send,
    T: Send,
    F: Fn(&K, Deadline) -> Result<T> + Sync,
{
    let pool = ThreadPoolBuilder::new().num_threads(n_jobs.max(1)).build()?;
    let bar = if show_progress {
        ProgressBar::new(units.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let results: Vec<(K, Result<T>)> = pool.install(|| {
        units
            .into_par_iter()
            .progress_with(bar)
            .map(|unit| {
                let deadline = budget.map_or_else(Deadline::never, Deadline::after);
                let result = f(&unit, deadline);
                (unit, result)
            })
            .collect()
    });

    let mut out = BTreeMap::new();
    let mut failure = None;
    for (unit, result) in results {
        match result {
            Ok(value) => {
                out.insert(unit, Some(value));
            }
            Err(BenchmarkError::Timeout(_)) => {
                warn!(unit = %unit, "unit timed out; recording no result");
                out.insert(unit, None);
            }
            Err(e) => {
                error!(unit = %unit, error = %e, "unit failed");
                failure.get_or_insert(e);
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn deadlines() {
        assert!(!Deadline::never().expired());
        assert!(Deadline::after(Duration::ZERO).expired());
        assert!(!Deadline::after(Duration::from_secs(3600)).expired());
    }

    #[test]
    fn every_unit_runs_once() {
        let calls = AtomicUsize::new(0);
        let out = run_units(vec!["b", "a", "c"], 2, None, false, |unit, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(unit.len() + 10)
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert!(out.values().all(|v| *v == Some(11)));
    }

    #[test]
    fn timed_out_unit_is_none_and_siblings_finish() {
        let out = run_units(
            vec!["fast", "slow"],
            2,
            Some(Duration::from_millis(50)),
            false,
            |unit, deadline| {
                if *unit == "slow" {
                    while !deadline.expired() {
                        thread::sleep(Duration::from_millis(5));
                    }
                    return Err(BenchmarkError::Timeout((*unit).to_string()));
                }
                Ok(1)
            },
        )
        .unwrap();

        assert_eq!(out["fast"], Some(1));
        assert_eq!(out["slow"], None);
    }

    #[test]
    fn other_failures_propagate_after_all_units() {
        let calls = AtomicUsize::new(0);
        let err = run_units(vec![1, 2, 3], 1, None, false, |unit, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            if *unit == 1 {
                Err(BenchmarkError::MissingEvaluator("tde".into()))
            } else {
                Ok(())
            }
        })
        .unwrap_err();

        assert!(matches!(err, BenchmarkError::MissingEvaluator(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
