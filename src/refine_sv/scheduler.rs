//! Concurrent, resumable refinement of all variants in a key list
//!

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use unwrap::unwrap;

use super::orchestrator::VariantRefiner;
use crate::result_store::{RefinementMap, ResultStore};

/// Refinement stops when at least BREAKER_MIN_ATTEMPTED variants have been attempted in this run
/// and the fraction of attempts which errored exceeds BREAKER_MAX_ERROR_FRACTION
const BREAKER_MIN_ATTEMPTED: usize = 50;
const BREAKER_MAX_ERROR_FRACTION: f64 = 0.5;

/// Progress counters for one scheduler run
///
/// `processed` counts every claimed key, including those skipped because they were found in the
/// result store. `attempted` counts only the keys passed to the refiner in this run.
///
#[derive(Default)]
pub struct SchedulerCounters {
    pub processed: AtomicUsize,
    pub resumed: AtomicUsize,
    pub attempted: AtomicUsize,
    pub errored: AtomicUsize,
    pub refined: AtomicUsize,
    pub unrefined: AtomicUsize,
}

impl SchedulerCounters {
    fn get(x: &AtomicUsize) -> usize {
        x.load(Ordering::Relaxed)
    }

    /// True if so many variants have errored that the run should stop claiming new work
    fn is_breaker_tripped(&self) -> bool {
        let attempted = Self::get(&self.attempted);
        let errored = Self::get(&self.errored);
        attempted >= BREAKER_MIN_ATTEMPTED
            && errored as f64 > BREAKER_MAX_ERROR_FRACTION * attempted as f64
    }
}

/// Summary of a completed scheduler run
#[derive(Debug, Default, PartialEq)]
pub struct SchedulerSummary {
    pub processed: usize,
    pub resumed: usize,
    pub attempted: usize,
    pub errored: usize,
    pub refined: usize,
    pub unrefined: usize,
    pub breaker_tripped: bool,
    pub refinement_time_secs: f64,
}

impl SchedulerSummary {
    fn new(counters: &SchedulerCounters, breaker_tripped: bool, refinement_time_secs: f64) -> Self {
        let get = SchedulerCounters::get;
        Self {
            processed: get(&counters.processed),
            resumed: get(&counters.resumed),
            attempted: get(&counters.attempted),
            errored: get(&counters.errored),
            refined: get(&counters.refined),
            unrefined: get(&counters.unrefined),
            breaker_tripped,
            refinement_time_secs,
        }
    }
}

/// Shared state for all worker loops of one scheduler run
struct SchedulerState<'a> {
    keys: &'a [String],
    next_key_index: AtomicUsize,
    resume: bool,
    refiner: &'a dyn VariantRefiner,
    store: &'a ResultStore,
    results: Mutex<RefinementMap>,
    counters: SchedulerCounters,
    breaker_tripped: AtomicBool,
}

impl SchedulerState<'_> {
    /// Claim the next unprocessed key, or None if the queue is empty
    fn claim_key(&self) -> Option<&str> {
        let index = self.next_key_index.fetch_add(1, Ordering::Relaxed);
        self.keys.get(index).map(|x| x.as_str())
    }

    fn process_key(&self, key: &str) {
        let counters = &self.counters;
        if self.resume && self.store.contains(key) {
            debug!("Skipping variant '{key}' found in result store");
            counters.resumed.fetch_add(1, Ordering::Relaxed);
            counters.processed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        counters.attempted.fetch_add(1, Ordering::Relaxed);
        let result = self.refiner.refine(key).and_then(|refined| match refined {
            Some(refined) => {
                self.store.add_result(key, &refined)?;
                self.results
                    .lock()
                    .unwrap()
                    .insert(key.to_string(), refined);
                counters.refined.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => {
                self.store.add_null(key)?;
                counters.unrefined.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });
        if let Err(e) = result {
            warn!("Error refining variant '{key}': {e}");
            counters.errored.fetch_add(1, Ordering::Relaxed);
        }
        counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Run one worker loop until the queue is empty or the error breaker trips
    fn worker_loop(&self) {
        loop {
            if self.breaker_tripped.load(Ordering::Relaxed) {
                break;
            }
            if self.counters.is_breaker_tripped() {
                if !self.breaker_tripped.swap(true, Ordering::Relaxed) {
                    error!(
                        "Stopping refinement after {} errors in {} attempted variants",
                        SchedulerCounters::get(&self.counters.errored),
                        SchedulerCounters::get(&self.counters.attempted)
                    );
                }
                break;
            }
            let key = match self.claim_key() {
                Some(x) => x,
                None => break,
            };
            self.process_key(key);
        }
    }
}

/// Refine all variants in `keys` over a pool of `thread_count` worker threads
///
/// Accepted refinements and null results are persisted to `store` as soon as each variant
/// completes. When `resume` is set, variants already in the store are not refined again.
///
/// Returns the map of all accepted refinements, including those from earlier runs recorded in
/// the store, together with a summary of the run.
///
pub fn refine_variants(
    keys: &[String],
    thread_count: usize,
    resume: bool,
    refiner: &dyn VariantRefiner,
    store: &ResultStore,
) -> (RefinementMap, SchedulerSummary) {
    info!(
        "Starting refinement of {} variants on {thread_count} threads",
        keys.len()
    );
    let start_time = Instant::now();

    let worker_pool = unwrap!(
        rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .build(),
        "Unable to create refinement thread pool"
    );

    let state = SchedulerState {
        keys,
        next_key_index: AtomicUsize::new(0),
        resume,
        refiner,
        store,
        results: Mutex::new(RefinementMap::new()),
        counters: SchedulerCounters::default(),
        breaker_tripped: AtomicBool::new(false),
    };
    let state = &state;

    worker_pool.scope(move |scope| {
        for _ in 0..thread_count {
            scope.spawn(move |_| {
                state.worker_loop();
            });
        }
    });

    let breaker_tripped = state.breaker_tripped.load(Ordering::Relaxed);
    let summary = SchedulerSummary::new(
        &state.counters,
        breaker_tripped,
        start_time.elapsed().as_secs_f64(),
    );
    info!(
        "Finished refinement. Processed {} variants, with {} errors",
        summary.processed, summary.errored
    );

    let mut results = std::mem::take(&mut *state.results.lock().unwrap());
    let replayed = unwrap!(
        store.fill_map_from_store(&mut results),
        "Unable to read result store"
    );
    if replayed > 0 {
        info!("Added {replayed} refined variants from the result store");
    }
    debug!("Result store holds {} completed variants", store.len());
    (results, summary)
}
