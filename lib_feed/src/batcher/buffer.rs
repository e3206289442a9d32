//! # Adaptive Batching Buffer
//!
//! Decouples bursty arrival of items from bounded-cost delivery to a consumer.
//!
//! ## Lifecycle of an item
//!
//! 1.  **Pending**: `add_item` appends to the pending buffer and makes sure one
//!     (and only one) processing cycle is scheduled.
//! 2.  **Queued**: when the cycle starts, the whole pending buffer is moved into
//!     the processing queue in one step. Later arrivals wait for the next cycle.
//! 3.  **Delivered**: the queue is drained in chunks. Each chunk holds at most
//!     `max_batch_size` items and is assembled within `max_processing_time`
//!     (always at least one item). Between chunks the batcher yields back to
//!     the scheduler, so one step never holds the thread for more than a slice.
//!
//! An item is in exactly one of those places at any time, so nothing is
//! delivered twice and nothing is dropped. Order is arrival order across chunks
//! and across cycles.
//!
//! ## Delivery lock
//!
//! Chunk assembly and delivery happen under a dedicated delivery lock, and so
//! does `force_flush`. A forced flush on one thread therefore can never
//! overtake a chunk that another thread already pulled.
//!
//! The lock records which thread owns it. A `BatchSink` may call `flush`,
//! `force_flush` or `destroy` on the batcher that is delivering to it: the
//! nested call runs on the owning thread without waiting, and since the
//! in-flight chunk was already pulled, what it delivers still comes after
//! that chunk.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use super::config::{BatchConfig, FlushMode};
use crate::core::errors::FeedError;
use crate::core::scheduler::{Scheduler, TaskToken, Wake};
use crate::core::sinks::BatchSink;

/// A scheduled task together with the ticket it will present when it runs.
#[derive(Debug, Clone, Copy)]
struct Scheduled {
    ticket: u64,
    token: TaskToken,
}

struct BufferState<T> {
    pending: VecDeque<T>,
    queue: VecDeque<T>,
    processing: bool,
    cycle: Option<Scheduled>,
    resume: Option<Scheduled>,
    next_ticket: u64,
    destroyed: bool,
    /// Thread currently holding the delivery lock.
    delivering: Option<ThreadId>,
}

impl<T> BufferState<T> {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Held for the duration of a delivery step. `None` when the step is nested
/// inside a delivery already running on the same thread.
struct DeliveryGuard<'a, T> {
    shared: &'a Shared<T>,
    lock: Option<MutexGuard<'a, ()>>,
}

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        if self.lock.is_some() {
            self.shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .delivering = None;
        }
    }
}

struct Shared<T> {
    config: BatchConfig,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn BatchSink<T>>,
    state: Mutex<BufferState<T>>,
    delivery: Mutex<()>,
}

/// # Batcher
///
/// Cheap to clone; all clones drive the same buffer.
pub struct Batcher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Batcher<T> {
    /// Creates an idle batcher.
    ///
    /// # Errors
    /// Returns `FeedError::InvalidConfig` when `config` fails validation.
    pub fn new(
        config: BatchConfig,
        scheduler: Arc<dyn Scheduler>,
        sink: Arc<dyn BatchSink<T>>,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                scheduler,
                sink,
                state: Mutex::new(BufferState {
                    pending: VecDeque::new(),
                    queue: VecDeque::new(),
                    processing: false,
                    cycle: None,
                    resume: None,
                    next_ticket: 0,
                    destroyed: false,
                    delivering: None,
                }),
                delivery: Mutex::new(()),
            }),
        })
    }

    /// The configuration this batcher was built with.
    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    /// Appends one item and ensures a processing cycle is scheduled.
    ///
    /// Repeated calls before the cycle starts share that one cycle.
    ///
    /// # Errors
    /// Returns `FeedError::BatcherDestroyed` after `destroy`; the item is not
    /// accepted.
    pub fn add_item(&self, item: T) -> Result<(), FeedError> {
        let mut state = self.shared.lock_state();
        if state.destroyed {
            log::warn!("Rejecting item: batcher already destroyed.");
            return Err(FeedError::BatcherDestroyed);
        }
        state.pending.push_back(item);
        Shared::schedule_cycle(&self.shared, &mut state);
        Ok(())
    }

    /// Cancels the scheduled cycle and starts one right away.
    ///
    /// Chunk caps still apply, so draining may take several cooperative steps.
    /// If a cycle is already running this only cancels the schedule; the
    /// running cycle picks up late arrivals when it finishes.
    pub fn flush(&self) {
        {
            let mut state = self.shared.lock_state();
            if let Some(cycle) = state.cycle.take() {
                self.shared.scheduler.cancel(cycle.token);
            }
            if !self.shared.begin_cycle(&mut state) {
                return;
            }
        }
        Shared::process_chunk(&self.shared, None);
    }

    /// Delivers everything pending or queued in one sink call, ignoring the
    /// chunk caps. Returns the number of items delivered.
    pub fn force_flush(&self) -> usize {
        self.shared.drain_all(false)
    }

    /// Cancels all scheduling, delivers every remaining item in one sink call
    /// and leaves the batcher unusable. Returns the number of items delivered.
    pub fn destroy(&self) -> usize {
        let delivered = self.shared.drain_all(true);
        log::debug!("Batcher destroyed after delivering {} remaining items.", delivered);
        delivered
    }

    /// Items not yet delivered (pending plus queued).
    pub fn len(&self) -> usize {
        let state = self.shared.lock_state();
        state.pending.len() + state.queue.len()
    }

    /// Whether no items are waiting for delivery.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether no cycle is scheduled or running and nothing is pending.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock_state();
        !state.processing && state.cycle.is_none() && state.pending.is_empty()
    }

    /// Whether `destroy` has been called.
    pub fn is_destroyed(&self) -> bool {
        self.shared.lock_state().destroyed
    }
}

impl<T: Send + 'static> Shared<T> {
    fn lock_state(&self) -> MutexGuard<'_, BufferState<T>> {
        self.state.lock().expect("Batcher state lock poisoned")
    }

    fn enter_delivery(&self) -> DeliveryGuard<'_, T> {
        let me = thread::current().id();
        if self.lock_state().delivering == Some(me) {
            return DeliveryGuard {
                shared: self,
                lock: None,
            };
        }
        let lock = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.lock_state().delivering = Some(me);
        DeliveryGuard {
            shared: self,
            lock: Some(lock),
        }
    }

    fn schedule_cycle(shared: &Arc<Self>, state: &mut BufferState<T>) {
        if state.cycle.is_some() || state.processing || state.destroyed {
            return;
        }
        let wake = match shared.config.mode {
            FlushMode::Immediate => Wake::NextFrame,
            FlushMode::Periodic => Wake::After(shared.config.flush_interval),
        };
        let ticket = state.ticket();
        let owner = Arc::clone(shared);
        let token = shared
            .scheduler
            .schedule(wake, Box::new(move || Shared::run_cycle(&owner, ticket)));
        state.cycle = Some(Scheduled { ticket, token });
    }

    fn run_cycle(shared: &Arc<Self>, ticket: u64) {
        {
            let mut state = shared.lock_state();
            match state.cycle {
                Some(cycle) if cycle.ticket == ticket => state.cycle = None,
                _ => return,
            }
            if !shared.begin_cycle(&mut state) {
                return;
            }
        }
        Shared::process_chunk(shared, None);
    }

    /// Moves the pending buffer into the processing queue. Returns false when
    /// there is nothing to start.
    fn begin_cycle(&self, state: &mut BufferState<T>) -> bool {
        if state.processing || state.pending.is_empty() {
            return false;
        }
        let pending = std::mem::take(&mut state.pending);
        state.queue.extend(pending);
        state.processing = true;
        log::trace!("Processing cycle started with {} items.", state.queue.len());
        true
    }

    fn process_chunk(shared: &Arc<Self>, resumed: Option<u64>) {
        let _delivery = shared.enter_delivery();

        let chunk = {
            let mut state = shared.lock_state();
            if let Some(ticket) = resumed {
                match state.resume {
                    Some(resume) if resume.ticket == ticket => state.resume = None,
                    _ => return,
                }
            }
            if !state.processing {
                return;
            }
            if state.queue.is_empty() {
                shared.finish_cycle(&mut state);
                return;
            }
            shared.pull_chunk(&mut state)
        };

        shared.deliver(chunk);

        let mut state = shared.lock_state();
        if !state.processing {
            return;
        }
        if state.queue.is_empty() {
            shared.finish_cycle(&mut state);
        } else if state.resume.is_none() {
            // A nested flush from the sink may already have scheduled the next step.
            let ticket = state.ticket();
            let owner = Arc::clone(shared);
            let token = shared.scheduler.schedule(
                Wake::Yield,
                Box::new(move || Shared::process_chunk(&owner, Some(ticket))),
            );
            state.resume = Some(Scheduled { ticket, token });
        }
    }

    fn pull_chunk(&self, state: &mut BufferState<T>) -> Vec<T> {
        let started = Instant::now();
        let limit = self.config.max_batch_size.min(state.queue.len());
        let mut chunk = Vec::with_capacity(limit);
        while let Some(item) = state.queue.pop_front() {
            chunk.push(item);
            if chunk.len() >= self.config.max_batch_size
                || started.elapsed() >= self.config.max_processing_time
            {
                break;
            }
        }
        chunk
    }

    fn finish_cycle(self: &Arc<Self>, state: &mut BufferState<T>) {
        state.processing = false;
        if !state.pending.is_empty() {
            log::trace!(
                "{} items arrived during the cycle; scheduling another.",
                state.pending.len()
            );
            Shared::schedule_cycle(self, state);
        }
    }

    fn drain_all(&self, destroy: bool) -> usize {
        let _delivery = self.enter_delivery();

        let items: Vec<T> = {
            let mut state = self.lock_state();
            if let Some(cycle) = state.cycle.take() {
                self.scheduler.cancel(cycle.token);
            }
            if let Some(resume) = state.resume.take() {
                self.scheduler.cancel(resume.token);
            }
            state.processing = false;
            if destroy {
                state.destroyed = true;
            }
            let pending = std::mem::take(&mut state.pending);
            let mut items: Vec<T> = std::mem::take(&mut state.queue).into();
            items.extend(pending);
            items
        };

        let count = items.len();
        if count > 0 {
            self.deliver(items);
        }
        count
    }

    fn deliver(&self, items: Vec<T>) {
        let count = items.len();
        let started = Instant::now();
        let sink = &self.sink;
        match catch_unwind(AssertUnwindSafe(|| sink.deliver(items))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Batch sink failed on {} items: {:#}", count, e),
            Err(panic_info) => {
                let message = panic_info
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_info.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Batch sink panicked on {} items: {}", count, message);
            }
        }
        let took = started.elapsed();
        if took > self.config.max_processing_time {
            log::debug!(
                "Delivering {} items took {:?}, over the {:?} slice.",
                count,
                took,
                self.config.max_processing_time
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::ManualScheduler;
    use std::time::Duration;

    type Deliveries = Arc<Mutex<Vec<Vec<u32>>>>;

    fn recording_sink() -> (Deliveries, Arc<dyn BatchSink<u32>>) {
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&deliveries);
        let sink = move |items: Vec<u32>| -> anyhow::Result<()> {
            seen.lock().unwrap().push(items);
            Ok(())
        };
        (deliveries, Arc::new(sink))
    }

    fn batcher(config: BatchConfig) -> (Arc<ManualScheduler>, Deliveries, Batcher<u32>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let (deliveries, sink) = recording_sink();
        let batcher = Batcher::new(config, scheduler.clone(), sink).unwrap();
        (scheduler, deliveries, batcher)
    }

    fn flatten(deliveries: &Deliveries) -> Vec<u32> {
        deliveries.lock().unwrap().iter().flatten().copied().collect()
    }

    #[test]
    fn one_cycle_splits_into_capped_chunks() {
        let (scheduler, deliveries, batcher) =
            batcher(BatchConfig::immediate(2, Duration::from_secs(1)));

        batcher.add_item(1).unwrap();
        batcher.add_item(2).unwrap();
        batcher.add_item(3).unwrap();
        assert_eq!(scheduler.pending(), 1);
        assert!(deliveries.lock().unwrap().is_empty());

        scheduler.run_ready();
        assert_eq!(*deliveries.lock().unwrap(), vec![vec![1, 2], vec![3]]);
        assert!(batcher.is_idle());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn chunks_yield_between_steps() {
        let (scheduler, deliveries, batcher) =
            batcher(BatchConfig::immediate(3, Duration::from_secs(1)));
        for i in 0..7 {
            batcher.add_item(i).unwrap();
        }

        // The cycle task delivers one chunk, then yields to the scheduler.
        assert!(scheduler.run_next());
        assert_eq!(*deliveries.lock().unwrap(), vec![vec![0, 1, 2]]);
        assert_eq!(batcher.len(), 4);
        assert_eq!(scheduler.pending(), 1);

        assert!(scheduler.run_next());
        assert_eq!(batcher.len(), 1);

        scheduler.run_ready();
        assert_eq!(
            *deliveries.lock().unwrap(),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
    }

    #[test]
    fn items_added_mid_cycle_get_a_new_cycle() {
        let scheduler = Arc::new(ManualScheduler::new());
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Batcher<u32>>>> = Arc::new(Mutex::new(None));

        let seen = Arc::clone(&deliveries);
        let feedback = Arc::clone(&slot);
        let sink = move |items: Vec<u32>| -> anyhow::Result<()> {
            if items == vec![1] {
                let guard = feedback.lock().unwrap();
                let batcher = guard.as_ref().unwrap();
                batcher.add_item(10).unwrap();
                batcher.add_item(11).unwrap();
            }
            seen.lock().unwrap().push(items);
            Ok(())
        };
        let batcher = Batcher::new(
            BatchConfig::immediate(1, Duration::from_secs(1)),
            scheduler.clone(),
            Arc::new(sink),
        )
        .unwrap();
        *slot.lock().unwrap() = Some(batcher.clone());

        batcher.add_item(1).unwrap();
        batcher.add_item(2).unwrap();
        scheduler.run_ready();

        assert_eq!(
            *deliveries.lock().unwrap(),
            vec![vec![1], vec![2], vec![10], vec![11]]
        );
        assert!(batcher.is_idle());
    }

    fn self_referencing(
        config: BatchConfig,
        on_chunk: impl Fn(&Batcher<u32>, &[u32]) + Send + Sync + 'static,
    ) -> (Arc<ManualScheduler>, Deliveries, Batcher<u32>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Batcher<u32>>>> = Arc::new(Mutex::new(None));

        let seen = Arc::clone(&deliveries);
        let feedback = Arc::clone(&slot);
        let sink = move |items: Vec<u32>| -> anyhow::Result<()> {
            seen.lock().unwrap().push(items.clone());
            let batcher = feedback.lock().unwrap().clone();
            if let Some(batcher) = batcher {
                on_chunk(&batcher, &items);
            }
            Ok(())
        };
        let batcher = Batcher::new(config, scheduler.clone(), Arc::new(sink)).unwrap();
        *slot.lock().unwrap() = Some(batcher.clone());
        (scheduler, deliveries, batcher)
    }

    #[test]
    fn destroy_from_inside_the_sink_delivers_the_rest_once() {
        let (scheduler, deliveries, batcher) = self_referencing(
            BatchConfig::immediate(2, Duration::from_secs(1)),
            |batcher, items| {
                if items.first() == Some(&0) {
                    assert_eq!(batcher.destroy(), 3);
                }
            },
        );
        for i in 0..5 {
            batcher.add_item(i).unwrap();
        }

        scheduler.run_ready();
        assert_eq!(
            *deliveries.lock().unwrap(),
            vec![vec![0, 1], vec![2, 3, 4]]
        );
        assert!(batcher.is_destroyed());
        assert_eq!(scheduler.pending(), 0);
        assert!(batcher.add_item(5).is_err());
    }

    #[test]
    fn force_flush_from_inside_the_sink_keeps_the_batcher_usable() {
        let (scheduler, deliveries, batcher) = self_referencing(
            BatchConfig::immediate(2, Duration::from_secs(1)),
            |batcher, items| {
                if items.first() == Some(&0) {
                    batcher.flush();
                    assert_eq!(batcher.force_flush(), 3);
                }
            },
        );
        for i in 0..5 {
            batcher.add_item(i).unwrap();
        }
        scheduler.run_ready();

        batcher.add_item(5).unwrap();
        scheduler.run_ready();
        assert_eq!(
            *deliveries.lock().unwrap(),
            vec![vec![0, 1], vec![2, 3, 4], vec![5]]
        );
        assert!(batcher.is_idle());
    }

    #[test]
    fn time_slice_cuts_chunks_but_never_below_one_item() {
        let scheduler = Arc::new(ManualScheduler::new());
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&deliveries);
        // Every delivery overruns the slice.
        let sink = move |items: Vec<u32>| -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            seen.lock().unwrap().push(items);
            Ok(())
        };
        let batcher = Batcher::new(
            BatchConfig::immediate(100, Duration::from_nanos(1)),
            scheduler.clone(),
            Arc::new(sink),
        )
        .unwrap();
        for i in 0..10 {
            batcher.add_item(i).unwrap();
        }

        // First step delivers one chunk, then yields.
        assert!(scheduler.run_next());
        assert_eq!(deliveries.lock().unwrap().len(), 1);
        assert_eq!(scheduler.pending(), 1);

        scheduler.run_ready();
        let chunks = deliveries.lock().unwrap().clone();
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
        // A 1ns slice cannot fit the 100-item cap.
        assert!(chunks.len() > 1);
        assert_eq!(flatten(&deliveries), (0..10).collect::<Vec<_>>());
        assert!(batcher.is_idle());
    }

    #[test]
    fn periodic_mode_waits_for_interval() {
        let (scheduler, deliveries, batcher) = batcher(BatchConfig::periodic(
            10,
            Duration::from_secs(1),
            Duration::from_millis(250),
        ));
        batcher.add_item(1).unwrap();
        batcher.add_item(2).unwrap();

        assert_eq!(scheduler.run_ready(), 0);
        scheduler.advance(Duration::from_millis(249));
        assert!(deliveries.lock().unwrap().is_empty());

        scheduler.advance(Duration::from_millis(1));
        assert_eq!(*deliveries.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[test]
    fn flush_starts_immediately_but_keeps_caps() {
        let (scheduler, deliveries, batcher) = batcher(BatchConfig::periodic(
            2,
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));
        for i in 0..5 {
            batcher.add_item(i).unwrap();
        }

        batcher.flush();
        assert_eq!(*deliveries.lock().unwrap(), vec![vec![0, 1]]);

        // The periodic schedule was cancelled; only the yield to the next chunk remains.
        scheduler.run_ready();
        assert_eq!(
            *deliveries.lock().unwrap(),
            vec![vec![0, 1], vec![2, 3], vec![4]]
        );
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn force_flush_delivers_everything_in_one_call() {
        let (scheduler, deliveries, batcher) =
            batcher(BatchConfig::immediate(2, Duration::from_secs(1)));
        for i in 0..5 {
            batcher.add_item(i).unwrap();
        }

        assert_eq!(batcher.force_flush(), 5);
        assert_eq!(*deliveries.lock().unwrap(), vec![vec![0, 1, 2, 3, 4]]);

        scheduler.run_ready();
        assert_eq!(deliveries.lock().unwrap().len(), 1);
        assert_eq!(batcher.force_flush(), 0);
    }

    #[test]
    fn force_flush_mid_cycle_keeps_order() {
        let (scheduler, deliveries, batcher) =
            batcher(BatchConfig::immediate(2, Duration::from_secs(1)));
        for i in 0..5 {
            batcher.add_item(i).unwrap();
        }
        batcher.flush();
        batcher.add_item(5).unwrap();

        assert_eq!(batcher.force_flush(), 4);
        scheduler.run_ready();
        assert_eq!(
            *deliveries.lock().unwrap(),
            vec![vec![0, 1], vec![2, 3, 4, 5]]
        );
    }

    #[test]
    fn destroy_delivers_remaining_and_rejects_new_items() {
        let (scheduler, deliveries, batcher) =
            batcher(BatchConfig::immediate(2, Duration::from_secs(1)));
        batcher.add_item(7).unwrap();
        batcher.add_item(8).unwrap();
        batcher.add_item(9).unwrap();

        assert_eq!(batcher.destroy(), 3);
        assert!(batcher.is_destroyed());
        assert!(batcher.is_empty());
        assert!(matches!(batcher.add_item(10), Err(FeedError::BatcherDestroyed)));

        assert_eq!(scheduler.run_ready(), 0);
        assert_eq!(flatten(&deliveries), vec![7, 8, 9]);
    }

    #[test]
    fn failing_sink_does_not_stop_the_cycle() {
        let scheduler = Arc::new(ManualScheduler::new());
        let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&deliveries);
        let sink = move |items: Vec<u32>| -> anyhow::Result<()> {
            let first = items[0];
            seen.lock().unwrap().push(items);
            match first {
                0 => anyhow::bail!("consumer rejected chunk"),
                2 => panic!("consumer blew up"),
                _ => Ok(()),
            }
        };
        let batcher = Batcher::new(
            BatchConfig::immediate(2, Duration::from_secs(1)),
            scheduler.clone(),
            Arc::new(sink),
        )
        .unwrap();
        for i in 0..6 {
            batcher.add_item(i).unwrap();
        }

        scheduler.run_ready();
        assert_eq!(flatten(&deliveries), vec![0, 1, 2, 3, 4, 5]);
        assert!(batcher.is_idle());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (_, sink) = recording_sink();
        let result = Batcher::new(
            BatchConfig::immediate(0, Duration::from_millis(5)),
            scheduler,
            sink,
        );
        assert!(matches!(result, Err(FeedError::InvalidConfig(_))));
    }

    #[test]
    fn no_loss_or_reordering_across_many_cycles() {
        let (scheduler, deliveries, batcher) =
            batcher(BatchConfig::immediate(7, Duration::from_secs(1)));
        let mut expected = Vec::new();
        for round in 0..20u32 {
            for i in 0..(round * 3 + 1) {
                let item = round * 1000 + i;
                batcher.add_item(item).unwrap();
                expected.push(item);
            }
            if round % 3 == 0 {
                scheduler.run_ready();
            }
        }
        scheduler.run_ready();

        assert_eq!(flatten(&deliveries), expected);
        assert!(deliveries
            .lock()
            .unwrap()
            .iter()
            .all(|chunk| !chunk.is_empty() && chunk.len() <= 7));
    }
}
