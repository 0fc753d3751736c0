//! Batching executor.
//!
//! Calls submitted from any thread are appended to a single open batch. The
//! batch is closed and handed to the worker pool as soon as it holds
//! `max_batch_size` calls, or once it is `max_batch_window` old; the second
//! condition is checked by a ticker thread every `tick_interval`. A worker
//! takes an endpoint from the pool, sends one aggregate call for the whole
//! batch and resolves every future of the batch with its own result.

mod batch;
mod future;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Sender};
use ethers_core::types::Address;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use self::batch::{DispatchedBatch, OpenBatch};
pub use self::future::CallFuture;
use crate::aggregate::{CallResult, Multicall};
use crate::call::Call;
use crate::config::ExecutorConfig;
use crate::error::{MulticallError, Result};
use crate::pool::EndpointPool;
use crate::transport::Transport;

/// Groups calls into aggregate batches and executes them on a worker pool.
///
/// Dropping the executor stops the ticker and dispatches the pending batch;
/// batches already handed to the workers still complete.
pub struct MulticallExecutor<C: Transport + Clone + 'static> {
    shared: Arc<Shared<C>>,
    ticker: Option<Ticker>,
}

struct Shared<C> {
    config: ExecutorConfig,
    pool: Arc<EndpointPool<C>>,
    workers: ThreadPool,
    open: Mutex<Option<OpenBatch>>,
    next_batch_id: AtomicU64,
    /// Set once the ticker is gone; every submission is then dispatched at once.
    stopped: AtomicBool,
}

impl<C: Transport + Clone + 'static> MulticallExecutor<C> {
    /// Starts the worker threads and the ticker.
    pub fn new(pool: Arc<EndpointPool<C>>, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;

        let workers = ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|index| format!("multicall-worker-{index}"))
            .panic_handler(|_| error!("multicall worker panicked while executing a batch"))
            .build()
            .map_err(|err| MulticallError::Startup(err.to_string()))?;

        info!(
            "starting multicall executor: {} worker(s), batches of up to {} call(s) or {:?}, {} endpoint(s)",
            config.worker_count,
            config.max_batch_size,
            config.max_batch_window,
            pool.len()
        );

        let shared = Arc::new(Shared {
            config,
            pool,
            workers,
            open: Mutex::new(None),
            next_batch_id: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });
        let ticker = Ticker::spawn(shared.clone())?;

        Ok(Self {
            shared,
            ticker: Some(ticker),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn pool(&self) -> &Arc<EndpointPool<C>> {
        &self.shared.pool
    }

    /// Appends `call` to the open batch and returns the handle on its result.
    ///
    /// Never blocks on the network: if the call fills the batch, the batch is
    /// handed to the workers before returning. After [`shutdown`](Self::shutdown)
    /// every call is dispatched on its own.
    pub fn submit(&self, call: Call) -> CallFuture {
        let mut open = self.shared.open.lock();
        let stopped = self.shared.stopped.load(Ordering::Acquire);
        let future = open
            .get_or_insert_with(|| self.shared.open_batch())
            .push(call);
        self.shared.dispatch_due(&mut open, Instant::now(), stopped);
        future
    }

    /// Number of calls waiting in the open batch.
    pub fn pending_len(&self) -> usize {
        self.shared.open.lock().as_ref().map_or(0, OpenBatch::len)
    }

    /// Dispatches the open batch now, whatever its size and age.
    ///
    /// Returns `false` when there was nothing to dispatch.
    pub fn flush(&self) -> bool {
        let mut open = self.shared.open.lock();
        self.shared.dispatch_due(&mut open, Instant::now(), true)
    }

    /// Discards the open batch without executing it.
    ///
    /// Its futures resolve with [`MulticallError::Cancelled`]. Batches already
    /// dispatched are not affected. Returns the number of discarded calls.
    pub fn cancel_pending(&self) -> usize {
        let Some(batch) = self.shared.open.lock().take() else {
            return 0;
        };

        let description = batch.to_string();
        let cancelled = batch.cancel();
        info!("cancelled {description}");
        cancelled
    }

    /// Stops the ticker and dispatches the pending batch.
    ///
    /// Calling it more than once is harmless. Calls submitted afterwards are
    /// no longer batched: each one is dispatched as soon as it is submitted.
    pub fn shutdown(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };

        ticker.stop();
        self.shared.stopped.store(true, Ordering::Release);
        if self.flush() {
            debug!("dispatched the pending batch on shutdown");
        }
        info!("multicall executor stopped");
    }
}

impl<C: Transport + Clone + 'static> Drop for MulticallExecutor<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: Transport + Clone + 'static> Shared<C> {
    fn open_batch(&self) -> OpenBatch {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        debug!("opening batch #{id}");
        OpenBatch::new(id, Instant::now())
    }

    /// Hands the open batch to the workers if it is due, or unconditionally with `force`.
    ///
    /// Must be called with the open-batch lock held.
    fn dispatch_due(&self, open: &mut Option<OpenBatch>, now: Instant, force: bool) -> bool {
        let due = open.as_ref().is_some_and(|batch| {
            force
                || batch.is_due(
                    now,
                    self.config.max_batch_size,
                    self.config.max_batch_window,
                )
        });
        if !due {
            return false;
        }
        let Some(batch) = open.take() else {
            return false;
        };

        debug!("dispatching {batch}");
        let batch = batch.close().dispatch();
        let pool = self.pool.clone();
        let aggregator = self.config.aggregator;
        self.workers.spawn(move || execute_batch(batch, &pool, aggregator));
        true
    }

    fn tick(&self) {
        let mut open = self.open.lock();
        self.dispatch_due(&mut open, Instant::now(), false);
    }
}

fn execute_batch<C: Transport + Clone>(
    batch: DispatchedBatch,
    pool: &EndpointPool<C>,
    aggregator: Address,
) {
    let description = batch.to_string();
    debug!("executing {description}, opened {:?} ago", batch.age());

    let (calls, resolver) = batch.into_parts();
    let outcome = run_aggregate(calls, pool, aggregator);
    match &outcome {
        Ok(results) => debug!("{description} resolved with {} result(s)", results.len()),
        Err(err) => warn!("{description} failed: {err}"),
    }

    resolver.resolve(outcome.map(Arc::new));
}

fn run_aggregate<C: Transport + Clone>(
    calls: Vec<Call>,
    pool: &EndpointPool<C>,
    aggregator: Address,
) -> Result<Vec<CallResult>> {
    let endpoint = pool
        .acquire(true)?
        .ok_or(MulticallError::NoEndpointAvailable)?;
    let multicall = Multicall::with_calls(aggregator, calls);
    debug!(
        "sending aggregate of {} call(s) through {}",
        multicall.len(),
        endpoint.label()
    );

    Ok(multicall.call(endpoint.connection())?.results)
}

/// Thread closing batches that outlived the window.
struct Ticker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn<C: Transport + Clone + 'static>(shared: Arc<Shared<C>>) -> Result<Self> {
        let (stop, stopped) = channel::bounded::<()>(1);
        let ticks = channel::tick(shared.config.tick_interval);

        let handle = thread::Builder::new()
            .name("multicall-ticker".to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(ticks) -> _ => {
                            shared.tick();
                        }
                        recv(stopped) -> _ => break,
                    }
                }
                debug!("multicall ticker stopped");
            })
            .map_err(|err| MulticallError::Startup(err.to_string()))?;

        Ok(Self { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            error!("multicall ticker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use ethers_core::abi::Token;
    use ethers_core::types::H160;

    use super::*;
    use crate::endpoint::Endpoint;
    use crate::test_utils::FakeChain;

    const TOKEN: Address = H160([0x01; 20]);
    const OWNER: Address = H160([0x02; 20]);
    const REGISTRY: Address = H160([0x03; 20]);
    const ECHO: Address = H160([0x04; 20]);

    const WAIT: Duration = Duration::from_secs(5);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn executor(
        chain: &Arc<FakeChain>,
        config: ExecutorConfig,
    ) -> MulticallExecutor<Arc<FakeChain>> {
        init_logger();
        let pool = EndpointPool::new(vec![Endpoint::new(chain.clone(), Duration::ZERO)]);
        MulticallExecutor::new(Arc::new(pool), config).unwrap()
    }

    fn slow_window() -> ExecutorConfig {
        ExecutorConfig::default().with_max_batch_window(Duration::from_secs(60))
    }

    fn echo_chain() -> FakeChain {
        FakeChain::new().with_contract(ECHO, |data| data[4..].to_vec())
    }

    fn echo(value: u64) -> Call {
        Call::new(
            ECHO,
            "value(uint256)(uint256)",
            vec![Token::Uint(value.into())],
        )
        .unwrap()
    }

    #[test]
    fn should_resolve_mixed_calls_from_one_aggregate() {
        let chain = Arc::new(
            FakeChain::new()
                .returning(TOKEN, vec![Token::Uint(42.into())])
                .returning(REGISTRY, vec![Token::Address(OWNER)])
                .returning(OWNER, vec![Token::Bool(true)]),
        );
        let executor = executor(&chain, ExecutorConfig::default());

        let supply = executor.submit(Call::new(TOKEN, "totalSupply()(uint256)", vec![]).unwrap());
        let owner = executor.submit(
            Call::new(REGISTRY, "owner(uint256)(address)", vec![Token::Uint(1.into())]).unwrap(),
        );
        let active = executor.submit(Call::new(OWNER, "isActive()(bool)", vec![]).unwrap());

        assert_eq!(supply.get().unwrap(), Token::Uint(42.into()));
        assert_eq!(owner.get().unwrap(), Token::Address(OWNER));
        assert_eq!(active.get().unwrap(), Token::Bool(true));
        assert_eq!(chain.aggregate_sizes(), vec![3]);
        assert_eq!(
            (supply.index(), owner.index(), active.index()),
            (0, 1, 2)
        );
    }

    #[test]
    fn full_batch_should_be_dispatched_on_submit() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window().with_max_batch_size(5));

        let futures = (0..5).map(|i| executor.submit(echo(i))).collect::<Vec<_>>();

        for (i, future) in futures.iter().enumerate() {
            assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(i.into()));
        }
        assert_eq!(chain.aggregate_sizes(), vec![5]);
        assert_eq!(executor.pending_len(), 0);
    }

    #[test]
    fn lone_call_should_be_dispatched_after_the_window() {
        let chain = Arc::new(echo_chain());
        let window = Duration::from_millis(100);
        let executor = executor(&chain, ExecutorConfig::default().with_max_batch_window(window));

        let start = Instant::now();
        let future = executor.submit(echo(7));
        assert!(!future.is_ready());
        assert_eq!(executor.pending_len(), 1);

        assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(7.into()));
        assert!(start.elapsed() >= window, "resolved after {:?}", start.elapsed());
        assert_eq!(chain.aggregate_sizes(), vec![1]);
    }

    #[test]
    fn transport_failure_should_reach_every_future() {
        let chain = Arc::new(echo_chain().failing("connection reset by peer"));
        let executor = executor(&chain, slow_window().with_max_batch_size(5));

        let futures = (0..5).map(|i| executor.submit(echo(i))).collect::<Vec<_>>();

        let errors = futures
            .iter()
            .map(|future| match future.get_timeout(WAIT) {
                Err(MulticallError::Transport(err)) => err,
                other => panic!("expected a transport error, got {other:?}"),
            })
            .collect::<Vec<_>>();

        for err in &errors {
            assert!(Arc::ptr_eq(err, &errors[0]));
            assert!(err.to_string().contains("connection reset by peer"));
        }
    }

    #[test]
    fn repeated_get_should_return_the_same_error() {
        let chain = Arc::new(echo_chain().failing("node unavailable"));
        let executor = executor(&chain, slow_window().with_max_batch_size(1));

        let future = executor.submit(echo(1));

        let (Err(MulticallError::Transport(first)), Err(MulticallError::Transport(second))) =
            (future.get(), future.get())
        else {
            panic!("expected transport errors");
        };
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn repeated_get_should_return_the_same_value() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window().with_max_batch_size(1));

        let future = executor.submit(echo(9));

        assert_eq!(future.get().unwrap(), Token::Uint(9.into()));
        assert_eq!(future.get().unwrap(), Token::Uint(9.into()));
        assert!(future.is_ready());
    }

    #[test]
    fn undecodable_output_should_fail_only_its_call() {
        let chain = Arc::new(
            echo_chain().with_contract(TOKEN, |_| vec![0x01, 0x02, 0x03]),
        );
        let executor = executor(&chain, slow_window().with_max_batch_size(3));

        let first = executor.submit(echo(1));
        let broken = executor.submit(Call::new(TOKEN, "totalSupply()(uint256)", vec![]).unwrap());
        let last = executor.submit(echo(3));

        assert_eq!(first.get().unwrap(), Token::Uint(1.into()));
        assert!(matches!(
            broken.get(),
            Err(MulticallError::DecodeError { index: 1, .. })
        ));
        assert_eq!(last.get().unwrap(), Token::Uint(3.into()));
    }

    #[test]
    fn cancel_pending_should_resolve_futures_without_sending() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window());

        let first = executor.submit(echo(1));
        let second = executor.submit(echo(2));

        assert_eq!(executor.cancel_pending(), 2);
        assert_eq!(executor.cancel_pending(), 0);
        assert!(matches!(first.get(), Err(MulticallError::Cancelled)));
        assert!(matches!(second.get(), Err(MulticallError::Cancelled)));

        let next = executor.submit(echo(3));
        assert_eq!(next.index(), 0);
        assert_ne!(next.batch_id(), first.batch_id());
        assert!(executor.flush());
        assert_eq!(next.get_timeout(WAIT).unwrap(), Token::Uint(3.into()));
        assert_eq!(chain.aggregate_sizes(), vec![1]);
    }

    #[test]
    fn flush_should_dispatch_immediately() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window());

        assert!(!executor.flush());
        let future = executor.submit(echo(5));
        assert!(executor.flush());

        assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(5.into()));
    }

    #[test]
    fn get_timeout_should_expire_on_pending_batch() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window());

        let future = executor.submit(echo(5));

        assert!(matches!(
            future.get_timeout(Duration::from_millis(30)),
            Err(MulticallError::Timeout(_))
        ));
        executor.flush();
        assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(5.into()));
    }

    #[test]
    fn empty_pool_should_fail_the_batch() {
        init_logger();
        let pool = Arc::new(EndpointPool::<Arc<FakeChain>>::new(vec![]));
        let executor =
            MulticallExecutor::new(pool, ExecutorConfig::default().with_max_batch_size(1))
                .unwrap();

        let future = executor.submit(echo(1));

        assert!(matches!(
            future.get_timeout(WAIT),
            Err(MulticallError::NoEndpointAvailable)
        ));
    }

    #[test]
    fn results_should_keep_submission_order_across_batches() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window().with_max_batch_size(20));

        let futures = (0..45).map(|i| executor.submit(echo(i))).collect::<Vec<_>>();
        executor.flush();

        for (i, future) in futures.iter().enumerate() {
            assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(i.into()));
            assert_eq!(future.index(), i % 20);
        }

        let mut sizes = chain.aggregate_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 20, 20]);

        let batches = futures.iter().map(CallFuture::batch_id).collect::<HashSet<_>>();
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn batches_should_spread_over_rate_limited_endpoints() {
        init_logger();
        let chain = Arc::new(echo_chain());
        let interval = Duration::from_millis(200);
        let pool = EndpointPool::new(vec![
            Endpoint::new(chain.clone(), interval),
            Endpoint::new(chain.clone(), interval),
        ]);
        let executor = MulticallExecutor::new(
            Arc::new(pool),
            ExecutorConfig::default().with_max_batch_size(1),
        )
        .unwrap();

        let start = Instant::now();
        let futures = (0..3).map(|i| executor.submit(echo(i))).collect::<Vec<_>>();
        for (i, future) in futures.iter().enumerate() {
            assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(i.into()));
        }

        // two endpoints serve the first two batches, the third waits for a window
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(chain.aggregate_sizes(), vec![1, 1, 1]);
    }

    #[test]
    fn drop_should_dispatch_the_pending_batch() {
        let chain = Arc::new(echo_chain());
        let executor = executor(&chain, slow_window());

        let future = executor.submit(echo(11));
        drop(executor);

        assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(11.into()));
    }

    #[test]
    fn submissions_after_shutdown_should_still_be_dispatched() {
        let chain = Arc::new(echo_chain());
        let mut executor = executor(&chain, ExecutorConfig::default());

        executor.shutdown();
        let future = executor.submit(echo(3));

        assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(3.into()));
        assert_eq!(executor.pending_len(), 0);
        executor.shutdown();
    }

    #[test]
    fn unbounded_window_should_batch_by_size_only() {
        let chain = Arc::new(echo_chain());
        let executor = executor(
            &chain,
            ExecutorConfig::default()
                .with_max_batch_window(Duration::MAX)
                .with_max_batch_size(2),
        );

        let first = executor.submit(echo(1));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!first.is_ready());
        assert_eq!(executor.pending_len(), 1);

        let second = executor.submit(echo(2));
        assert_eq!(first.get_timeout(Duration::MAX).unwrap(), Token::Uint(1.into()));
        assert_eq!(second.get_timeout(WAIT).unwrap(), Token::Uint(2.into()));
        assert_eq!(chain.aggregate_sizes(), vec![2]);
    }

    #[test]
    fn slow_batch_should_not_hold_back_the_next_one() {
        init_logger();
        let latency = Duration::from_millis(300);
        let chain = Arc::new(echo_chain().with_latency(latency));
        let interval = Duration::from_secs(60);
        let pool = Arc::new(EndpointPool::new(vec![
            Endpoint::new(chain.clone(), interval),
            Endpoint::new(chain.clone(), interval),
        ]));
        let executor =
            MulticallExecutor::new(pool.clone(), slow_window().with_max_batch_size(2)).unwrap();

        let first = (0..2).map(|i| executor.submit(echo(i))).collect::<Vec<_>>();
        let second = (2..4).map(|i| executor.submit(echo(i))).collect::<Vec<_>>();

        // the second batch is formed and handed over while the first is in flight
        assert_eq!(executor.pending_len(), 0);
        assert!(!first[0].is_ready());
        assert_ne!(first[0].batch_id(), second[0].batch_id());

        for (i, future) in first.iter().chain(&second).enumerate() {
            assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(i.into()));
        }
        assert_eq!(chain.peak_concurrency(), 2);
        // each batch went through its own endpoint
        assert!(pool.acquire(false).unwrap().is_none());
    }

    #[test]
    fn concurrent_submitters_should_all_be_served() {
        let chain = Arc::new(echo_chain());
        let executor = Arc::new(executor(&chain, ExecutorConfig::default()));

        let handles = (0..4u64)
            .map(|thread| {
                let executor = executor.clone();
                std::thread::spawn(move || {
                    (0..25u64)
                        .map(|i| {
                            let value = thread * 100 + i;
                            (value, executor.submit(echo(value)))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            for (value, future) in handle.join().unwrap() {
                assert_eq!(future.get_timeout(WAIT).unwrap(), Token::Uint(value.into()));
            }
        }
        assert_eq!(chain.aggregate_sizes().iter().sum::<usize>(), 100);
        assert!(chain.aggregate_sizes().iter().all(|size| *size <= 20));
    }

    #[test]
    fn invalid_config_should_be_rejected() {
        let chain = Arc::new(echo_chain());
        let pool = Arc::new(EndpointPool::new(vec![Endpoint::new(chain, Duration::ZERO)]));

        assert!(matches!(
            MulticallExecutor::new(pool, ExecutorConfig::default().with_max_batch_size(0)),
            Err(MulticallError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_envelope_should_fail_the_whole_batch() {
        let chain = Arc::new(FakeChain::new().with_raw_response(vec![0xde, 0xad]));
        let executor = executor(&chain, slow_window().with_max_batch_size(2));

        let first = executor.submit(echo(1));
        let second = executor.submit(echo(2));

        assert!(matches!(first.get(), Err(MulticallError::MalformedResponse(_))));
        assert!(matches!(second.get(), Err(MulticallError::MalformedResponse(_))));
    }
}
