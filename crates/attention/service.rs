//! Attention service: context registry, request queues and worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use das_common::{Handle, SharedQueue};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::AttentionError;
use crate::network::{HebbianNetwork, ImportanceType};
use crate::selector::EvenThreadCount;
use crate::spreader::{HandleCount, SpreaderParams, TokenSpreader};
use crate::updater::ExactCountUpdater;
use crate::worker::{AttentionRequest, SelectorFactory, WorkerPool};

/// Context every request with an empty context string binds to.
pub const GLOBAL_CONTEXT: &str = "global";

/// Abstract attention interface consumed by the query engine.
///
/// Contexts partition the hebbian network; an empty context selects the
/// global one.
pub trait AttentionBroker: Send + Sync {
    fn ping(&self) -> Result<(), AttentionError>;

    /// Triggers one spreading cycle on the selected network.
    fn stimulate(&self, context: &str, request: HandleCount) -> Result<(), AttentionError>;

    /// Feeds one correlation event to the selected network.
    fn correlate(&self, context: &str, handles: Vec<Handle>) -> Result<(), AttentionError>;

    /// Per-handle importance in input order; unknown handles map to 0.
    fn get_importance(
        &self,
        context: &str,
        handles: &[Handle],
    ) -> Result<Vec<ImportanceType>, AttentionError>;

    /// Reserved: accepted and acknowledged, no effect on ordering yet.
    fn set_determiners(
        &self,
        context: &str,
        determiners: Vec<Vec<Handle>>,
    ) -> Result<(), AttentionError>;
}

#[derive(Debug, Clone)]
pub struct AttentionConfig {
    pub worker_threads_count: usize,
    pub spreader: SpreaderParams,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            worker_threads_count: 10,
            spreader: SpreaderParams::default(),
        }
    }
}

pub struct AttentionService {
    networks: Mutex<FxHashMap<String, Arc<HebbianNetwork>>>,
    stimulus_requests: Arc<SharedQueue<AttentionRequest>>,
    correlation_requests: Arc<SharedQueue<AttentionRequest>>,
    workers: WorkerPool,
    spreader: TokenSpreader,
    updater: ExactCountUpdater,
    enabled: AtomicBool,
}

impl AttentionService {
    pub fn new(config: AttentionConfig) -> Self {
        let stimulus: Arc<SharedQueue<AttentionRequest>> = Arc::new(SharedQueue::new());
        let correlation: Arc<SharedQueue<AttentionRequest>> = Arc::new(SharedQueue::new());
        let stim = Arc::clone(&stimulus);
        let corr = Arc::clone(&correlation);
        let factory: SelectorFactory = Box::new(move |thread_id| {
            Box::new(EvenThreadCount::new(
                thread_id,
                Arc::clone(&stim),
                Arc::clone(&corr),
            ))
        });
        Self::with_selector(config, stimulus, correlation, factory)
    }

    /// Builds the service with a custom request-selection strategy. The
    /// factory is expected to build selectors over the same two queues
    /// passed here.
    pub fn with_selector(
        config: AttentionConfig,
        stimulus_requests: Arc<SharedQueue<AttentionRequest>>,
        correlation_requests: Arc<SharedQueue<AttentionRequest>>,
        factory: SelectorFactory,
    ) -> Self {
        let mut networks = FxHashMap::default();
        networks.insert(GLOBAL_CONTEXT.to_owned(), Arc::new(HebbianNetwork::new()));
        let workers = WorkerPool::start(
            config.worker_threads_count,
            TokenSpreader::new(config.spreader),
            factory,
        );
        Self {
            networks: Mutex::new(networks),
            stimulus_requests,
            correlation_requests,
            workers,
            spreader: TokenSpreader::new(config.spreader),
            updater: ExactCountUpdater::new(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Selects the network bound to a context, creating it on demand.
    /// The empty context aliases the global one.
    pub fn select_network(&self, context: &str) -> Arc<HebbianNetwork> {
        let key = if context.is_empty() {
            GLOBAL_CONTEXT
        } else {
            context
        };
        let mut networks = self.networks.lock();
        Arc::clone(
            networks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(HebbianNetwork::new())),
        )
    }

    /// Runs a spreading cycle synchronously, bypassing the queues.
    pub fn stimulate_now(
        &self,
        context: &str,
        request: &HandleCount,
    ) -> Result<(), AttentionError> {
        let network = self.select_network(context);
        self.spreader.spread_stimuli(request, &network)
    }

    /// Feeds a correlation event synchronously, bypassing the queues.
    pub fn correlate_now(&self, context: &str, handles: &[Handle]) -> Result<(), AttentionError> {
        let network = self.select_network(context);
        self.updater.correlation(&network, handles)
    }

    /// Blocks until both request queues are drained and every worker is
    /// idle. Requests enqueued afterwards are not covered.
    pub fn wait_idle(&self) {
        while !(self.stimulus_requests.is_empty()
            && self.correlation_requests.is_empty()
            && self.workers.is_idle())
        {
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn graceful_shutdown(&self) {
        info!("shutting down attention service");
        self.enabled.store(false, Ordering::Release);
        self.workers.graceful_stop();
    }

    fn check_enabled(&self) -> Result<(), AttentionError> {
        if self.enabled.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AttentionError::ServiceDisabled)
        }
    }
}

impl AttentionBroker for AttentionService {
    fn ping(&self) -> Result<(), AttentionError> {
        self.check_enabled()
    }

    fn stimulate(&self, context: &str, request: HandleCount) -> Result<(), AttentionError> {
        self.check_enabled()?;
        info!(
            handles = request.len(),
            context, "queueing stimulate request"
        );
        if request.is_empty() {
            debug!("discarding empty stimulate request");
            return Ok(());
        }
        let network = self.select_network(context);
        self.stimulus_requests
            .enqueue(AttentionRequest::Stimulus { network, request });
        Ok(())
    }

    fn correlate(&self, context: &str, handles: Vec<Handle>) -> Result<(), AttentionError> {
        self.check_enabled()?;
        info!(
            handles = handles.len(),
            context, "queueing correlate request"
        );
        if handles.len() < 2 {
            info!("discarding invalid correlation request with too few arguments");
            return Ok(());
        }
        let network = self.select_network(context);
        self.correlation_requests
            .enqueue(AttentionRequest::Correlation { network, handles });
        Ok(())
    }

    fn get_importance(
        &self,
        context: &str,
        handles: &[Handle],
    ) -> Result<Vec<ImportanceType>, AttentionError> {
        self.check_enabled()?;
        let network = self.select_network(context);
        Ok(handles
            .iter()
            .map(|handle| network.get_node_importance(handle))
            .collect())
    }

    fn set_determiners(
        &self,
        context: &str,
        determiners: Vec<Vec<Handle>>,
    ) -> Result<(), AttentionError> {
        self.check_enabled()?;
        let network = self.select_network(context);
        self.updater.determiners(&network, &determiners)
    }
}

impl Drop for AttentionService {
    fn drop(&mut self) {
        if self.enabled.load(Ordering::Acquire) {
            self.graceful_shutdown();
        }
    }
}
