//! Bounded worker pool for blocking broker calls.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use workbench_core::{
    AccountInfo, Bar, Broker, BrokerError, ClosedDeal, MarketOrder, OrderResult, Position, Side,
    Tick, Timeframe,
};

/// Default number of concurrent blocking broker calls.
pub const DEFAULT_WORKERS: usize = 2;

/// Default pause between failed initialization attempts.
pub const DEFAULT_INIT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct GateState {
    ready: bool,
    last_failure: Option<Instant>,
}

/// Lazily initializes the terminal connection, at most once per cooldown
/// window after a failure.
#[derive(Debug)]
pub struct InitGate {
    state: Mutex<GateState>,
    cooldown: Duration,
}

impl InitGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            cooldown,
        }
    }

    /// Initialize the broker unless it is ready or cooling down.
    pub fn ensure_ready(&self, broker: &dyn Broker) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.ready {
            return Ok(());
        }
        if let Some(at) = state.last_failure {
            let elapsed = at.elapsed();
            if elapsed < self.cooldown {
                let wait = self.cooldown - elapsed;
                return Err(BrokerError::Unavailable(format!(
                    "initialization cooling down, retry in {:.1}s",
                    wait.as_secs_f64()
                )));
            }
        }

        match broker.initialize() {
            Ok(()) => {
                state.ready = true;
                state.last_failure = None;
                info!(broker = broker.name(), "Broker initialized");
                Ok(())
            }
            Err(e) => {
                state.last_failure = Some(Instant::now());
                warn!(broker = broker.name(), error = %e, "Broker initialization failed");
                Err(BrokerError::Unavailable(e.to_string()))
            }
        }
    }

    /// Forget the connection so the next call initializes again.
    pub fn mark_lost(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.ready {
            warn!("Broker connection lost");
        }
        state.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().map(|s| s.ready).unwrap_or(false)
    }
}

/// Runs broker calls on the blocking thread pool, bounded by a semaphore.
///
/// Async callers never touch the broker directly.
#[derive(Clone)]
pub struct BrokerExecutor {
    broker: Arc<dyn Broker>,
    permits: Arc<Semaphore>,
    gate: Arc<InitGate>,
}

impl BrokerExecutor {
    pub fn new(broker: Arc<dyn Broker>, workers: usize, init_cooldown: Duration) -> Self {
        Self {
            broker,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            gate: Arc::new(InitGate::new(init_cooldown)),
        }
    }

    pub fn with_defaults(broker: Arc<dyn Broker>) -> Self {
        Self::new(broker, DEFAULT_WORKERS, DEFAULT_INIT_COOLDOWN)
    }

    pub fn broker_name(&self) -> &str {
        self.broker.name()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Run `f` against the broker on a worker thread.
    pub async fn run<T, F>(&self, f: F) -> Result<T, BrokerError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Broker) -> Result<T, BrokerError> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BrokerError::Internal("executor closed".to_string()))?;
        let broker = self.broker.clone();
        let gate = self.gate.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            gate.ensure_ready(broker.as_ref())?;
            let result = f(broker.as_ref());
            if let Err(e) = &result {
                if e.is_unavailable() {
                    gate.mark_lost();
                }
            }
            result
        })
        .await
        .map_err(|e| BrokerError::Internal(format!("broker worker failed: {}", e)))?
    }

    pub async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, BrokerError> {
        let symbol = symbol.to_string();
        self.run(move |b| b.fetch_bars(&symbol, timeframe, count)).await
    }

    pub async fn fetch_bars_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        let symbol = symbol.to_string();
        self.run(move |b| b.fetch_bars_since(&symbol, timeframe, since)).await
    }

    pub async fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        let symbol = symbol.to_string();
        self.run(move |b| b.fetch_bars_range(&symbol, timeframe, start, end)).await
    }

    pub async fn tick(&self, symbol: &str) -> Result<Tick, BrokerError> {
        let symbol = symbol.to_string();
        self.run(move |b| b.tick(&symbol)).await
    }

    pub async fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        self.run(|b| b.account_info()).await
    }

    pub async fn list_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        let symbol = symbol.map(str::to_string);
        self.run(move |b| b.list_positions(symbol.as_deref())).await
    }

    pub async fn place_market(&self, order: MarketOrder) -> Result<OrderResult, BrokerError> {
        self.run(move |b| b.place_market(&order)).await
    }

    pub async fn close_all(&self, symbol: Option<&str>, side: Option<Side>) -> Result<Vec<OrderResult>, BrokerError> {
        let symbol = symbol.map(str::to_string);
        self.run(move |b| match symbol {
            Some(symbol) => b.close_all_for(&symbol, side),
            None => b.close_all(side),
        })
        .await
    }

    pub async fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ClosedDeal>, BrokerError> {
        self.run(move |b| b.closed_deals(from, to)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_gate_cooldown() {
        let sim = SimBroker::new();
        sim.fail_init(1);
        let gate = InitGate::new(Duration::from_millis(80));

        assert!(gate.ensure_ready(&sim).unwrap_err().is_unavailable());
        assert!(gate.ensure_ready(&sim).unwrap_err().is_unavailable());
        assert_eq!(sim.init_calls(), 1);

        std::thread::sleep(Duration::from_millis(120));
        gate.ensure_ready(&sim).unwrap();
        assert_eq!(sim.init_calls(), 2);
        assert!(gate.is_ready());

        gate.ensure_ready(&sim).unwrap();
        assert_eq!(sim.init_calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_resets_gate() {
        let sim = Arc::new(SimBroker::new());
        let exec = BrokerExecutor::new(sim.clone(), 2, Duration::from_millis(10));

        exec.account_info().await.unwrap();
        assert!(exec.is_ready());

        sim.set_unavailable(true);
        assert!(exec.account_info().await.unwrap_err().is_unavailable());
        assert!(!exec.is_ready());

        sim.set_unavailable(false);
        exec.account_info().await.unwrap();
        assert_eq!(sim.init_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let sim = Arc::new(SimBroker::new());
        let exec = BrokerExecutor::new(sim, 2, Duration::from_millis(10));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let exec = exec.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                exec.run(move |_| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
