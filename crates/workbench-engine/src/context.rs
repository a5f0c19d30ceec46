//! Runtime context shared by handlers and jobs.

use std::sync::Arc;
use std::time::Duration;
use workbench_broker::BrokerExecutor;
use workbench_config::Settings;
use workbench_core::{Broker, Store};
use workbench_monitor::{Event, EventBus};

use crate::freshness::FreshnessOracle;
use crate::ingest::Ingestor;
use crate::news::NewsSource;
use crate::scheduler::Scheduler;
use crate::stl::StlService;

/// Everything a request or job needs, cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn Store>,
    pub broker: BrokerExecutor,
    pub bus: Arc<EventBus>,
    pub news: Arc<dyn NewsSource>,
    pub scheduler: Arc<Scheduler>,
    pub settings: Arc<Settings>,
}

impl Context {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn Broker>,
        news: Arc<dyn NewsSource>,
        settings: Settings,
    ) -> Self {
        let executor = BrokerExecutor::new(
            broker,
            settings.broker.workers,
            Duration::from_secs(settings.broker.init_cooldown_secs),
        );
        Self {
            store,
            broker: executor,
            bus: Arc::new(EventBus::default()),
            news,
            scheduler: Arc::new(Scheduler::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.clone())
    }

    pub fn stl(&self) -> StlService {
        StlService::new(self.clone())
    }

    pub fn freshness(&self) -> FreshnessOracle {
        FreshnessOracle::new(self.store.clone())
    }

    /// Greeting queued to each new websocket session.
    pub fn hello(&self) -> Event {
        Event::Hello {
            symbols: self.settings.symbols.clone(),
        }
    }
}
