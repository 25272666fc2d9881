use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use dv_store::Store;

use crate::engine::{EngineConfig, ExtractionEngine};
use crate::mock::MockSource;
use crate::source::{DataKind, SourceProvider};

type SourceFactory = Box<dyn Fn(DataKind) -> Arc<dyn SourceProvider> + Send + Sync>;

/// One engine per data type, created on first use and reused afterwards, so
/// the engine's own running guard covers every caller.
pub struct JobRegistry {
    store: Store,
    config: EngineConfig,
    factory: SourceFactory,
    engines: Mutex<BTreeMap<DataKind, Arc<ExtractionEngine>>>,
}

impl JobRegistry {
    pub fn new<F>(store: Store, config: EngineConfig, factory: F) -> Self
    where
        F: Fn(DataKind) -> Arc<dyn SourceProvider> + Send + Sync + 'static,
    {
        Self {
            store,
            config,
            factory: Box::new(factory),
            engines: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registry backed by the built-in mock datasets.
    pub fn with_mock_sources(store: Store, config: EngineConfig, source_name: impl Into<String>) -> Self {
        let source_name = source_name.into();
        Self::new(store, config, move |kind| {
            Arc::new(MockSource::new(kind, &source_name)) as Arc<dyn SourceProvider>
        })
    }

    pub fn engine(&self, kind: DataKind) -> Arc<ExtractionEngine> {
        self.engines
            .lock()
            .entry(kind)
            .or_insert_with(|| {
                ExtractionEngine::new((self.factory)(kind), self.store.clone(), self.config)
            })
            .clone()
    }

    /// Engines created so far, by kind.
    pub fn engines(&self) -> Vec<(DataKind, Arc<ExtractionEngine>)> {
        self.engines
            .lock()
            .iter()
            .map(|(kind, engine)| (*kind, engine.clone()))
            .collect()
    }

    pub fn stop_all(&self) {
        for (_, engine) in self.engines() {
            engine.stop();
        }
    }
}
