//! Test harness helpers.

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;

use strata_storage::{
    DocumentBackend, HostCapabilities, MemorySyncStorage, SharedSink, SizeBudget, Strata,
};

static LOGGING: Once = Once::new();

/// Route `tracing` output through the test writer.
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Build a [`Strata`] over in-memory synchronous stores and `backend`.
///
/// Every capability is reported available.
#[must_use]
pub fn test_strata(
    budget: SizeBudget,
    backend: Arc<dyn DocumentBackend>,
    sink: SharedSink,
) -> Strata {
    Strata::builder()
        .budget(budget)
        .capabilities(HostCapabilities::default())
        .sync_storage(Arc::new(MemorySyncStorage::new()))
        .fallback_storage(Arc::new(MemorySyncStorage::new()))
        .document_backend(backend)
        .sink(sink)
        .build()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mocks::{FlakyDocumentBackend, RecordingSink};

    #[tokio::test]
    async fn test_harness_strata_uses_document_tier() {
        init_test_logging();
        let sink = RecordingSink::new();
        let strata = test_strata(
            SizeBudget::default(),
            Arc::new(FlakyDocumentBackend::new()),
            sink.shared(),
        );

        assert!(strata.has_document_store());
        strata.set_db_data("globalData", "k", json!("v")).await;
        assert_eq!(strata.get_db_data("globalData", "k").await, Some(json!("v")));
        assert_eq!(sink.count("connection_opened"), 1);
    }
}
