use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rust_decimal::Decimal;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use sales_fulfillment::collaborators::{
    InMemoryFiscalDocuments, InMemoryQuotations, InMemorySales, QuotationSnapshot, RecordingStockRecorder,
};
use sales_fulfillment::domain::order::{
    Collaborators, DeliveryMode, ItemInput, OrderEvent, SeparationEntry,
};
use sales_fulfillment::event_sourcing::{EventStore, InMemoryEventStore, ScyllaEventStore};
use sales_fulfillment::metrics::{self, Metrics};
use sales_fulfillment::{FailureReport, FulfillmentConfig, FulfillmentOrchestrator, OrderSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sales_fulfillment=debug"))
        )
        .init();

    let config = FulfillmentConfig::from_env()?;
    tracing::info!(
        timeout_ms = config.collaborator_timeout.as_millis() as u64,
        min_cancel_reason_len = config.min_cancel_reason_len,
        block_on_stock_failure = config.block_on_stock_failure,
        "Starting sales fulfillment engine"
    );

    // === 1. Event store: ScyllaDB when configured, in-memory otherwise ===
    let store: Arc<dyn EventStore<OrderEvent>> = match &config.scylla_uri {
        Some(uri) => {
            tracing::info!(uri = %uri, keyspace = %config.scylla_keyspace, "Connecting to ScyllaDB...");
            let session: Session = SessionBuilder::new()
                .known_node(uri)
                .build()
                .await
                .with_context(|| format!("Failed to connect to ScyllaDB at {}", uri))?;

            session
                .query_unpaged(
                    format!(
                        "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                         {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                        config.scylla_keyspace
                    ),
                    &[],
                )
                .await?;
            session.use_keyspace(&config.scylla_keyspace, false).await?;

            let store = ScyllaEventStore::<OrderEvent>::new(Arc::new(session), "SalesOrder", "sales-order-events");
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            tracing::info!("SCYLLA_URI not set, using the in-memory event store");
            Arc::new(InMemoryEventStore::<OrderEvent>::new())
        }
    };

    // === 2. Initialize Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new()
            .block_on(metrics::start_metrics_server(metrics_registry, metrics_port));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 3. Collaborators (in-memory stand-ins) ===
    let quotations = Arc::new(InMemoryQuotations::new());
    let collaborators = Collaborators {
        quotations: quotations.clone(),
        stock: Arc::new(RecordingStockRecorder::new()),
        sales: Arc::new(InMemorySales::new()),
        fiscal: Arc::new(InMemoryFiscalDocuments::new()),
    };

    let orchestrator = FulfillmentOrchestrator::new(store, collaborators, config, metrics);

    // === 4. Demonstrate a pickup order from quotation to invoice ===
    let quotation_id = Uuid::new_v4();
    quotations
        .insert(
            quotation_id,
            QuotationSnapshot {
                customer_id: Uuid::new_v4(),
                items: vec![
                    ItemInput {
                        product_id: Uuid::new_v4(),
                        quantity: Decimal::new(10, 0),
                        unit_price: Decimal::new(3890, 2),
                        discount: Decimal::ZERO,
                        note: Some("cimento CP II 50kg".to_string()),
                    },
                    ItemInput {
                        product_id: Uuid::new_v4(),
                        quantity: Decimal::new(25, 1),
                        unit_price: Decimal::new(12000, 2),
                        discount: Decimal::new(1500, 2),
                        note: Some("areia média, m³".to_string()),
                    },
                ],
                notes: Some("retirada no balcão".to_string()),
            },
        )
        .await;

    let order = orchestrator
        .create_order(OrderSource::Quotation {
            quotation_id,
            salesperson_id: Uuid::new_v4(),
            order_date: Utc::now().date_naive(),
            expected_delivery_date: None,
            delivery_mode: DeliveryMode::Pickup,
            delivery_address: None,
        })
        .await?;
    tracing::info!(order_id = %order.id, total = %order.total, "Order created");

    orchestrator.confirm(order.id).await?;
    orchestrator.start_separation(order.id).await?;

    let entries: Vec<SeparationEntry> = order
        .items
        .iter()
        .map(|item| SeparationEntry {
            item_id: item.item_id,
            separated_quantity: item.quantity,
        })
        .collect();
    orchestrator.record_separation(order.id, entries).await?;

    let receipt = orchestrator.invoice(order.id, true).await?;
    tracing::info!(
        order_id = %receipt.order.id,
        sale_id = %receipt.sale_id,
        document_id = ?receipt.document_id,
        "Order invoiced"
    );

    // A second invoice is rejected; show what a caller would receive.
    if let Err(err) = orchestrator.invoice(order.id, true).await {
        let report = FailureReport::from(&err);
        tracing::info!(report = %serde_json::to_string(&report)?, "Second invoice rejected");
    }

    for envelope in orchestrator.history(order.id).await? {
        tracing::debug!(
            sequence = envelope.sequence_number,
            event_type = %envelope.event_type,
            correlation_id = %envelope.correlation_id,
            "History"
        );
    }

    tracing::info!("Demo finished; metrics remain available until Ctrl+C");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
