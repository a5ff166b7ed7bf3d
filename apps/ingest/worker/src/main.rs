//! Ingest Worker - Entry Point
//!
//! Background worker that drains the telemetry job queues.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    ingest_worker::run().await
}
