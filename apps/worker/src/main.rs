//! Relay Worker Service - Entry Point
//!
//! Owns job lifecycle, admission, execution against the inference backend,
//! and chunk buffering in the shared store.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    relay_worker::run().await
}
