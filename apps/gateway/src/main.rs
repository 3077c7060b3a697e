//! Relay Gateway Service - Entry Point
//!
//! OpenAI-compatible front door for the inference relay.

use core_config::tracing::install_color_eyre;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for readable startup errors.
    install_color_eyre();

    relay_gateway::run().await
}
