//! Cartographer sync daemon - WebSocket fan-out hub.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the configured address until Ctrl+C / SIGTERM
//! cartod
//!
//! # Serve on another port with an explicit config file
//! cartod serve --config ./cartod.toml --port 9090
//!
//! # Show the effective configuration
//! cartod config
//! ```

fn main() -> anyhow::Result<()> {
    cartod::cli::run()
}
