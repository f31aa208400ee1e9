use anyhow::{Context, Result};
use clap::Parser;

use sheetkernel_mcp::config::{CliArgs, ServerConfig};
use sheetkernel_mcp::server::SheetKernelServer;
use sheetkernel_mcp::state::Kernel;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from_args(CliArgs::parse()).context("failed to build server configuration")?;
    let kernel = Kernel::new(config);
    let server = SheetKernelServer::new(kernel.clone());

    let result = server.run_stdio().await;
    kernel.shutdown().await;
    result
}
