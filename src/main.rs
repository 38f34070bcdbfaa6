//! pulseops CLI entry point.

use pulseops_lib::cli::{self, Cli};
use pulseops_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
