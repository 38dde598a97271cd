//! Agent entry point.

use metrix_lib::agent::Agent;
use metrix_lib::cli::{self, AgentCli};
use metrix_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AgentCli::parse_args();
    cli::init_logging(cli.debug)?;

    let config = cli.load_config()?;
    let agent = Agent::new(&config)?;

    agent.run(cli::shutdown_token()).await
}
