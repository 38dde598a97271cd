//! Collector entry point.

use metrix_lib::cli::{self, ServerCli};
use metrix_lib::core::Result;
use metrix_lib::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServerCli::parse_args();
    cli::init_logging(cli.debug)?;

    let config = cli.load_config()?;
    let server = Server::bind(&config).await?;

    server.run(cli::shutdown_token()).await
}
