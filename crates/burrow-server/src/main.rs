use clap::Parser;

use burrow_server::cli::{run, ServerArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    run(args).await
}
