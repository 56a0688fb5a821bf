use bug_agents::cli::{self, Cli};
use bug_agents::telemetry::init_tracing;
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli::run(cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            error!("{e:#}");
            println!("{}", cli::error_json(&e));
            std::process::exit(cli::exit_code(&e));
        }
    }
}
