//! taskpool binary.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = taskpool::cli::parse_cli();
    taskpool::cli::init_logging(&cli.log_level)?;
    taskpool::cli::run_with_cli(cli).await
}
