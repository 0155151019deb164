use clap::Parser;
use secure_task_engine::{run, Args};
use task_exec::TaskStatus;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the snapshot
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let snapshot = run(&args).await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.status != TaskStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
