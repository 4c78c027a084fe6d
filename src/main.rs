use clap::Parser;
use idemgate::infrastructure::clock::SystemClock;
use idemgate::infrastructure::in_memory::{InMemoryIdempotencyStore, InMemoryLock};
use idemgate::{ExecuteError, Execution, IdempotencyRequest, IdempotentExecutor, IdempotentPayload};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Contention simulator: fires N concurrent executions of the same identity
/// triple against the in-memory store and reports how often the guarded
/// operation actually ran.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 1)]
    tenant_id: i64,

    #[arg(long, default_value = "ORDER_SUBMIT")]
    biz_type: String,

    #[arg(long, default_value = "demo-key")]
    idem_key: String,

    #[arg(long, default_value = "h1")]
    request_hash: String,

    /// Number of concurrent callers.
    #[arg(long, default_value_t = 4)]
    tasks: usize,

    /// How long the guarded operation holds before completing.
    #[arg(long, default_value_t = 100)]
    hold_ms: u64,

    /// How long non-winning callers wait for the owner to finish.
    #[arg(long, default_value_t = 1000)]
    wait_max_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Receipt {
    order_id: u64,
    public_id: String,
}

impl IdempotentPayload for Receipt {
    fn stable_ref(&self) -> Option<String> {
        Some(self.public_id.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let clock = Arc::new(SystemClock);
    let store = Arc::new(InMemoryIdempotencyStore::new(clock.clone()));
    let lock = Arc::new(InMemoryLock::new(clock));
    let executor = Arc::new(IdempotentExecutor::new(store).with_lock(lock));

    let invocations = Arc::new(AtomicU64::new(0));
    let fresh = Arc::new(AtomicU64::new(0));
    let replayed = Arc::new(AtomicU64::new(0));
    let in_progress = Arc::new(AtomicU64::new(0));

    let request = IdempotencyRequest::new(
        cli.tenant_id,
        cli.biz_type.clone(),
        cli.idem_key.clone(),
        cli.request_hash.clone(),
    )
    .wait_for_completion(Duration::from_millis(cli.wait_max_ms));

    let mut handles = Vec::with_capacity(cli.tasks);
    for _ in 0..cli.tasks {
        let executor = executor.clone();
        let request = request.clone();
        let invocations = invocations.clone();
        let fresh = fresh.clone();
        let replayed = replayed.clone();
        let in_progress = in_progress.clone();
        let hold = Duration::from_millis(cli.hold_ms);

        handles.push(tokio::spawn(async move {
            let op = move || async move {
                tokio::time::sleep(hold).await;
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(Receipt {
                    order_id: 42,
                    public_id: "ord_42".to_string(),
                })
            };
            match executor.execute(&request, op).await {
                Ok(Execution::Fresh(_)) => {
                    fresh.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Execution::Replayed(_)) => {
                    replayed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Execution::InProgress) => {
                    in_progress.fetch_add(1, Ordering::SeqCst);
                }
                Err(ExecuteError::Operation(never)) => match never {},
                Err(ExecuteError::Engine(err)) => {
                    eprintln!("engine error: {err}");
                }
            }
        }));
    }

    for handle in handles {
        handle.await.into_diagnostic()?;
    }

    println!(
        "invocations={} fresh={} replayed={} in_progress={}",
        invocations.load(Ordering::SeqCst),
        fresh.load(Ordering::SeqCst),
        replayed.load(Ordering::SeqCst),
        in_progress.load(Ordering::SeqCst),
    );

    Ok(())
}
