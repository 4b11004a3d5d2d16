use clap::Parser;
use tokio_util::sync::CancellationToken;

use cluster_admission::scheduler::Scheduler;
use cluster_admission::{bootstrap, logger};

/// Cluster-level job queueing and admission engine.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the cluster-state JSON file (flavors, queues, workloads).
    cluster_state: String,

    /// Run a single scheduling pass and exit.
    #[arg(long)]
    once: bool,

    /// Idle time between scheduling passes, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pass_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let args = Args::parse();
    log::info!("Logger initialized. Loading cluster state from '{}'...", args.cluster_state);

    let ctx = bootstrap(&args.cluster_state).await?;
    let scheduler = Scheduler::new(ctx).with_pass_interval(std::time::Duration::from_millis(args.pass_interval_ms));

    if args.once {
        let summary = scheduler.schedule_once().await?;
        log::info!(
            "Pass finished: {} admitted, {} preempted ({} evictions issued), {} inadmissible, {} requeued.",
            summary.admitted,
            summary.preempted,
            summary.evictions_issued,
            summary.inadmissible,
            summary.requeued
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested, finishing the current pass.");
            signal_cancel.cancel();
        }
    });

    scheduler.run(cancel).await;
    Ok(())
}
