// throttle-sim - Admission Control Simulator
//
// Fires a burst of concurrent requests with random consumers and priorities
// at a Throttler and reports what happened to them:
// - counts per admission result
// - requests cancelled while waiting or working
// - the final throttler stats (full capacity, empty queue)
//
// Limits start from the THROTTLE_* environment variables; flags override them.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use lifo_throttle::metrics::gather_metrics;
use lifo_throttle::{
    AdmissionResult, Priority, PrometheusMetrics, Stats, ThrottleConfig, Throttler,
    ThrottlerBuilder,
};
use prometheus::Registry;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Simulate bursts of traffic against a LIFO throttler
#[derive(Parser, Debug)]
#[command(name = "throttle-sim")]
#[command(version)]
#[command(about = "Simulate bursts of traffic against a LIFO throttler", long_about = None)]
struct Args {
    /// Maximum concurrently executing requests
    #[arg(long)]
    capacity: Option<usize>,

    /// Maximum requests waiting for capacity
    #[arg(long)]
    queue: Option<usize>,

    /// Number of requests to fire
    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Number of distinct consumers
    #[arg(long, default_value_t = 4)]
    consumers: usize,

    /// Time each accepted request holds its slot
    #[arg(long, default_value_t = 20)]
    work_ms: u64,

    /// Share of LOW priority requests
    #[arg(long, default_value_t = 0.2)]
    low_share: f64,

    /// Share of HIGH priority requests
    #[arg(long, default_value_t = 0.2)]
    high_share: f64,

    /// Share of requests given up after a short timeout
    #[arg(long, default_value_t = 0.1)]
    cancel_share: f64,

    /// Share of capacity any single consumer may hold
    #[arg(long)]
    consumer_max_fraction: Option<f64>,

    /// Probability of shedding a request regardless of load
    #[arg(long)]
    reject_probability: Option<f64>,

    /// Print the Prometheus exposition after the summary
    #[arg(long)]
    prometheus: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// One simulated request
#[derive(Debug)]
struct Request {
    consumer: String,
    priority: Priority,
    cancel_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Decided(AdmissionResult),
    Cancelled,
}

#[derive(Debug, Serialize)]
struct ResultCount {
    result: AdmissionResult,
    count: usize,
}

#[derive(Debug, Serialize)]
struct Summary {
    requests: usize,
    results: Vec<ResultCount>,
    cancelled: usize,
    stats: Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    ensure!(args.consumers >= 1, "--consumers must be >= 1");
    ensure!(
        (0.0..=1.0).contains(&args.cancel_share),
        "--cancel-share must be between 0 and 1"
    );
    ensure!(
        args.low_share >= 0.0 && args.high_share >= 0.0 && args.low_share + args.high_share <= 1.0,
        "--low-share and --high-share must be non-negative and sum to at most 1"
    );

    let config = load_config(&args)?;
    info!(
        capacity = config.capacity_limit,
        queue = config.queue_limit,
        requests = args.requests,
        "Starting simulation"
    );

    let registry = Registry::new();
    let mut builder =
        ThrottlerBuilder::from_config(&config).context("Invalid throttle configuration")?;
    if args.prometheus {
        let metrics = PrometheusMetrics::new().context("Failed to create throttle metrics")?;
        metrics
            .register(&registry)
            .context("Failed to register throttle metrics")?;
        builder = builder.metrics(Arc::new(metrics));
    }
    let throttler = Arc::new(builder.build().context("Failed to build throttler")?);

    let work = Duration::from_millis(args.work_ms);
    let outcomes = simulate(&throttler, generate_requests(&args), work).await?;

    let summary = summarize(args.requests, &outcomes, throttler.stats());
    if summary.stats.available_capacity != summary.stats.capacity_limit
        || summary.stats.queue_size != 0
    {
        warn!(stats = ?summary.stats, "Throttler did not return to idle");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );

    if args.prometheus {
        print!("{}", gather_metrics(&registry)?);
    }

    Ok(())
}

/// Environment configuration with command-line overrides applied
fn load_config(args: &Args) -> Result<ThrottleConfig> {
    let mut config =
        ThrottleConfig::from_env().context("Failed to load throttle configuration from env")?;

    if let Some(capacity) = args.capacity {
        config.capacity_limit = capacity;
    }
    if let Some(queue) = args.queue {
        config.queue_limit = queue;
    }
    if let Some(fraction) = args.consumer_max_fraction {
        config.consumer_max_fraction = Some(fraction);
    }
    if let Some(probability) = args.reject_probability {
        config.random_reject_probability = Some(probability);
    }

    config.validate().context("Invalid throttle configuration")?;
    Ok(config)
}

fn generate_requests(args: &Args) -> Vec<Request> {
    let mut rng = rand::rng();
    let max_wait_ms = args.work_ms.max(1);

    (0..args.requests)
        .map(|_| {
            let roll: f64 = rng.random();
            let priority = if roll < args.low_share {
                Priority::Low
            } else if roll < args.low_share + args.high_share {
                Priority::High
            } else {
                Priority::Normal
            };

            let cancel_after = (rng.random::<f64>() < args.cancel_share)
                .then(|| Duration::from_millis(rng.random_range(1..=max_wait_ms)));

            Request {
                consumer: format!("consumer-{}", rng.random_range(0..args.consumers)),
                priority,
                cancel_after,
            }
        })
        .collect()
}

async fn simulate(
    throttler: &Arc<Throttler>,
    requests: Vec<Request>,
    work: Duration,
) -> Result<Vec<Outcome>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| tokio::spawn(run_request(throttler.clone(), request, work)))
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.context("Simulated request task failed")?);
    }
    Ok(outcomes)
}

async fn run_request(throttler: Arc<Throttler>, request: Request, work: Duration) -> Outcome {
    let attempt = throttler.run(
        Some(request.consumer.as_str()),
        Some(request.priority),
        |result| async move {
            if result.is_accepted() {
                tokio::time::sleep(work).await;
            }
            result
        },
    );

    match request.cancel_after {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => Outcome::Decided(result),
            Err(_) => {
                debug!(consumer = %request.consumer, priority = %request.priority, "Request cancelled");
                Outcome::Cancelled
            }
        },
        None => Outcome::Decided(attempt.await),
    }
}

fn summarize(requests: usize, outcomes: &[Outcome], stats: Stats) -> Summary {
    let results = AdmissionResult::ALL
        .into_iter()
        .map(|result| ResultCount {
            result,
            count: outcomes
                .iter()
                .filter(|outcome| matches!(outcome, Outcome::Decided(r) if *r == result))
                .count(),
        })
        .collect();

    let cancelled = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Outcome::Cancelled))
        .count();

    Summary {
        requests,
        results,
        cancelled,
        stats,
    }
}
