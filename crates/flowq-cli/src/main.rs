//! flowq: runs demo flows against an in-memory store and prints what the
//! engine did.

mod processors;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use flowq_core::domain::{FlowNode, JobOptions, JobState, QueueEvent, QueueKeys};
use flowq_core::impls::InMemoryStore;
use flowq_core::observability::init_tracing;
use flowq_core::sandbox::SandboxRunner;
use flowq_core::typed::Task as _;
use flowq_core::worker::{InlineRunner, JobRunner, WorkerGroup};
use flowq_core::{Queue, QueueConfig};

use crate::processors::{ReportMerge, ReportPart};

#[derive(Parser)]
#[command(name = "flowq", about = "Flow-aware job queue demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a report flow: one merge job waiting on N part jobs
    Run {
        /// Number of part jobs
        #[arg(long, default_value_t = 3)]
        children: u32,
        /// Items summed by each part
        #[arg(long, default_value_t = 4)]
        items: u32,
        /// Worker loops (overrides FLOWQ_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Attempts per job (overrides FLOWQ_MAX_ATTEMPTS)
        #[arg(long)]
        attempts: Option<u32>,
        /// Part executions that fail on purpose before parts start working
        #[arg(long, default_value_t = 0)]
        flaky: u32,
        /// Run processors through the sandbox protocol
        #[arg(long)]
        sandbox: bool,
        /// Keep the queue paused this long before workers may start
        #[arg(long, default_value_t = 0)]
        paused_ms: u64,
    },
    /// Remove the leaf of a three-job chain and show the hard-delete cascade
    Cascade {
        /// Put the top ancestor in another queue namespace
        #[arg(long)]
        cross_namespace: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = QueueConfig::from_env().context("loading FLOWQ_* configuration")?;
    init_tracing(&config.log)?;

    match cli.command {
        Command::Run {
            children,
            items,
            concurrency,
            attempts,
            flaky,
            sandbox,
            paused_ms,
        } => {
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if let Some(attempts) = attempts {
                config.max_attempts = attempts;
            }
            config.validate()?;
            cmd_run(&config, children, items, flaky, sandbox, Duration::from_millis(paused_ms)).await
        }
        Command::Cascade { cross_namespace } => cmd_cascade(&config, cross_namespace).await,
    }
}

async fn cmd_run(
    config: &QueueConfig,
    children: u32,
    items: u32,
    flaky: u32,
    sandbox: bool,
    paused: Duration,
) -> anyhow::Result<()> {
    let queue = Queue::from_config(Arc::new(InMemoryStore::new()), config);
    let opts = JobOptions::default().with_attempts(config.max_attempts);

    let flow = (0..children).fold(
        FlowNode::new(ReportMerge::NAME)
            .data(json!({ "parts": children }))
            .opts(opts.clone()),
        |flow, part| {
            flow.child(
                FlowNode::new(ReportPart::NAME)
                    .data(json!({ "part": part, "items": items }))
                    .opts(opts.clone()),
            )
        },
    );
    if !paused.is_zero() {
        queue.pause().await;
    }
    let tree = queue.add_flow(flow).await?;
    let root = tree.key.id().to_string();
    info!(root = %tree.key, children, "flow added");

    let registry = processors::registry(flaky, Duration::from_millis(20))?;
    let runner: Arc<dyn JobRunner> = if sandbox {
        Arc::new(SandboxRunner::new(registry))
    } else {
        Arc::new(InlineRunner::new(registry))
    };
    let group = WorkerGroup::spawn(config.concurrency, queue.clone(), runner);

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_tx.send_replace(true);
        }
    });

    if !paused.is_zero() {
        tokio::time::sleep(paused).await;
        queue.resume().await;
    }

    let mut cursor: Option<String> = None;
    loop {
        for recorded in queue.events(cursor.as_deref()).await {
            println!("{}", describe(&recorded.id, &recorded.event));
            cursor = Some(recorded.id);
        }
        let state = queue.get_state(&root).await;
        if state.is_finished() {
            break;
        }
        tokio::select! {
            _ = cancel_rx.changed() => {
                warn!("interrupted; waiting for running jobs");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
    group.shutdown_and_join().await;

    let state = queue.get_state(&root).await;
    println!("root {root}: {state}");
    if let Some(job) = queue.get_job(&root).await? {
        if let Some(value) = job.return_value {
            println!("  returnvalue = {value}");
        }
        if let Some(reason) = job.failed_reason {
            println!("  failedReason = {reason}");
        }
    }
    let deps = queue.dependencies(&tree.key).await;
    let mut processed: Vec<_> = deps.processed.into_iter().collect();
    processed.sort_by(|a, b| a.0.cmp(&b.0));
    for (child, value) in processed {
        println!("  {child} -> {value}");
    }
    println!("  pending children: {}", deps.pending.len());
    println!("counts: {:?}", queue.counts().await);
    Ok(())
}

async fn cmd_cascade(config: &QueueConfig, cross_namespace: bool) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let queue = Queue::from_config(Arc::clone(&store), config);
    let upstream = if cross_namespace {
        queue.sibling(QueueKeys::new(&config.prefix, &format!("{}-upstream", config.queue)))
    } else {
        queue.clone()
    };

    let flow = FlowNode::new("grandparent")
        .id("g")
        .child(
            FlowNode::new("parent")
                .id("a")
                .in_queue(queue.keys().clone())
                .child(FlowNode::new("leaf").id("b")),
        );
    upstream.add_flow(flow).await?;

    println!("before:");
    for key in store.keys().await {
        println!("  {key}");
    }

    let removed = queue.remove("b", false).await?;
    println!("removed b: {removed}");

    println!("after:");
    for key in store.keys().await {
        println!("  {key}");
    }
    for q in [&queue, &upstream] {
        for recorded in q.events(None).await {
            println!("{} {}", q.keys(), describe(&recorded.id, &recorded.event));
        }
        if !cross_namespace {
            break;
        }
    }
    let g_state = upstream.get_state("g").await;
    println!("g: {g_state}");
    if cross_namespace && g_state != JobState::Wait {
        warn!(state = %g_state, "grandparent was expected to be promoted");
    }
    Ok(())
}

fn describe(id: &str, event: &QueueEvent) -> String {
    let mut line = format!("{id} {}", event.event);
    if let Some(job_id) = &event.job_id {
        line.push_str(&format!(" job={job_id}"));
    }
    if let Some(prev) = event.prev {
        line.push_str(&format!(" prev={prev}"));
    }
    for (field, value) in &event.extra {
        line.push_str(&format!(" {field}={value}"));
    }
    line
}
