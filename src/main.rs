//! frameflow-rs - headless host
//!
//! Loads a project (or builds a demonstration graph), starts every batch job,
//! ticks the graph until all jobs are finished and logs a summary.
//!
//! ```text
//! frameflow-rs [--config <config.toml>] [--save <project.ffproj>] [project.ffproj]
//! ```

use anyhow::{bail, Context};
use frameflow_rs::{
    config::{app_data_dir, AppConfig, ProjectFile},
    pipeline::{Graph, HostBridge, HostLoop, HostMessage, NodeId, NodeRef},
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upper bound on cycles for one headless run.
const MAX_CYCLES: u64 = 100_000;

#[derive(Debug, Default)]
struct Cli {
    config: Option<PathBuf>,
    save: Option<PathBuf>,
    project: Option<PathBuf>,
}

impl Cli {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut cli = Cli::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    cli.config = Some(args.next().context("--config needs a path")?.into());
                }
                "--save" => {
                    cli.save = Some(args.next().context("--save needs a path")?.into());
                }
                flag if flag.starts_with("--") => bail!("unknown option {}", flag),
                _ if cli.project.is_none() => cli.project = Some(PathBuf::from(arg.as_str())),
                _ => bail!("only one project file may be given"),
            }
        }
        Ok(cli)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse(std::env::args().skip(1))?;

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    // Initialize logging
    let file_writer = if config.logging.log_to_file {
        app_data_dir().map(|dir| {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(
                dir.join("logs"),
                "frameflow.log",
            ))
        })
    } else {
        None
    };
    let (file_writer, _log_guard) = match file_writer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        }))
        .init();

    tracing::info!(
        "Starting frameflow-rs ({} workers, batch size {})",
        config.scheduler.worker_count,
        config.scheduler.batch_size
    );

    let (bridge, cmd_rx, msg_tx) = HostBridge::new();
    let running = Arc::new(AtomicBool::new(true));
    let mut host = HostLoop::new(
        Graph::new(config.scheduler),
        &config.host,
        cmd_rx,
        msg_tx,
        running,
    );

    match &cli.project {
        Some(path) => {
            let report = host
                .load_project(path)
                .with_context(|| format!("loading project {}", path.display()))?;
            tracing::info!(
                "Project has {} nodes and {} links",
                report.nodes,
                report.links
            );
        }
        None => build_demo(host.graph_mut()).context("building demonstration graph")?,
    }

    for (id, _) in host.graph().jobs() {
        host.graph_mut()
            .start_job(id)
            .with_context(|| format!("starting job on {}", id))?;
    }

    let cycles = host.run_until_idle(MAX_CYCLES);
    tracing::info!("Ran {} cycles", cycles);

    let mut errors = 0;
    for msg in bridge.drain() {
        match msg {
            HostMessage::Error(err) => {
                errors += 1;
                tracing::warn!("Reported: {}", err);
            }
            HostMessage::JobFinished { node_id, state } => {
                tracing::debug!("Job on {} finished: {}", node_id, state);
            }
            _ => {}
        }
    }

    log_summary(host.graph_mut());
    if errors > 0 {
        tracing::warn!("{} errors were reported", errors);
    }

    if let Some(path) = &cli.save {
        let path = ProjectFile::with_extension(path);
        host.save_project(&path)
            .with_context(|| format!("saving project {}", path.display()))?;
    }

    tracing::info!("Shutting down...");
    Ok(())
}

/// SyntheticStack → FrameFilter → BakeStack → ParticleFit → Reconstruction
fn build_demo(graph: &mut Graph) -> anyhow::Result<()> {
    let chain = [
        graph.create_node("SyntheticStack")?,
        graph.create_node("FrameFilter")?,
        graph.create_node("BakeStack")?,
        graph.create_node("ParticleFit")?,
        graph.create_node("Reconstruction")?,
    ];
    for pair in chain.windows(2) {
        link(graph, pair[0], pair[1])?;
    }
    Ok(())
}

fn link(graph: &mut Graph, from: NodeId, to: NodeId) -> anyhow::Result<()> {
    let out = graph
        .port_by_name(from, "out")
        .with_context(|| format!("{} has no output", from))?;
    let input = graph
        .port_by_name(to, "in")
        .with_context(|| format!("{} has no input", to))?;
    graph.connect(out, input)?;
    Ok(())
}

fn log_summary(graph: &mut Graph) {
    for id in graph.node_ids() {
        let type_name = graph.node_type(id).unwrap_or_default().to_string();
        match graph.job_progress(id) {
            Some(progress) => tracing::info!(
                "{} {}: job {} ({}/{})",
                type_name,
                id,
                progress.state,
                progress.done,
                progress.total
            ),
            None => tracing::info!("{} {}", type_name, id),
        }

        if let Some(particles) = graph.produce_particles(NodeRef::Node(id)) {
            tracing::info!(
                "  {} particles over {} frames",
                particles.len(),
                particles.frame_count
            );
        }
        let count = graph
            .frame_count(NodeRef::Node(id))
            .or_else(|| graph.frame_count(graph.find_upstream_source(id)));
        if let Some(count) = count {
            if let Some(frame) = graph.produce_frame(NodeRef::Node(id), count.saturating_sub(1)) {
                if let Some((min, max)) = frame.stats().range() {
                    tracing::info!(
                        "  last frame {}x{}, range {:.1}..{:.1}",
                        frame.width,
                        frame.height,
                        min,
                        max
                    );
                }
            }
        }
    }
}
