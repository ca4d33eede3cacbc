//! Host loop: the cooperative driver of a [`Graph`].
//!
//! Each cycle:
//! 1. Drain commands from the bridge.
//! 2. Tick every node once (`Graph::tick_all`).
//! 3. Forward error reports and job completions as [`HostMessage`]s.
//! 4. Every 500ms while jobs run, send a progress update.
//!
//! `run` repeats cycles at `tick_rate_hz` until shutdown. `run_until_idle`
//! drives cycles back to back until no job is running, which is what headless
//! callers and tests use.

use crate::config::{HostSettings, ProjectFile};
use crate::error::Result;
use crate::pipeline::bridge::{GraphCommand, HostMessage, TopologySnapshot};
use crate::pipeline::events::GraphEvent;
use crate::pipeline::graph::Graph;
use crate::pipeline::node::NodeRef;
use crate::pipeline::snapshot::RestoreReport;
use crossbeam_channel::{Receiver, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub struct HostLoop {
    graph: Graph,
    cmd_rx: Receiver<GraphCommand>,
    msg_tx: Sender<HostMessage>,
    events: Receiver<GraphEvent>,
    running: Arc<AtomicBool>,
    tick_rate_hz: u32,
    cycles: u64,
    last_cycle_time: Option<Instant>,
    last_progress_time: Instant,
}

impl HostLoop {
    pub fn new(
        mut graph: Graph,
        settings: &HostSettings,
        cmd_rx: Receiver<GraphCommand>,
        msg_tx: Sender<HostMessage>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let events = graph.subscribe();
        Self {
            graph,
            cmd_rx,
            msg_tx,
            events,
            running,
            tick_rate_hz: settings.tick_rate_hz,
            cycles: 0,
            last_cycle_time: None,
            last_progress_time: Instant::now(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Cycles run since creation.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Main loop. Returns after a `Shutdown` command or when the shared
    /// running flag is cleared.
    pub fn run(&mut self) {
        info!("Host loop started at {} Hz", self.tick_rate_hz);

        while self.is_running() {
            self.run_cycle();
            self.rate_limit();
        }

        self.send(HostMessage::Shutdown);
        info!("Host loop exiting after {} cycles", self.cycles);
    }

    /// Run cycles until no job is running, the loop is shut down, or
    /// `max_cycles` is reached. Returns the number of cycles run.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> u64 {
        for n in 1..=max_cycles {
            self.run_cycle();
            if !self.is_running() || !self.graph.has_running_jobs() {
                self.send(HostMessage::Progress(self.graph.jobs()));
                return n;
            }
        }
        max_cycles
    }

    /// One pass: commands, a tick of every node, then outgoing messages.
    pub fn run_cycle(&mut self) {
        self.process_commands();
        self.graph.tick_all();
        self.forward_events();

        if self.graph.has_running_jobs() && self.last_progress_time.elapsed() >= PROGRESS_INTERVAL
        {
            self.send(HostMessage::Progress(self.graph.jobs()));
            self.last_progress_time = Instant::now();
        }

        self.cycles += 1;
        self.last_cycle_time = Some(Instant::now());
    }

    fn process_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                GraphCommand::CreateNode { node_type, params } => {
                    let created = match params {
                        Some(params) => self.graph.create_node_with(&node_type, params),
                        None => self.graph.create_node(&node_type),
                    };
                    match created {
                        Ok(node_id) => self.send(HostMessage::NodeCreated { node_id, node_type }),
                        Err(e) => self.graph.report_error(&e, "CreateNode command"),
                    }
                }
                GraphCommand::DeleteNode(id) => {
                    self.graph.delete_node(id);
                }
                GraphCommand::Connect { a, b } => {
                    self.graph.try_connect(a, b);
                }
                GraphCommand::DisconnectAll(port) => self.graph.disconnect_all(port),
                GraphCommand::Configure {
                    node_id,
                    key,
                    value,
                } => {
                    if let Err(e) = self.graph.configure(node_id, &key, &value) {
                        self.graph
                            .report_error(&e, format!("configuring {} on {}", key, node_id));
                    }
                }
                GraphCommand::StartJob(id) => {
                    if let Err(e) = self.graph.start_job(id) {
                        self.graph.report_error(&e, format!("starting job on {}", id));
                    }
                }
                GraphCommand::CancelJob(id) => {
                    if let Err(e) = self.graph.cancel_job(id) {
                        self.graph.report_error(&e, format!("cancelling job on {}", id));
                    }
                }
                GraphCommand::RequestFrame { node_id, index } => {
                    let frame = self.graph.produce_frame(NodeRef::Node(node_id), index);
                    self.send(HostMessage::Frame {
                        node_id,
                        index,
                        frame,
                    });
                }
                GraphCommand::RequestTopology => {
                    self.send(HostMessage::Topology(TopologySnapshot::capture(&self.graph)));
                }
                GraphCommand::SaveProject(path) => match self.save_project(&path) {
                    Ok(()) => self.send(HostMessage::ProjectSaved(path)),
                    Err(e) => self
                        .graph
                        .report_error(&e, format!("saving project {}", path.display())),
                },
                GraphCommand::LoadProject(path) => match self.load_project(&path) {
                    Ok(report) => self.send(HostMessage::ProjectLoaded { path, report }),
                    Err(e) => self
                        .graph
                        .report_error(&e, format!("loading project {}", path.display())),
                },
                GraphCommand::DismissError => {
                    self.graph.dismiss_error();
                }
                GraphCommand::SetTickRate(hz) => {
                    debug!("Tick rate {} -> {} Hz", self.tick_rate_hz, hz);
                    self.tick_rate_hz = hz;
                }
                GraphCommand::Shutdown => {
                    info!("Shutdown requested");
                    self.running.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    /// Save the current graph as a project file named after the path's stem.
    pub fn save_project(&self, path: &Path) -> Result<()> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled Project".to_string());
        ProjectFile::from_snapshot(name, self.graph.save_snapshot()).save(path)?;
        info!("Saved project to {}", path.display());
        Ok(())
    }

    pub fn load_project(&mut self, path: &Path) -> Result<RestoreReport> {
        let project = ProjectFile::load(path)?;
        let report = self.graph.restore_snapshot(&project.graph)?;
        info!("Loaded project '{}' from {}", project.name, path.display());
        Ok(report)
    }

    fn forward_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                GraphEvent::ErrorReported(err) => self.send(HostMessage::Error(err)),
                GraphEvent::JobFinished { node, state } => self.send(HostMessage::JobFinished {
                    node_id: node,
                    state,
                }),
                _ => {}
            }
        }
    }

    /// A full or closed channel drops the message.
    fn send(&self, msg: HostMessage) {
        let _ = self.msg_tx.try_send(msg);
    }

    fn rate_limit(&self) {
        if self.tick_rate_hz == 0 {
            std::thread::sleep(Duration::from_millis(10));
            return;
        }

        let target_interval = Duration::from_nanos(1_000_000_000 / self.tick_rate_hz as u64);

        if let Some(last) = self.last_cycle_time {
            let elapsed = last.elapsed();
            if elapsed < target_interval {
                let remaining = target_interval - elapsed;
                // Spin for sub-millisecond accuracy, sleep for larger waits
                if remaining > Duration::from_millis(2) {
                    std::thread::sleep(remaining - Duration::from_millis(1));
                }
                while last.elapsed() < target_interval {
                    std::hint::spin_loop();
                }
            }
        }
    }
}
