//! Export node: writes every frame of its input to a directory.
//!
//! The input is a `Multi` port accepting datasets, images and
//! reconstructions; it takes on the identity of whatever it is linked to.
//! Writing runs on the worker pool a slice per tick. Starting an export
//! removes the previous run's frame files; a failed export leaves whatever it
//! wrote in place. `manifest.json` is written on completion.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::job::{resolve_extent, BatchJob, BatchWork, IndexRange, JobControl};
use crate::pipeline::node::{NodeContext, NodePlugin};
use crate::pipeline::nodes::{decode_params, encode_params, param_str, param_usize};
use crate::pipeline::port::{KindSet, PortDescriptor, PortKind};
use crate::pipeline::value::ConfigValue;
use crate::types::Frame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static PORTS: &[PortDescriptor] = &[PortDescriptor::input("in", PortKind::Multi)
    .accepting(
        KindSet::single(PortKind::Dataset)
            .with(PortKind::Image)
            .with(PortKind::Reconstruction),
    )
    .labelled("Any image")];

/// Magic bytes at the start of a raw frame file.
pub const RAW_MAGIC: &[u8; 4] = b"FFRM";

pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// `FFRM`, then width, height, index as `u32` LE, then `f32` LE pixels.
    #[default]
    Raw,
    /// One text row per image row.
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Raw => "raw",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportParams {
    pub directory: Option<PathBuf>,
    pub format: ExportFormat,
    pub prefix: String,
    pub range: Option<IndexRange>,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            directory: None,
            format: ExportFormat::Raw,
            prefix: "frame".to_string(),
            range: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub index: usize,
    pub file: String,
    pub bytes: u64,
}

/// Written next to the frame files once an export completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub format: ExportFormat,
    pub source_kind: Option<PortKind>,
    pub width: usize,
    pub height: usize,
    pub frames: Vec<ExportedFile>,
    pub created_at: DateTime<Utc>,
}

impl ExportManifest {
    pub fn load(directory: &Path) -> PipelineResult<Self> {
        let content = fs::read_to_string(directory.join(MANIFEST_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}

struct ExportItem {
    index: usize,
    path: PathBuf,
    frame: Frame,
}

#[derive(Default)]
struct ExportWork {
    directory: PathBuf,
    format: ExportFormat,
    prefix: String,
    source_kind: Option<PortKind>,
    geometry: Option<(usize, usize)>,
    written: Vec<ExportedFile>,
}

impl ExportWork {
    fn file_name(&self, index: usize) -> String {
        format!("{}_{:05}.{}", self.prefix, index, self.format.extension())
    }

    /// Remove frame files left by a previous run with the same prefix.
    fn clear_previous(&self) -> PipelineResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_frame = name.starts_with(&format!("{}_", self.prefix))
                && (name.ends_with(".raw") || name.ends_with(".csv"));
            if is_frame || name == MANIFEST_NAME {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl BatchWork for ExportWork {
    type Item = ExportItem;
    type Output = ExportedFile;

    fn gather(&mut self, ctx: &mut NodeContext, index: usize) -> PipelineResult<ExportItem> {
        let frame = ctx
            .pull_frame("in", index)
            .ok_or_else(|| PipelineError::MissingInput(format!("frame {} to export", index)))?;
        if self.geometry.is_none() {
            self.geometry = Some((frame.width, frame.height));
            self.source_kind = ctx.incoming_kind("in");
        }
        Ok(ExportItem {
            index,
            path: self.directory.join(self.file_name(index)),
            frame,
        })
    }

    fn process(&self, item: ExportItem) -> PipelineResult<ExportedFile> {
        let bytes = match self.format {
            ExportFormat::Raw => write_raw(&item.path, &item.frame)?,
            ExportFormat::Csv => write_csv(&item.path, &item.frame)?,
        };
        Ok(ExportedFile {
            index: item.index,
            file: self.file_name(item.index),
            bytes,
        })
    }

    fn accept(
        &mut self,
        _ctx: &mut NodeContext,
        _index: usize,
        file: ExportedFile,
    ) -> PipelineResult<()> {
        debug!("Exported {} ({} bytes)", file.file, file.bytes);
        self.written.push(file);
        Ok(())
    }

    fn complete(&mut self, _ctx: &mut NodeContext) -> PipelineResult<()> {
        self.written.sort_by_key(|f| f.index);
        let manifest = ExportManifest {
            format: self.format,
            source_kind: self.source_kind,
            width: self.geometry.map_or(0, |g| g.0),
            height: self.geometry.map_or(0, |g| g.1),
            frames: std::mem::take(&mut self.written),
            created_at: Utc::now(),
        };
        let file = File::create(self.directory.join(MANIFEST_NAME))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &manifest)?;
        info!(
            "Exported {} frames to {}",
            manifest.frames.len(),
            self.directory.display()
        );
        Ok(())
    }
}

fn write_raw(path: &Path, frame: &Frame) -> PipelineResult<u64> {
    let header = [
        ("width", frame.width),
        ("height", frame.height),
        ("index", frame.index),
    ]
    .map(|(key, v)| {
        u32::try_from(v).map_err(|_| {
            PipelineError::invalid_param(key, format!("{} does not fit the raw header", v))
        })
    });
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(RAW_MAGIC)?;
    for word in header {
        writer.write_all(&word?.to_le_bytes())?;
    }
    for px in &frame.pixels {
        writer.write_all(&px.to_le_bytes())?;
    }
    writer.flush()?;
    Ok((RAW_MAGIC.len() + 12 + frame.pixels.len() * 4) as u64)
}

fn write_csv(path: &Path, frame: &Frame) -> PipelineResult<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut bytes = 0u64;
    for row in frame.rows() {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{}", line)?;
        bytes += line.len() as u64 + 1;
    }
    writer.flush()?;
    Ok(bytes)
}

/// Read back a raw frame file.
pub fn read_raw(path: &Path) -> PipelineResult<Frame> {
    let bytes = fs::read(path)?;
    let corrupt = || PipelineError::MissingInput(format!("corrupt raw frame {}", path.display()));
    if bytes.len() < 16 || &bytes[..4] != RAW_MAGIC {
        return Err(corrupt());
    }
    let word = |at: usize| -> usize {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
    };
    let (width, height, index) = (word(4), word(8), word(12));
    let pixels: Vec<f32> = bytes[16..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Frame::from_pixels(index, width, height, pixels).ok_or_else(corrupt)
}

pub struct ExporterNode {
    params: ExportParams,
    job: BatchJob,
    work: ExportWork,
}

impl ExporterNode {
    pub fn new() -> Self {
        Self {
            params: ExportParams::default(),
            job: BatchJob::parallel(),
            work: ExportWork::default(),
        }
    }

    pub fn params(&self) -> &ExportParams {
        &self.params
    }

    fn control(&mut self, control: JobControl, ctx: &mut NodeContext) -> PipelineResult<()> {
        match control {
            JobControl::Start => {
                if self.job.is_running() {
                    return Err(PipelineError::JobAlreadyRunning);
                }
                let directory = self
                    .params
                    .directory
                    .clone()
                    .ok_or(PipelineError::MissingParameter("directory"))?;
                let extent = resolve_extent(ctx, "in", self.params.range)?;
                fs::create_dir_all(&directory)?;
                self.work = ExportWork {
                    directory,
                    format: self.params.format,
                    prefix: self.params.prefix.clone(),
                    ..ExportWork::default()
                };
                let removed = self.work.clear_previous()?;
                if removed > 0 {
                    debug!("Removed {} files from previous export", removed);
                }
                info!(
                    "Exporting frames {:?} to {}",
                    extent,
                    self.work.directory.display()
                );
                self.job.start(extent)?;
                self.job.complete_if_empty(&mut self.work, ctx);
            }
            JobControl::Cancel => {
                self.job.cancel_with(ctx);
            }
            JobControl::Acknowledge => self.job.acknowledge(),
        }
        Ok(())
    }
}

impl Default for ExporterNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for ExporterNode {
    fn type_name(&self) -> &str {
        "Export"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn on_tick(&mut self, ctx: &mut NodeContext) {
        self.job.tick(&mut self.work, ctx);
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        ctx: &mut NodeContext,
    ) -> PipelineResult<()> {
        if let Some(control) = JobControl::parse(key) {
            return self.control(control, ctx);
        }
        match key {
            "directory" => self.params.directory = Some(PathBuf::from(param_str(key, value)?)),
            "format" => {
                self.params.format = match param_str(key, value)? {
                    "raw" => ExportFormat::Raw,
                    "csv" => ExportFormat::Csv,
                    _ => return Err(PipelineError::invalid_param(key, "expected 'raw' or 'csv'")),
                };
            }
            "prefix" => {
                let prefix = param_str(key, value)?;
                if prefix.is_empty() || prefix.contains(['/', '\\']) {
                    return Err(PipelineError::invalid_param(key, "must be a plain file name"));
                }
                self.params.prefix = prefix.to_string();
            }
            "range_start" | "range_end" => {
                let n = param_usize(key, value)?;
                let mut range = self.params.range.unwrap_or(IndexRange { start: 0, end: 0 });
                if key == "range_start" {
                    range.start = n;
                } else {
                    range.end = n;
                }
                self.params.range = Some(range);
            }
            "full_range" => self.params.range = None,
            _ => return Err(PipelineError::invalid_param(key, "unknown parameter")),
        }
        Ok(())
    }

    fn save_params(&self) -> serde_json::Value {
        encode_params(&self.params)
    }

    fn load_params(&mut self, params: serde_json::Value) -> PipelineResult<()> {
        if let Some(params) = decode_params(params)? {
            self.params = params;
        }
        Ok(())
    }

    fn job(&self) -> Option<&BatchJob> {
        Some(&self.job)
    }
}
