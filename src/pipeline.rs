//! Configuration and the shared worker pool.
//!
//! A [`Pipeline`] owns a fixed set of worker threads, the shared decompression and
//! compression engine pools, and the work queue. Any number of [`BgzfReader`]s and
//! [`BgzfWriter`]s can be opened on one pipeline; they borrow it, so the pipeline always
//! outlives the streams that use it.
//!
//! ```
//! use std::io::{Read, Write};
//! use pooled_bgzf::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::new().threads(2).compression_level(3).build().unwrap();
//!
//! let mut writer = pipeline.writer(Vec::new());
//! writer.write_all(b"hello bgzf").unwrap();
//! let compressed = writer.finish().unwrap();
//!
//! let mut text = String::new();
//! pipeline.reader(std::io::Cursor::new(compressed)).read_to_string(&mut text).unwrap();
//! assert_eq!(text, "hello bgzf");
//! ```

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::Mutex;

use crate::diagnostics::{DiagnosticSink, Diagnostics, LogSink};
use crate::dispatch::{self, Job};
use crate::engine::{CompressionEngine, CompressionLevel, DecompressionEngine};
use crate::error::{BgzfError, Result};
use crate::pool::Pool;
use crate::reader::{BgzfReader, Delivery};
use crate::reorder::ReorderQueue;
use crate::writer::BgzfWriter;

/// Default number of input blocks handed to the decompressors per read attempt.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// How long an idle worker waits for work before re-checking whether it should stop.
const IDLE_TIMEOUT: Duration = Duration::from_millis(50);

/// Validated pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Input, output and chunk blocks owned by each stream.
    pub blocks_per_stream: usize,
    /// Decompression engines and compression engines, each.
    pub engines: usize,
    /// Deflate level used by every writer.
    pub compression_level: CompressionLevel,
    /// Maximum members read per read attempt before handing them to decompressors.
    pub batch_size: usize,
}

/// Builder for a [`Pipeline`].
///
/// Unset sizes are derived from the thread count when [`build`](Self::build) is called.
pub struct PipelineBuilder {
    threads: usize,
    blocks_per_stream: Option<usize>,
    engines: Option<usize>,
    compression_level: u8,
    batch_size: usize,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// A builder using one worker per CPU and compression level 5.
    #[must_use]
    pub fn new() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            blocks_per_stream: None,
            engines: None,
            compression_level: CompressionLevel::default().get(),
            batch_size: DEFAULT_BATCH_SIZE,
            diagnostics: Arc::new(LogSink),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set how many blocks each reader or writer may have in flight. Defaults to
    /// four per thread.
    #[must_use]
    pub fn blocks_per_stream(mut self, blocks: usize) -> Self {
        self.blocks_per_stream = Some(blocks);
        self
    }

    /// Set the number of engines of each kind. Defaults to one per thread.
    #[must_use]
    pub fn engines(mut self, engines: usize) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Set the deflate level, 0 (store) through 9 (best).
    #[must_use]
    pub fn compression_level(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    /// Set how many members one read attempt may pull from a source.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Send fatal block errors to `sink` instead of the log.
    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Validate the settings without starting any threads.
    ///
    /// # Errors
    ///
    /// Returns [`BgzfError::InvalidConfig`] for a zero size and
    /// [`BgzfError::InvalidCompressionLevel`] for a level above 9.
    pub fn config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            threads: self.threads,
            blocks_per_stream: self.blocks_per_stream.unwrap_or(4 * self.threads),
            engines: self.engines.unwrap_or(self.threads),
            compression_level: CompressionLevel::new(self.compression_level)?,
            batch_size: self.batch_size,
        };
        for (parameter, value) in [
            ("threads", config.threads),
            ("blocks_per_stream", config.blocks_per_stream),
            ("engines", config.engines),
            ("batch_size", config.batch_size),
        ] {
            if value == 0 {
                return Err(BgzfError::InvalidConfig {
                    parameter,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(config)
    }

    /// Allocate the engine pools and start the worker threads.
    ///
    /// # Errors
    ///
    /// Returns a configuration error from [`config`](Self::config), or an I/O error if a
    /// worker thread cannot be spawned.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config()?;
        Pipeline::start(config, Diagnostics::new(self.diagnostics))
    }
}

/// State shared by the pipeline handle, its streams and its workers.
pub(crate) struct Context {
    pub(crate) config: PipelineConfig,
    pub(crate) inflaters: Pool<DecompressionEngine>,
    pub(crate) deflaters: Pool<CompressionEngine>,
    /// Decompressed blocks of every reader, waiting for their turn.
    pub(crate) reassembly: Mutex<ReorderQueue<Delivery>>,
    pub(crate) diagnostics: Diagnostics,
    urgent: Sender<Job>,
    routine: Sender<Job>,
    next_stream_id: AtomicU32,
    stopping: AtomicBool,
}

impl Context {
    /// Queue a work package. Reads are routine; everything else frees resources and is
    /// urgent.
    pub(crate) fn submit(&self, job: Job) {
        let queue = if job.is_routine() { &self.routine } else { &self.urgent };
        // Workers only disconnect after the pipeline handle is gone, and no stream can
        // outlive the handle.
        if queue.send(job).is_err() {
            log::warn!("Work submitted after the pipeline stopped; dropping it");
        }
    }

    pub(crate) fn next_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A running pool of worker threads shared by BGZF readers and writers.
///
/// Dropping the pipeline stops and joins its workers; use [`shutdown`](Self::shutdown)
/// to observe a worker that panicked.
pub struct Pipeline {
    context: Arc<Context>,
    shutdown: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// A builder with default settings.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    fn start(config: PipelineConfig, diagnostics: Diagnostics) -> Result<Self> {
        let deflaters = (0..config.engines)
            .map(|_| CompressionEngine::new(config.compression_level))
            .collect::<Result<Vec<_>>>()?;

        let (urgent, urgent_rx) = flume::unbounded();
        let (routine, routine_rx) = flume::unbounded();
        let (shutdown, shutdown_rx) = flume::unbounded();

        let context = Arc::new(Context {
            config,
            inflaters: Pool::new("inflaters", config.engines, DecompressionEngine::new),
            deflaters: Pool::from_items("deflaters", deflaters),
            reassembly: Mutex::new(ReorderQueue::new()),
            diagnostics,
            urgent,
            routine,
            next_stream_id: AtomicU32::new(0),
            stopping: AtomicBool::new(false),
        });

        let mut pipeline = Self { context, shutdown: Some(shutdown), workers: Vec::new() };
        for index in 0..config.threads {
            let worker = Worker {
                context: Arc::clone(&pipeline.context),
                urgent: urgent_rx.clone(),
                routine: routine_rx.clone(),
                shutdown: shutdown_rx.clone(),
            };
            let handle =
                thread::Builder::new().name(format!("bgzf-worker-{index}")).spawn(move || worker.run())?;
            pipeline.workers.push(handle);
        }

        log::debug!(
            "Started BGZF pipeline: {} threads, {} engines, {} blocks per stream, level {}",
            config.threads,
            config.engines,
            config.blocks_per_stream,
            config.compression_level
        );
        Ok(pipeline)
    }

    /// The validated settings this pipeline runs with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.context.config
    }

    /// Open a decompressing reader over a BGZF byte source.
    pub fn reader<R>(&self, source: R) -> BgzfReader<'_>
    where
        R: Read + Send + 'static,
    {
        BgzfReader::open(Arc::clone(&self.context), Box::new(source), None)
    }

    /// Open a decompressing reader that also copies every decompressed block to `copy`,
    /// in order, as it is consumed.
    pub fn reader_with_copy_through<R, C>(&self, source: R, copy: C) -> BgzfReader<'_>
    where
        R: Read + Send + 'static,
        C: Write + Send + 'static,
    {
        BgzfReader::open(Arc::clone(&self.context), Box::new(source), Some(Box::new(copy)))
    }

    /// Open a compressing writer over `sink`.
    pub fn writer<W>(&self, sink: W) -> BgzfWriter<'_, W>
    where
        W: Write + Send + 'static,
    {
        BgzfWriter::open(Arc::clone(&self.context), sink)
    }

    /// Stop the workers and wait for them to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if any worker thread panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };
        // One message per worker wakes each idle one; the flag catches any that are
        // between waits.
        self.context.stopping.store(true, Ordering::Release);
        for _ in 0..self.workers.len() {
            if shutdown.send(()).is_err() {
                break;
            }
        }
        drop(shutdown);

        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        log::debug!("Stopped BGZF pipeline");
        if panicked > 0 {
            return Err(BgzfError::Io(std::io::Error::other(format!(
                "{panicked} BGZF worker thread(s) panicked"
            ))));
        }
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{e}");
        }
    }
}

/// What woke an idle worker.
enum Wake {
    Job(Job),
    Stop,
    Idle,
}

struct Worker {
    context: Arc<Context>,
    urgent: Receiver<Job>,
    routine: Receiver<Job>,
    shutdown: Receiver<()>,
}

impl Worker {
    fn run(self) {
        while let Some(job) = self.next_job() {
            dispatch::run(&self.context, job);
        }

        // Run what is left so every pooled object in flight is returned.
        while let Ok(job) = self.urgent.try_recv().or_else(|_| self.routine.try_recv()) {
            dispatch::run(&self.context, job);
        }
        log::trace!("BGZF worker {:?} exiting", thread::current().name());
    }

    /// Urgent work first; otherwise wait for any work or for the pipeline to stop.
    fn next_job(&self) -> Option<Job> {
        loop {
            if let Ok(job) = self.urgent.try_recv() {
                return Some(job);
            }
            let wake = flume::Selector::new()
                .recv(&self.urgent, |job| job.map_or(Wake::Stop, Wake::Job))
                .recv(&self.routine, |job| job.map_or(Wake::Stop, Wake::Job))
                .recv(&self.shutdown, |_| Wake::Stop)
                .wait_timeout(IDLE_TIMEOUT)
                .unwrap_or(Wake::Idle);
            match wake {
                Wake::Job(job) => return Some(job),
                Wake::Stop => return None,
                Wake::Idle if self.context.stopping.load(Ordering::Acquire) => return None,
                Wake::Idle => {}
            }
        }
    }
}
