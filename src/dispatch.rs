//! Work packages and the dispatchers that run them.
//!
//! Every unit of work the pipeline schedules is a [`Job`]. A job owns the pooled objects
//! it needs, so moving it onto the queue moves that ownership to whichever worker runs
//! it, and dropping a job returns everything it held.
//!
//! * `Read` pulls up to a batch of members off a reader's source and fans them out as
//!   `Decompress` jobs. It never blocks: a busy source is left to the worker holding it,
//!   and a stream out of blocks is rescheduled by the pool when a block is returned.
//! * `Decompress` inflates one member, verifies its CRC32 and hands the result to the
//!   reassembly queue, which releases blocks to the reader in order.
//! * `Compress` deflates one chunk for a writer and queues it for writing.
//! * `Write` drains a writer's completed members to its sink in order.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::block::{BlockKey, InputBlock, OutputBlock};
use crate::engine::FlushInfo;
use crate::error::BgzfError;
use crate::pipeline::Context;
use crate::pool::Pooled;
use crate::reader::{Delivery, ReadStream};
use crate::writer::{Chunk, WriteStream};

/// A unit of work for the worker pool.
pub(crate) enum Job {
    Read(Arc<ReadStream>),
    Decompress { stream: Arc<ReadStream>, input: Pooled<InputBlock>, output: Pooled<OutputBlock> },
    Compress { stream: Arc<WriteStream>, chunk: Pooled<Chunk> },
    Write(Arc<WriteStream>),
}

impl Job {
    /// Reads only add work; every other job finishes work and frees resources.
    pub(crate) fn is_routine(&self) -> bool {
        matches!(self, Self::Read(_))
    }
}

/// Run one job to completion on the calling worker.
pub(crate) fn run(context: &Context, job: Job) {
    match job {
        Job::Read(stream) => read_members(context, &stream),
        Job::Decompress { stream, input, output } => decompress_member(context, &stream, input, output),
        Job::Compress { stream, chunk } => compress_chunk(context, stream, chunk),
        Job::Write(stream) => write_members(context, &stream),
    }
}

/// Pull members off the source until the batch is full, the source ends, or the stream
/// runs out of blocks.
fn read_members(context: &Context, stream: &Arc<ReadStream>) {
    stream.read_pending.store(false, Ordering::Release);
    if stream.is_done() {
        return;
    }
    // Whoever holds the source reschedules the stream when it lets go.
    let Some(mut source) = stream.source.try_lock() else {
        return;
    };

    let batch_size = context.config.batch_size;
    let mut batch = Vec::with_capacity(batch_size);
    let mut starved = false;

    while !stream.is_done() {
        // The output block is reserved up front so the lowest outstanding block always
        // has somewhere to decompress to. Only the source holder takes blocks, so both
        // are taken or neither is; a block put straight back would reschedule this read.
        if !stream.has_free_blocks() {
            starved = true;
            break;
        }
        let (Some(mut input), Some(output)) = (stream.inputs.get_if(), stream.outputs.get_if()) else {
            starved = true;
            break;
        };

        let key = BlockKey::new(stream.id, source.next_block_id);
        match source.at_end() {
            Ok(true) => {
                stream.exhausted.store(true, Ordering::Release);
                log::debug!(
                    "Reached end of source for stream {} after {} blocks",
                    stream.id,
                    key.block_id
                );
                deliver(context, stream, key, Delivery::End);
                break;
            }
            Ok(false) => {}
            Err(e) => {
                let failure = fail(context, stream, key, BgzfError::Io(e));
                deliver(context, stream, key, failure);
                break;
            }
        }
        if let Err(e) = input.read_member(&mut source.reader) {
            let failure = fail(context, stream, key, e);
            deliver(context, stream, key, failure);
            break;
        }

        source.next_block_id += 1;
        input.set_key(key);
        if input.uncompressed_size() == 0 && matches!(source.at_end(), Ok(true)) {
            input.set_final(true);
            stream.exhausted.store(true, Ordering::Release);
            log::debug!("Read EOF member of stream {} at block {}", stream.id, key.block_id);
        }
        log::trace!(
            "Read block {} of stream {} ({} bytes)",
            key.block_id,
            stream.id,
            input.payload_size()
        );

        batch.push(Job::Decompress { stream: Arc::clone(stream), input, output });
        if batch.len() >= batch_size {
            break;
        }
    }
    drop(source);

    for job in batch {
        context.submit(job);
    }
    // Blocks returned while the source was held found the read already running; check
    // for them now that it is released. Any returned later schedule the read themselves.
    if !starved || stream.has_free_blocks() {
        stream.schedule_read(context);
    } else {
        log::trace!("Stream {} is waiting for free blocks", stream.id);
    }
}

/// Inflate one member, check it, and pass the result on in order.
fn decompress_member(
    context: &Context,
    stream: &ReadStream,
    input: Pooled<InputBlock>,
    mut output: Pooled<OutputBlock>,
) {
    if stream.is_closed() {
        return;
    }
    let key = input.key();

    let mut engine = context.inflaters.get();
    let result = engine.decompress(&input, &mut output);
    engine.put();

    let result = result.and_then(|()| {
        let computed = output.crc32();
        if computed == input.crc32() {
            Ok(())
        } else {
            Err(BgzfError::CorruptBlock {
                stream_id: key.stream_id,
                block_id: key.block_id,
                expected: input.crc32(),
                computed,
            })
        }
    });
    output.inherit(&input);
    input.put();

    let delivery = match result {
        Ok(()) => Delivery::Block(output),
        Err(e) => {
            output.put();
            fail(context, stream, key, e)
        }
    };
    deliver(context, stream, key, delivery);
}

/// Report a fatal error, stop reading the stream, and build the sentinel that ends it.
fn fail(context: &Context, stream: &ReadStream, key: BlockKey, error: BgzfError) -> Delivery {
    context.diagnostics.report(key, &error);
    stream.exhausted.store(true, Ordering::Release);
    Delivery::Failed(Arc::new(error))
}

/// Buffer a delivery and forward every delivery of the stream that is now in order.
fn deliver(context: &Context, stream: &ReadStream, key: BlockKey, delivery: Delivery) {
    let mut queue = context.reassembly.lock();
    // Readers close under this lock, so nothing lands in a removed lane.
    if stream.is_closed() {
        return;
    }
    queue.enqueue(key, delivery);
    while let Some((_, ready)) = queue.dequeue_if_next_expected(stream.id) {
        // The receiver lives as long as the stream is open.
        let _ = stream.deliveries.send(ready);
    }
}

/// Deflate one chunk and queue the framed members for writing.
fn compress_chunk(context: &Context, stream: Arc<WriteStream>, mut chunk: Pooled<Chunk>) {
    let key = BlockKey::new(stream.id, chunk.block_id);

    let mut engine = context.deflaters.get();
    let result = {
        let chunk = &mut *chunk;
        engine.compress(&chunk.data, &mut chunk.frame)
    };
    engine.put();

    let completed = match result {
        Ok(info) => {
            log::trace!(
                "Compressed block {} of stream {}: {} -> {} bytes in {} member(s)",
                key.block_id,
                key.stream_id,
                info.uncompressed_size(),
                info.compressed_size(),
                info.blocks()
            );
            chunk.info = Some(info);
            Ok(chunk)
        }
        Err(e) => {
            context.diagnostics.report(key, &e);
            Err(Arc::new(e))
        }
    };
    stream.pending.lock().enqueue(key, completed);
    context.submit(Job::Write(stream));
}

/// Write every in-order member of a writer to its sink.
fn write_members(context: &Context, stream: &WriteStream) {
    loop {
        // Another worker already draining this stream will pick up what is ready.
        let Some(mut sink) = stream.sink.try_lock() else {
            return;
        };
        let mut written = 0_u64;
        let mut failure = None;
        loop {
            let Some((key, completed)) = stream.pending.lock().dequeue_if_next_expected(stream.id) else {
                break;
            };
            written += 1;
            if stream.has_failed() || failure.is_some() {
                continue;
            }
            match completed {
                Ok(chunk) => {
                    let Some(sink) = sink.as_mut() else { continue };
                    if let Err(e) = sink.write_all(&chunk.frame) {
                        let error = BgzfError::Io(e);
                        context.diagnostics.report(key, &error);
                        failure = Some(Arc::new(error));
                    } else {
                        log::trace!(
                            "Wrote block {} of stream {} ({} member(s))",
                            key.block_id,
                            key.stream_id,
                            chunk.info.as_ref().map_or(0, FlushInfo::blocks)
                        );
                    }
                }
                Err(error) => failure = Some(error),
            }
        }
        stream.record_written(&mut sink, written, failure);
        drop(sink);

        // A member completed after the drain above but before the sink was released
        // found the sink locked; pick it up here.
        if !stream.pending.lock().has_ready(stream.id) {
            return;
        }
    }
}
