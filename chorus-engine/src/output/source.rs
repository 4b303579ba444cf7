//! Per-output chunk source.
//!
//! Each open output has an `OutputSource` that tracks its position in the
//! shared music pipe, carries its private replay-gain filters, and holds
//! the currently rendered chunk while the worker feeds it to the device in
//! possibly-short writes.
//!
//! Rendering runs with the controller mutex dropped; the generation
//! counter lets the worker detect a cancel/close that happened while it
//! was filtering, so stale data is never installed.

use crate::chunk::MusicChunk;
use crate::config::PlayerConfig;
use crate::filter::{ChunkFilter, ReplayGainFilter};
use crate::pipe::MusicPipe;
use chorus_common::{AudioFormat, ReplayGainMode, Tag};
use std::sync::Arc;

/// Whether the source's filter chain still has data to flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Closed,
    Open,
    /// Drained; playback requires a reopen
    Flushed,
}

struct CurrentChunk {
    seq: u64,
    data: Vec<f32>,
    pos: usize,
}

pub struct OutputSource {
    state: SourceState,
    pipe: Option<Arc<MusicPipe>>,
    consumer_id: usize,
    in_format: Option<AudioFormat>,
    current: Option<CurrentChunk>,
    pending_tag: Option<Arc<Tag>>,
    rg_filter: ReplayGainFilter,
    other_rg_filter: ReplayGainFilter,
    output_filter: Option<Arc<dyn ChunkFilter>>,
    /// Bumped on cancel/close; invalidates rendering done outside the lock
    generation: u64,
}

impl OutputSource {
    pub fn new(consumer_id: usize, config: &PlayerConfig) -> Self {
        Self {
            state: SourceState::Closed,
            pipe: None,
            consumer_id,
            in_format: None,
            current: None,
            pending_tag: None,
            rg_filter: ReplayGainFilter::new(config),
            other_rg_filter: ReplayGainFilter::new(config),
            output_filter: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SourceState::Open
    }

    pub fn set_output_filter(&mut self, filter: Option<Arc<dyn ChunkFilter>>) {
        self.output_filter = filter;
    }

    pub fn set_replay_gain_mode(&mut self, mode: ReplayGainMode) {
        self.rg_filter.set_mode(mode);
        self.other_rg_filter.set_mode(mode);
    }

    /// Attach to the pipe and start consuming at its tail.
    pub fn open(&mut self, format: AudioFormat, pipe: Arc<MusicPipe>) -> AudioFormat {
        debug_assert!(self.state != SourceState::Open);

        pipe.register_consumer(self.consumer_id);
        self.pipe = Some(pipe);
        self.in_format = Some(format);
        self.state = SourceState::Open;
        self.current = None;
        self.pending_tag = None;
        self.generation += 1;

        // the filter chain does not change the format
        format
    }

    pub fn close(&mut self) {
        if self.state == SourceState::Closed {
            return;
        }

        if let Some(pipe) = self.pipe.take() {
            pipe.unregister_consumer(self.consumer_id);
        }
        self.state = SourceState::Closed;
        self.in_format = None;
        self.current = None;
        self.pending_tag = None;
        self.generation += 1;
    }

    /// Discard in-flight data. The pipe position is not advanced: an
    /// unconsumed chunk will be rendered again on resume.
    pub fn cancel(&mut self) {
        self.current = None;
        self.pending_tag = None;
        self.generation += 1;
    }

    /// Mark the source flushed after a drain and return any remaining
    /// rendered samples to play out.
    pub fn flush(&mut self) -> Vec<f32> {
        self.state = SourceState::Flushed;
        match self.current.take() {
            Some(current) => current.data[current.pos..].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Next pipe chunk to render, when no rendered data is pending.
    pub fn next_chunk(&self) -> Option<Arc<MusicChunk>> {
        if self.current.is_some() {
            return None;
        }
        self.pipe.as_ref()?.peek(self.consumer_id)
    }

    /// True when rendered data is waiting to be played.
    pub fn has_pending_data(&self) -> bool {
        self.current.is_some()
    }

    /// Snapshot of the replay-gain filters for out-of-lock rendering.
    pub fn filter_snapshots(&self) -> (ReplayGainFilter, ReplayGainFilter) {
        (self.rg_filter.clone(), self.other_rg_filter.clone())
    }

    pub fn output_filter(&self) -> Option<Arc<dyn ChunkFilter>> {
        self.output_filter.clone()
    }

    /// Install a rendered chunk and write back the filter state.
    ///
    /// The mode is preserved from the live filters: a client may have
    /// changed the replay-gain mode while rendering ran outside the lock,
    /// and that change must not be clobbered by the stale snapshot.
    pub fn install(
        &mut self,
        chunk: &MusicChunk,
        data: Vec<f32>,
        mut rg: ReplayGainFilter,
        mut other_rg: ReplayGainFilter,
    ) {
        debug_assert!(self.current.is_none());
        rg.set_mode(self.rg_filter.mode());
        other_rg.set_mode(self.other_rg_filter.mode());
        self.rg_filter = rg;
        self.other_rg_filter = other_rg;
        if let Some(tag) = &chunk.tag {
            self.pending_tag = Some(Arc::clone(tag));
        }
        self.current = Some(CurrentChunk {
            seq: chunk.seq,
            data,
            pos: 0,
        });
    }

    /// Remaining samples of the current rendered chunk.
    pub fn peek_data(&self) -> &[f32] {
        match &self.current {
            Some(current) => &current.data[current.pos..],
            None => &[],
        }
    }

    /// Advance past `n` played samples; consumes the pipe chunk when it is
    /// fully played.
    pub fn consume_data(&mut self, n: usize) {
        let finished = {
            let current = self.current.as_mut().expect("no current chunk");
            current.pos += n;
            debug_assert!(current.pos <= current.data.len());
            current.pos >= current.data.len()
        };

        if finished {
            let current = self.current.take().unwrap();
            if let Some(pipe) = &self.pipe {
                pipe.consume(self.consumer_id, current.seq);
            }
        }
    }

    /// Take the tag that should be forwarded to the device, if any.
    pub fn read_tag(&mut self) -> Option<Arc<Tag>> {
        self.pending_tag.take()
    }

    /// Whether this output is done with the chunk (consumed, or not
    /// attached at all).
    pub fn is_chunk_consumed(&self, seq: u64) -> bool {
        match &self.pipe {
            Some(pipe) if self.state == SourceState::Open => {
                pipe.is_consumed(self.consumer_id, seq)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::render_chunk;

    fn fmt() -> AudioFormat {
        AudioFormat::new(44100, 2)
    }

    fn open_source(pipe: &Arc<MusicPipe>) -> OutputSource {
        let mut source = OutputSource::new(0, &PlayerConfig::default());
        source.open(fmt(), Arc::clone(pipe));
        source
    }

    fn render_into(source: &mut OutputSource, chunk: &Arc<MusicChunk>) {
        let (mut rg, mut other_rg) = source.filter_snapshots();
        let data = render_chunk(chunk, &mut rg, &mut other_rg, None).unwrap();
        source.install(chunk, data, rg, other_rg);
    }

    #[test]
    fn test_short_write_accounting() {
        let pipe = Arc::new(MusicPipe::new(8));
        let mut source = open_source(&pipe);

        pipe.push(MusicChunk::new(fmt(), vec![0.25; 8])).unwrap();
        let chunk = source.next_chunk().unwrap();
        render_into(&mut source, &chunk);

        assert_eq!(source.peek_data().len(), 8);
        source.consume_data(3);
        assert_eq!(source.peek_data().len(), 5);
        // pipe chunk not consumed until all samples are played
        assert_eq!(pipe.len(), 1);

        source.consume_data(5);
        assert!(!source.has_pending_data());
        assert_eq!(pipe.len(), 0);
    }

    #[test]
    fn test_cancel_does_not_advance_pipe() {
        let pipe = Arc::new(MusicPipe::new(8));
        let mut source = open_source(&pipe);

        pipe.push(MusicChunk::new(fmt(), vec![0.25; 8])).unwrap();
        let chunk = source.next_chunk().unwrap();
        let seq = chunk.seq;
        render_into(&mut source, &chunk);
        source.consume_data(4);

        let generation = source.generation();
        source.cancel();
        assert!(source.generation() > generation);
        assert!(!source.has_pending_data());

        // the partially played chunk is still in the pipe and re-peekable
        assert_eq!(pipe.len(), 1);
        assert_eq!(source.next_chunk().unwrap().seq, seq);
    }

    #[test]
    fn test_tag_forwarding() {
        let pipe = Arc::new(MusicPipe::new(8));
        let mut source = open_source(&pipe);

        let mut chunk = MusicChunk::new(fmt(), vec![0.0; 4]);
        chunk.tag = Some(Arc::new(Tag::builder().title("T").build()));
        pipe.push(chunk).unwrap();

        let chunk = source.next_chunk().unwrap();
        render_into(&mut source, &chunk);

        let tag = source.read_tag().expect("tag pending");
        assert_eq!(tag.title.as_deref(), Some("T"));
        assert!(source.read_tag().is_none());
    }

    #[test]
    fn test_close_unregisters() {
        let pipe = Arc::new(MusicPipe::new(8));
        let mut source = open_source(&pipe);
        pipe.push(MusicChunk::new(fmt(), vec![0.0; 4])).unwrap();

        // closing releases the chunk for everyone else
        source.close();
        assert_eq!(pipe.len(), 0);
        assert_eq!(source.state(), SourceState::Closed);
    }
}
