//! Decoder seam.
//!
//! Decoder plugin implementations live outside the engine; the traits here
//! are the contract they implement. `DecoderSource` wraps one open decoder
//! instance in its own thread and hands decoded blocks to the player
//! through a small bounded buffer, so a slow decoder never stalls inside
//! the player's mutex.

use crate::error::{Error, Result};
use crate::queue::DetachedSong;
use crate::sync::Wakeup;
use chorus_common::{AudioFormat, ReplayGainInfo, SongTime, Tag};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Blocks buffered between the decoder thread and the player.
const BLOCK_BUFFER: usize = 8;

/// One decoded unit handed from a decoder to the player.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    /// Interleaved f32 PCM in the instance's format
    pub samples: Vec<f32>,

    /// Song position at the end of this block
    pub time: SongTime,

    /// Source bit rate in kbit/s
    pub bit_rate: u32,

    /// New tag that became effective with this block
    pub tag: Option<Tag>,

    /// Replay-gain data of the song, if known
    pub replay_gain: Option<ReplayGainInfo>,
}

/// A decoder implementation: opens songs by URI.
pub trait DecoderPlugin: Send + Sync {
    /// Open a decoder for `song`, positioned at `start` (relative to the
    /// song's start offset). Seeking is implemented by reopening.
    fn open(&self, song: &DetachedSong, start: SongTime) -> Result<Box<dyn DecoderInstance>>;
}

/// One open decode session.
pub trait DecoderInstance: Send {
    fn format(&self) -> AudioFormat;

    /// Total song duration, when known up front.
    fn duration(&self) -> Option<SongTime>;

    /// Decode the next block. `Ok(None)` signals the end of the song.
    fn decode(&mut self) -> Result<Option<DecodedBlock>>;
}

/// Result of a non-blocking read from the decoder source.
pub enum BlockPoll {
    Block(DecodedBlock),
    /// Decoder still working; the player will be woken when data arrives
    Pending,
    /// End of song, all blocks delivered
    Finished,
    Failed(Error),
}

struct SourceInner {
    blocks: VecDeque<DecodedBlock>,
    finished: bool,
    error: Option<Error>,
    stop: bool,
}

struct SourceShared {
    inner: Mutex<SourceInner>,
    /// Decoder thread waits here while the block buffer is full
    space: Condvar,
    /// Pokes the player thread on progress
    wake: Arc<dyn Wakeup>,
}

/// An active decoder: one thread, one open instance, a bounded handoff
/// buffer.
pub struct DecoderSource {
    shared: Arc<SourceShared>,
    thread: Option<JoinHandle<()>>,
    format: AudioFormat,
    duration: Option<SongTime>,
    start_time: SongTime,
    uri: String,
}

impl DecoderSource {
    /// Open `song` at `start` and begin decoding.
    ///
    /// Open errors surface synchronously; decode errors are reported
    /// through [`DecoderSource::poll`].
    pub fn open(
        plugin: &dyn DecoderPlugin,
        song: &DetachedSong,
        start: SongTime,
        wake: Arc<dyn Wakeup>,
    ) -> Result<DecoderSource> {
        let instance = plugin.open(song, start)?;
        let format = instance.format();
        format.validate().map_err(Error::from)?;
        let duration = instance.duration().or_else(|| song.duration());

        let shared = Arc::new(SourceShared {
            inner: Mutex::new(SourceInner {
                blocks: VecDeque::new(),
                finished: false,
                error: None,
                stop: false,
            }),
            space: Condvar::new(),
            wake,
        });

        let uri = song.uri().to_string();
        let thread = {
            let shared = Arc::clone(&shared);
            let uri = uri.clone();
            thread::Builder::new()
                .name(format!("decoder:{uri}"))
                .spawn(move || decoder_task(shared, instance, uri))
                .map_err(|e| Error::Playback(format!("failed to spawn decoder thread: {e}")))?
        };

        Ok(DecoderSource {
            shared,
            thread: Some(thread),
            format,
            duration,
            start_time: start,
            uri,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn duration(&self) -> Option<SongTime> {
        self.duration
    }

    /// The position this decoder was opened at.
    pub fn start_time(&self) -> SongTime {
        self.start_time
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Take the next decoded block, without blocking.
    pub fn poll(&self) -> BlockPoll {
        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(block) = inner.blocks.pop_front() {
            self.shared.space.notify_one();
            return BlockPoll::Block(block);
        }
        if let Some(error) = inner.error.take() {
            return BlockPoll::Failed(error);
        }
        if inner.finished {
            BlockPoll::Finished
        } else {
            BlockPoll::Pending
        }
    }

    /// Whether the decoder has produced (and the player taken) everything.
    pub fn is_drained(&self) -> bool {
        let inner = self.shared.inner.lock().unwrap();
        inner.finished && inner.blocks.is_empty() && inner.error.is_none()
    }
}

impl Drop for DecoderSource {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.stop = true;
            inner.blocks.clear();
        }
        self.shared.space.notify_all();
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                warn!("decoder thread for {} panicked: {e:?}", self.uri);
            }
        }
    }
}

fn decoder_task(shared: Arc<SourceShared>, mut instance: Box<dyn DecoderInstance>, uri: String) {
    debug!("decoder started for {uri}");

    loop {
        let block = match instance.decode() {
            Ok(Some(block)) => block,
            Ok(None) => {
                let mut inner = shared.inner.lock().unwrap();
                inner.finished = true;
                drop(inner);
                shared.wake.wake();
                break;
            }
            Err(e) => {
                let mut inner = shared.inner.lock().unwrap();
                inner.error = Some(e);
                inner.finished = true;
                drop(inner);
                shared.wake.wake();
                break;
            }
        };

        let mut inner = shared.inner.lock().unwrap();
        while inner.blocks.len() >= BLOCK_BUFFER && !inner.stop {
            inner = shared.space.wait(inner).unwrap();
        }
        if inner.stop {
            break;
        }
        inner.blocks.push_back(block);
        drop(inner);
        shared.wake.wake();
    }

    debug!("decoder finished for {uri}");
}
