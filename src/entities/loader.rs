//! Animated image loader with pluggable decoder backends
//!
//! Decoder selection is a priority list: the first factory whose `can_decode`
//! accepts the bytes opens them. Default order: GIF, then APNG.
//!
//! Both shipped backends use the `image` crate's `AnimationDecoder`. Frames are
//! composited RGBA, so frame `i` depends on every frame before it.
//!
//! # Sequential cursor
//!
//! Each [`CodecDecoder`] owns one stream thread that keeps the frame iterator
//! positioned after the last decoded frame. Requests at or past that position
//! continue from it; only a backward seek reopens the stream. A forward pass
//! over `n` frames therefore composites each frame once.
//! The iterator is not `Send`, so it never leaves that thread: callers talk
//! to it over a channel.

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{AnimationDecoder, Frames, ImageResult};
use log::{debug, trace, warn};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::frame::{AnimError, Dimensions, Image};
use super::traits::{AnimatedDecoder, DecoderFactory};

/// Delays below this are treated as "unspecified" by browsers
const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);
/// Delay used in place of an unspecified one
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

const GIF_MAGIC: [&[u8]; 2] = [b"GIF87a", b"GIF89a"];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Ordered list of decoder factories
#[derive(Clone)]
pub struct DecoderRegistry {
    factories: Vec<Arc<dyn DecoderFactory>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GifFactory));
        registry.register(Arc::new(ApngFactory));
        registry
    }
}

impl DecoderRegistry {
    /// Empty registry (no backends)
    pub fn new() -> Self {
        Self { factories: Vec::new() }
    }

    /// Append a factory at the lowest priority
    pub fn register(&mut self, factory: Arc<dyn DecoderFactory>) {
        debug!("Decoder registered: {} (priority {})", factory.name(), self.factories.len());
        self.factories.push(factory);
    }

    /// Insert a factory ahead of all others
    pub fn register_first(&mut self, factory: Arc<dyn DecoderFactory>) {
        debug!("Decoder registered: {} (priority 0)", factory.name());
        self.factories.insert(0, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Open `data` with the first factory that claims it and opens it successfully
    ///
    /// If every claiming factory fails, the last failure is returned.
    pub fn open(&self, data: Arc<[u8]>) -> Result<Box<dyn AnimatedDecoder>, AnimError> {
        let mut last_error = None;
        for factory in self.factories.iter().filter(|f| f.can_decode(&data)) {
            match factory.open(Arc::clone(&data)) {
                Ok(decoder) => {
                    debug!("Decoder selected: {} ({} bytes)", factory.name(), data.len());
                    return Ok(decoder);
                }
                Err(e) => {
                    warn!("Decoder {} claimed the data but failed: {}", factory.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(AnimError::NoDecoder))
    }
}

/// GIF89a / GIF87a backend
#[derive(Debug, Clone, Copy, Default)]
pub struct GifFactory;

impl DecoderFactory for GifFactory {
    fn name(&self) -> &'static str {
        "gif"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        GIF_MAGIC.iter().any(|magic| data.starts_with(magic))
    }

    fn open(&self, data: Arc<[u8]>) -> Result<Box<dyn AnimatedDecoder>, AnimError> {
        let loops = gif_loop_count(&data);
        Ok(Box::new(CodecDecoder::scan(CodecKind::Gif, data, loops)?))
    }
}

/// Animated PNG backend (PNG with an `acTL` chunk)
#[derive(Debug, Clone, Copy, Default)]
pub struct ApngFactory;

impl DecoderFactory for ApngFactory {
    fn name(&self) -> &'static str {
        "apng"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        data.starts_with(PNG_MAGIC) && find_chunk(data, b"acTL").is_some()
    }

    fn open(&self, data: Arc<[u8]>) -> Result<Box<dyn AnimatedDecoder>, AnimError> {
        let loops = apng_loop_count(&data);
        Ok(Box::new(CodecDecoder::scan(CodecKind::Apng, data, loops)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecKind {
    Gif,
    Apng,
}

/// Decoder over an in-memory GIF/APNG stream with a sequential cursor
pub struct CodecDecoder {
    kind: CodecKind,
    durations: Vec<Duration>,
    sizes: Vec<Dimensions>,
    loop_count: Option<usize>,
    requests: Sender<DecodeRequest>,
    /// Times the stream thread (re)opened the stream
    reopens: Arc<AtomicUsize>,
}

struct DecodeRequest {
    index: usize,
    reply: Sender<Option<Image>>,
}

impl CodecDecoder {
    /// Walk the stream once to learn frame count, delays and sizes, then
    /// start the stream thread
    fn scan(kind: CodecKind, data: Arc<[u8]>, loop_count: Option<usize>) -> Result<Self, AnimError> {
        let mut durations = Vec::new();
        let mut sizes = Vec::new();
        for frame in open_frames(kind, &data)? {
            let frame = frame?;
            let (numer, denom) = frame.delay().numer_denom_ms();
            durations.push(normalize_delay(numer, denom));
            let buffer = frame.buffer();
            sizes.push(Dimensions::new(buffer.width(), buffer.height()));
        }
        debug!(
            "Scanned {:?}: {} frames, loop_count={:?}",
            kind,
            durations.len(),
            loop_count
        );

        let (requests, receiver) = unbounded();
        let reopens = Arc::new(AtomicUsize::new(0));
        {
            let reopens = Arc::clone(&reopens);
            thread::Builder::new()
                .name(format!("animcache-{:?}-stream", kind).to_lowercase())
                .spawn(move || serve_stream(kind, data, receiver, reopens))
                .map_err(|e| AnimError::Decode(format!("failed to start stream thread: {}", e)))?;
        }

        Ok(Self {
            kind,
            durations,
            sizes,
            loop_count,
            requests,
            reopens,
        })
    }
}

impl Drop for CodecDecoder {
    fn drop(&mut self) {
        // Dropping `requests` stops the stream thread
        debug!(
            "{:?} decoder closed, stream opened {} times",
            self.kind,
            self.reopens.load(Ordering::SeqCst)
        );
    }
}

fn open_frames(kind: CodecKind, data: &Arc<[u8]>) -> ImageResult<Frames<'static>> {
    let cursor = Cursor::new(Arc::clone(data));
    match kind {
        CodecKind::Gif => Ok(GifDecoder::new(cursor)?.into_frames()),
        CodecKind::Apng => Ok(PngDecoder::new(cursor)?.apng()?.into_frames()),
    }
}

/// Frame iterator plus the index of the frame it yields next
struct StreamCursor {
    next: usize,
    frames: Frames<'static>,
}

impl StreamCursor {
    /// Skip to `index` and yield it. `index` must be `>= self.next`.
    fn advance_to(&mut self, index: usize) -> Result<Image, String> {
        while self.next < index {
            self.step()?;
        }
        self.step()
    }

    fn step(&mut self) -> Result<Image, String> {
        let frame = match self.frames.next() {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(e.to_string()),
            None => return Err("stream ended early".into()),
        };
        self.next += 1;
        Ok(Image::new(frame.into_buffer()))
    }
}

/// Stream thread body: answers requests until every sender is gone
fn serve_stream(
    kind: CodecKind,
    data: Arc<[u8]>,
    requests: Receiver<DecodeRequest>,
    reopens: Arc<AtomicUsize>,
) {
    let mut cursor: Option<StreamCursor> = None;
    for request in requests.iter() {
        let index = request.index;
        if cursor.as_ref().is_none_or(|c| c.next > index) {
            trace!("{:?} stream reopened for frame {}", kind, index);
            reopens.fetch_add(1, Ordering::SeqCst);
            cursor = match open_frames(kind, &data) {
                Ok(frames) => Some(StreamCursor { next: 0, frames }),
                Err(e) => {
                    warn!("{:?} stream could not be reopened: {}", kind, e);
                    None
                }
            };
        }

        let image = match cursor.as_mut().map(|c| c.advance_to(index)) {
            Some(Ok(image)) => Some(image),
            Some(Err(e)) => {
                debug!("{:?} frame {} failed: {}", kind, index, e);
                cursor = None;
                None
            }
            None => None,
        };
        // Requester may have given up; nothing to do then
        let _ = request.reply.send(image);
    }
    trace!("{:?} stream thread stopped", kind);
}

impl AnimatedDecoder for CodecDecoder {
    fn frame_count(&self) -> Option<usize> {
        Some(self.durations.len())
    }

    fn loop_count(&self) -> Option<usize> {
        self.loop_count
    }

    fn duration(&self, index: usize) -> Option<Duration> {
        self.durations.get(index).copied()
    }

    fn frame_size(&self, index: usize) -> Option<Dimensions> {
        self.sizes.get(index).copied()
    }

    fn decode(&self, index: usize, _decompress: bool) -> Option<Image> {
        if index >= self.durations.len() {
            return None;
        }
        trace!("Decoding {:?} frame {}", self.kind, index);
        let (reply, response) = bounded(1);
        if self.requests.send(DecodeRequest { index, reply }).is_err() {
            warn!("{:?} stream thread is gone", self.kind);
            return None;
        }
        response.recv().ok().flatten()
    }
}

fn normalize_delay(numer: u32, denom: u32) -> Duration {
    if denom == 0 {
        return DEFAULT_FRAME_DELAY;
    }
    let delay = Duration::from_micros(numer as u64 * 1000 / denom as u64);
    if delay < MIN_FRAME_DELAY {
        DEFAULT_FRAME_DELAY
    } else {
        delay
    }
}

/// NETSCAPE2.0 application extension: `03 01 <u16 le loops>`
fn gif_loop_count(data: &[u8]) -> Option<usize> {
    const APP_ID: &[u8] = b"NETSCAPE2.0";
    let pos = data.windows(APP_ID.len()).position(|w| w == APP_ID)?;
    let block = data.get(pos + APP_ID.len()..pos + APP_ID.len() + 4)?;
    if block[0] != 0x03 || block[1] != 0x01 {
        return None;
    }
    Some(u16::from_le_bytes([block[2], block[3]]) as usize)
}

/// `acTL` chunk: `<u32 be num_frames> <u32 be num_plays>`
fn apng_loop_count(data: &[u8]) -> Option<usize> {
    let body = find_chunk(data, b"acTL")?;
    let plays = body.get(4..8)?;
    Some(u32::from_be_bytes([plays[0], plays[1], plays[2], plays[3]]) as usize)
}

/// Body of the first PNG chunk of type `kind` appearing before `IDAT`
fn find_chunk<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = PNG_MAGIC.len();
    while pos + 8 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let chunk_type = &data[pos + 4..pos + 8];
        if chunk_type == kind {
            return data.get(pos + 8..pos + 8 + len);
        }
        if chunk_type == b"IDAT" {
            return None;
        }
        // length + type + body + crc
        pos = pos.checked_add(12 + len)?;
    }
    None
}
