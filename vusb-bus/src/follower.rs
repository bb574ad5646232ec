// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tails a regular or gzip-compressed log file on its own producer thread,
//! feeding a [`vusb_parsers::LogParser`] and reporting read progress (§4.7).

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use vusb_model::Event;
use vusb_parsers::{choose_parser, LogParser};

use crate::error::FollowerError;
use crate::pairing::FifoPairer;

/// How many events the producer thread may have in flight before `put`
/// blocks (§5 "Shared resources": the output queue is bounded).
const QUEUE_CAPACITY: usize = 256;

/// Cadence at which a live-tailing Follower polls for appended data after
/// reaching EOF (§4.7, §5).
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative stop flag observed at the Follower's suspension points: the
/// read loop and the EOF poll (§5).
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reads the gzip ISIZE footer: the last 4 bytes of a `.gz` file hold the
/// uncompressed size modulo 2^32, which is what the original tool used as
/// its progress denominator (§4.7) rather than decompressing up front.
fn gzip_isize(file: &mut File) -> std::io::Result<u64> {
    let len = file.seek(SeekFrom::End(0))?;
    if len < 4 {
        return Ok(0);
    }
    file.seek(SeekFrom::End(-4))?;
    let mut footer = [0u8; 4];
    file.read_exact(&mut footer)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(u32::from_le_bytes(footer) as u64)
}

fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(read == 2 && magic == [0x1f, 0x8b])
}

/// Byte-counting wrapper so the Follower can report progress against the
/// *compressed* stream position even when reading through a gzip decoder.
struct CountingReader<R> {
    inner: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

enum Source {
    Plain(BufReader<CountingReader<File>>),
    Gzip(BufReader<CountingReader<MultiGzDecoder<File>>>),
}

/// A running Follower: the receiving end of its output queue plus the
/// shared progress counters (§4.7).
pub struct FollowerHandle {
    pub events: Receiver<Event>,
    bytes_read: Arc<AtomicU64>,
    total_bytes: u64,
    stop: StopFlag,
    join: Option<JoinHandle<()>>,
}

impl FollowerHandle {
    /// `bytes_read / total_bytes`, the Follower's progress contract
    /// (§4.7). `1.0` when the total is unknown (empty file).
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (self.bytes_read.load(Ordering::Relaxed) as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Signals the stop flag, drains whatever is left in the output queue
    /// (unblocking a producer stuck on a full-queue `put`), then joins the
    /// producer thread (§5 "Cancellation").
    pub fn stop_and_join(mut self) {
        self.stop.stop();
        while self.events.try_recv().is_ok() {}
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }

    /// Blocks until the producer thread exits, without draining. Use when
    /// the caller intends to consume `events` to completion itself.
    pub fn join(mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

/// Tails one input file and drives a chosen parser (§4.7).
pub struct Follower {
    path: PathBuf,
    poll_interval: Duration,
    live_tail: bool,
}

impl Follower {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            live_tail: false,
        }
    }

    /// Enables EOF polling for appended data rather than terminating at
    /// EOF (§4.7 "live-tail mode").
    pub fn with_live_tail(mut self, live_tail: bool) -> Self {
        self.live_tail = live_tail;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Opens the file, picks a parser by extension (§6), and starts the
    /// producer thread. Returns a [`FollowerHandle`] the caller drains.
    pub fn spawn(self) -> Result<FollowerHandle, FollowerError> {
        let mut file = File::open(&self.path).map_err(|source| FollowerError::Open {
            path: self.path.display().to_string(),
            source,
        })?;
        let gzip = is_gzip(&mut file)?;
        let total_bytes = if gzip {
            gzip_isize(&mut file)?
        } else {
            file.metadata()?.len()
        };

        let bytes_read = Arc::new(AtomicU64::new(0));
        let parser = choose_parser(&self.path);
        let line_oriented = vusb_parsers::is_line_oriented(&parser);

        let source = if gzip {
            Source::Gzip(BufReader::new(CountingReader {
                inner: MultiGzDecoder::new(file),
                bytes_read: bytes_read.clone(),
            }))
        } else {
            Source::Plain(BufReader::new(CountingReader {
                inner: file,
                bytes_read: bytes_read.clone(),
            }))
        };

        let (tx, rx) = sync_channel(QUEUE_CAPACITY);
        let stop = StopFlag::new();
        let stop_for_thread = stop.clone();
        let poll_interval = self.poll_interval;
        let live_tail = self.live_tail;
        let path = self.path.clone();

        let join = std::thread::Builder::new()
            .name("vusb-follower".into())
            .spawn(move || {
                run_producer(
                    path,
                    source,
                    parser,
                    line_oriented,
                    &tx,
                    &stop_for_thread,
                    live_tail,
                    poll_interval,
                )
            })
            .map_err(FollowerError::Io)?;

        Ok(FollowerHandle {
            events: rx,
            bytes_read,
            total_bytes,
            stop,
            join: Some(join),
        })
    }
}

fn run_producer(
    path: PathBuf,
    mut source: Source,
    mut parser: LogParser,
    line_oriented: bool,
    tx: &SyncSender<Event>,
    stop: &StopFlag,
    live_tail: bool,
    poll_interval: Duration,
) {
    let mut raw: VecDeque<Event> = VecDeque::new();
    let mut paired: VecDeque<Event> = VecDeque::new();
    let mut pairer = FifoPairer::new();
    let mut line = String::new();
    let mut chunk = [0u8; 8192];

    loop {
        if stop.is_stopped() {
            tracing::debug!(path = %path.display(), "follower observed stop flag");
            return;
        }

        let progressed = if line_oriented {
            line.clear();
            let read = match &mut source {
                Source::Plain(r) => r.read_line(&mut line),
                Source::Gzip(r) => r.read_line(&mut line),
            };
            match read {
                Ok(0) => false,
                Ok(_) => {
                    feed_line(&mut parser, &line, &mut raw);
                    true
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "follower read error");
                    flush_parser(&mut parser, &mut raw);
                    pair_and_queue(&mut raw, &mut pairer, &mut paired);
                    paired.push_back(Event::Terminal(vusb_model::Termination::Io(e.to_string())));
                    drain(&mut paired, tx);
                    return;
                }
            }
        } else {
            let read = match &mut source {
                Source::Plain(r) => r.read(&mut chunk),
                Source::Gzip(r) => r.read(&mut chunk),
            };
            match read {
                Ok(0) => false,
                Ok(n) => {
                    if let LogParser::Ellisys(p) = &mut parser {
                        p.feed(&chunk[..n]);
                    }
                    true
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "follower read error");
                    paired.push_back(Event::Terminal(vusb_model::Termination::Io(e.to_string())));
                    drain(&mut paired, tx);
                    return;
                }
            }
        };

        pair_and_queue(&mut raw, &mut pairer, &mut paired);
        drain(&mut paired, tx);

        if progressed {
            continue;
        }

        // EOF. In live-tail mode this just means "nothing new yet" — the
        // parser is left exactly as it is so a later append still
        // completes whatever record was in flight (§4.7 "live-tail mode").
        if live_tail {
            std::thread::sleep(poll_interval);
            continue;
        }

        if !line_oriented {
            if let LogParser::Ellisys(p) = &mut parser {
                p.finish(&mut raw);
            }
        } else {
            flush_parser(&mut parser, &mut raw);
        }
        pair_and_queue(&mut raw, &mut pairer, &mut paired);
        pairer.reset();
        paired.push_back(Event::Terminal(vusb_model::Termination::EndOfLog));
        drain(&mut paired, tx);
        return;
    }
}

/// Routes every raw parser event through the FIFO pairer (Transactions
/// only; Sof markers and anything else pass straight through), appending
/// the result onto `paired`.
fn pair_and_queue(raw: &mut VecDeque<Event>, pairer: &mut FifoPairer, paired: &mut VecDeque<Event>) {
    while let Some(event) = raw.pop_front() {
        match event {
            Event::Transaction(t) => pairer.observe(t, paired),
            other => paired.push_back(other),
        }
    }
}

fn feed_line(parser: &mut LogParser, line: &str, out: &mut VecDeque<Event>) {
    match parser {
        LogParser::Vmx(p) => p.parse_line(line, out),
        LogParser::Usbmon(p) => p.parse_line(line, out),
        LogParser::TimestampLog(p) => p.parse_line(line, out),
        LogParser::Ellisys(_) => unreachable!("Ellisys is byte-oriented"),
    }
}

fn flush_parser(parser: &mut LogParser, out: &mut VecDeque<Event>) {
    match parser {
        LogParser::Vmx(p) => p.flush(out),
        LogParser::Usbmon(p) => p.flush(out),
        LogParser::TimestampLog(p) => p.flush(out),
        LogParser::Ellisys(_) => {}
    }
}

/// Pushes every queued event onto the channel, blocking (the bounded-queue
/// backpressure from §5) when the consumer is slow.
fn drain(out: &mut VecDeque<Event>, tx: &SyncSender<Event>) {
    while let Some(event) = out.pop_front() {
        if tx.send(event).is_err() {
            return;
        }
    }
}
