//! Staged decode pipeline
//!
//! ```text
//! bytes -> ingest_bytes -> [fragments] -> reassemble_and_validate
//!       -> [messages] -> dearmour_batch -> [payloads] -> consumer
//! ```
//!
//! The three stage functions are plain, non-blocking steps: each pulls batches
//! from a [`BatchSource`], runs the pure parsing/validation/de-armouring code
//! over every record and hands full batches to a [`BatchSink`]. A stage stops
//! taking input as soon as its sink reports full; a batch it has already
//! started is always delivered, never dropped. A closed sink fails the stage
//! with [`DecodeError::QueueClosed`].
//!
//! [`Pipeline`] wires the stages to queues and worker threads. Ingestion runs
//! on the caller's thread; reassembly and de-armouring each own a thread.

use crate::armour::{PackedPayload, PayloadDeArmourer};
use crate::batch::Chunk;
use crate::error::{DecodeError, Result};
use crate::limits::{BATCH_SIZE, DEFAULT_QUEUE_CAPACITY, MAX_CHARS_PER_FRAGMENT};
use crate::pool::{BufferPool, Pooled};
use crate::queue::{
    spsc, BatchSink, BatchSource, BlockingQueue, PushError, SpscProducer, DEFAULT_POP_TIMEOUT,
};
use crate::reassembly::{Message, ReassemblyOutcome, Reassembler};
use crate::sentence::{Fragment, SentenceParser, TalkerMode};
use crate::stats::{DecodeStats, StatsSnapshot};
use crossbeam_utils::Backoff;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Batch of parsed sentences
pub type FragmentBatch = Chunk<Fragment, BATCH_SIZE>;

/// Batch of reassembled messages
pub type MessageBatch = Chunk<Message, BATCH_SIZE>;

/// Batch of de-armoured payloads
pub type PayloadBatch = Chunk<PackedPayload, BATCH_SIZE>;

/// Queue handing payload batches to consumers
pub type PayloadQueue = BlockingQueue<Pooled<PayloadBatch>>;

const READ_CHUNK: usize = 64 * 1024;
const IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Longest unterminated tail that can still become a sentence
const MAX_TAIL: usize = MAX_CHARS_PER_FRAGMENT + 3;

/// Fail once nothing downstream will ever take another batch
fn ensure_open<T, K: BatchSink<T>>(sink: &K) -> Result<()> {
    if sink.is_closed() {
        return Err(DecodeError::QueueClosed);
    }
    Ok(())
}

/// Push `value`, spinning while the sink is full
fn send_blocking<T, K: BatchSink<T>>(sink: &K, mut value: T) -> Result<()> {
    let backoff = Backoff::new();
    loop {
        match sink.send(value) {
            Ok(()) => return Ok(()),
            Err(PushError::Full(v)) => {
                value = v;
                backoff.snooze();
            }
            Err(PushError::Closed(_)) => return Err(DecodeError::QueueClosed),
        }
    }
}

/// Parse sentences from `input` into `batch` starting at `pos`
///
/// Returns the position reached and whether the input is used up. An
/// unterminated last line stops parsing at its start.
fn fill_fragments(
    batch: &mut FragmentBatch,
    input: &[u8],
    mut pos: usize,
    parser: &SentenceParser,
    stats: &DecodeStats,
) -> (usize, bool) {
    loop {
        while pos < input.len() && matches!(input[pos], b'\r' | b'\n') {
            pos += 1;
        }
        if pos >= input.len() {
            return (pos, true);
        }
        let line_start = pos;
        let body = if matches!(input[pos], b'!' | b'$') {
            pos + 1
        } else {
            pos
        };

        let Some(fragment) = batch.push_back() else {
            return (line_start, false);
        };
        let consumed = parser.parse_into(fragment, &input[body..]);
        if consumed > 0 {
            stats.record_sentence();
            pos = body + consumed;
            continue;
        }

        batch.pop_back();
        match input[body..].iter().position(|&b| b == b'\n') {
            Some(nl) => {
                trace!(offset = line_start, "skipping malformed line");
                stats.record_malformed();
                pos = body + nl + 1;
            }
            None => return (line_start, true),
        }
    }
}

/// Frame sentences out of `input` and push them as fragment batches
///
/// Returns the number of bytes fully consumed. Unconsumed bytes are either an
/// unterminated last line or input left over because `sink` filled up; the
/// caller keeps them and offers them again.
pub fn ingest_bytes<K>(
    input: &[u8],
    parser: &SentenceParser,
    pool: &BufferPool<FragmentBatch>,
    sink: &K,
    stats: &DecodeStats,
) -> Result<usize>
where
    K: BatchSink<Pooled<FragmentBatch>>,
{
    let mut pos = 0;
    while pos < input.len() {
        ensure_open(sink)?;
        if sink.is_full() {
            break;
        }
        let mut batch = pool.acquire()?;
        let (next, done) = fill_fragments(&mut batch, input, pos, parser, stats);
        pos = next;
        if !batch.is_empty() {
            send_blocking(sink, batch)?;
        }
        if done {
            break;
        }
    }
    stats.record_bytes(pos);
    Ok(pos)
}

/// Validate fragment batches and reassemble them into message batches
///
/// Handles at most `budget` input batches and returns how many it handled.
pub fn reassemble_and_validate<S, K>(
    source: &S,
    sink: &K,
    reassembler: &mut Reassembler,
    pool: &BufferPool<MessageBatch>,
    stats: &DecodeStats,
    budget: usize,
) -> Result<usize>
where
    S: BatchSource<Pooled<FragmentBatch>>,
    K: BatchSink<Pooled<MessageBatch>>,
{
    let mut handled = 0;
    while handled < budget {
        ensure_open(sink)?;
        if sink.is_full() {
            break;
        }
        let Ok(fragments) = source.recv() else {
            break;
        };
        let mut out = pool.acquire()?;
        for fragment in fragments.iter() {
            if out.is_full() {
                let next = pool.acquire()?;
                send_blocking(sink, std::mem::replace(&mut out, next))?;
            }
            let Some(message) = out.push_back() else {
                break;
            };
            match reassembler.process(message, fragment) {
                ReassemblyOutcome::Complete => stats.record_message(),
                ReassemblyOutcome::Pending => out.pop_back(),
                ReassemblyOutcome::ChecksumFailed => {
                    out.pop_back();
                    stats.record_checksum_failure();
                }
                ReassemblyOutcome::Discarded { dropped } => {
                    out.pop_back();
                    stats.record_discarded(dropped);
                }
            }
        }
        if !out.is_empty() {
            send_blocking(sink, out)?;
        }
        handled += 1;
    }
    Ok(handled)
}

/// De-armour message batches into payload batches
///
/// Messages that decode to no bits are dropped. Handles at most `budget` input
/// batches and returns how many it handled.
pub fn dearmour_batch<S, K>(
    source: &S,
    sink: &K,
    pool: &BufferPool<PayloadBatch>,
    stats: &DecodeStats,
    budget: usize,
) -> Result<usize>
where
    S: BatchSource<Pooled<MessageBatch>>,
    K: BatchSink<Pooled<PayloadBatch>>,
{
    let mut handled = 0;
    while handled < budget {
        ensure_open(sink)?;
        if sink.is_full() {
            break;
        }
        let Ok(messages) = source.recv() else {
            break;
        };
        let mut out = pool.acquire()?;
        for message in messages.iter() {
            if out.is_full() {
                let next = pool.acquire()?;
                send_blocking(sink, std::mem::replace(&mut out, next))?;
            }
            let Some(payload) = out.push_back() else {
                break;
            };
            if PayloadDeArmourer::dearmour_message(message, payload) == 0 {
                out.pop_back();
                stats.record_empty_payload();
            } else {
                stats.record_payload();
            }
        }
        if !out.is_empty() {
            send_blocking(sink, out)?;
        }
        handled += 1;
    }
    Ok(handled)
}

/// Drive one stage until `drained` reports its input exhausted and empty
fn run_stage(
    stage: &'static str,
    drained: impl Fn() -> bool,
    mut step: impl FnMut() -> Result<usize>,
) -> Result<()> {
    info!(stage, "stage started");
    let backoff = Backoff::new();
    let mut batches = 0usize;
    loop {
        let n = step()?;
        if n > 0 {
            batches += n;
            backoff.reset();
            continue;
        }
        if drained() {
            break;
        }
        if backoff.is_completed() {
            thread::sleep(IDLE_SLEEP);
        } else {
            backoff.snooze();
        }
    }
    info!(stage, batches, "stage drained");
    Ok(())
}

/// Pipeline tuning
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Slots per inter-stage queue; a power of two
    pub queue_capacity: usize,
    /// Default wait of [`BlockingQueue::pop`] on the payload queue
    pub pop_timeout: Duration,
    /// Accepted sentence prefixes
    pub talker_mode: TalkerMode,
    /// Upper bound on batches allocated per record kind
    pub pool_limit: Option<usize>,
    /// Input batches a worker handles before checking for shutdown
    pub batches_per_call: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pop_timeout: DEFAULT_POP_TIMEOUT,
            talker_mode: TalkerMode::default(),
            pool_limit: None,
            batches_per_call: 128,
        }
    }
}

impl PipelineConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Check the settings for consistency
    pub fn validate(&self) -> Result<()> {
        if !self.queue_capacity.is_power_of_two() {
            return Err(DecodeError::invalid_config(format!(
                "queue capacity {} is not a power of two",
                self.queue_capacity
            )));
        }
        if self.batches_per_call == 0 {
            return Err(DecodeError::invalid_config("batches per call must be positive"));
        }
        // a full queue plus the batch each side is holding
        let needed = self.queue_capacity + 2;
        if let Some(limit) = self.pool_limit {
            if limit < needed {
                return Err(DecodeError::invalid_config(format!(
                    "pool limit {} below {} batches needed to fill a queue",
                    limit, needed
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`]
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Create a builder holding the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the slots per queue
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the default payload pop timeout
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.config.pop_timeout = timeout;
        self
    }

    /// Set the accepted sentence prefixes
    pub fn with_talker_mode(mut self, mode: TalkerMode) -> Self {
        self.config.talker_mode = mode;
        self
    }

    /// Cap the batches allocated per record kind
    pub fn with_pool_limit(mut self, limit: usize) -> Self {
        self.config.pool_limit = Some(limit);
        self
    }

    /// Set the worker batch budget
    pub fn with_batches_per_call(mut self, budget: usize) -> Self {
        self.config.batches_per_call = budget;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Threaded decode pipeline
///
/// Feed bytes with [`ingest`](Self::ingest), [`ingest_all`](Self::ingest_all)
/// or [`ingest_reader`](Self::ingest_reader) and pop payload batches from
/// [`payloads`](Self::payloads) on any thread. [`finish`](Self::finish) marks
/// the input exhausted and waits for the workers to drain; the payload queue
/// must keep being drained until then.
pub struct Pipeline {
    parser: SentenceParser,
    fragment_pool: BufferPool<FragmentBatch>,
    fragments: SpscProducer<Pooled<FragmentBatch>>,
    payloads: Arc<PayloadQueue>,
    stats: Arc<DecodeStats>,
    input_exhausted: Arc<AtomicBool>,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl Pipeline {
    /// Validate `config`, build the queues and start the stage workers
    pub fn spawn(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let (fragments, fragment_rx) = spsc(config.queue_capacity)?;
        let (message_tx, message_rx) = spsc::<Pooled<MessageBatch>>(config.queue_capacity)?;
        let payloads = Arc::new(PayloadQueue::new(config.queue_capacity, config.pop_timeout)?);
        let stats = Arc::new(DecodeStats::new());
        let input_exhausted = Arc::new(AtomicBool::new(false));
        let budget = config.batches_per_call;

        let reassemble = {
            let pool = BufferPool::<MessageBatch>::with_limit(config.pool_limit);
            let stats = Arc::clone(&stats);
            let exhausted = Arc::clone(&input_exhausted);
            thread::Builder::new()
                .name("ais-reassemble".into())
                .spawn(move || {
                    let mut reassembler = Reassembler::new();
                    let drained = || {
                        exhausted.load(Ordering::Acquire)
                            && fragment_rx.is_closed()
                            && fragment_rx.is_empty()
                    };
                    let result = run_stage("reassemble", drained, || {
                        reassemble_and_validate(
                            &fragment_rx,
                            &message_tx,
                            &mut reassembler,
                            &pool,
                            &stats,
                            budget,
                        )
                    });
                    if reassembler.open_slots() > 0 {
                        debug!(
                            open = reassembler.open_slots(),
                            "input ended inside multi-sentence messages"
                        );
                    }
                    result
                })?
        };

        let dearmour = {
            let pool = BufferPool::<PayloadBatch>::with_limit(config.pool_limit);
            let stats = Arc::clone(&stats);
            let exhausted = Arc::clone(&input_exhausted);
            let payloads = Arc::clone(&payloads);
            thread::Builder::new()
                .name("ais-dearmour".into())
                .spawn(move || {
                    let drained = || {
                        exhausted.load(Ordering::Acquire)
                            && message_rx.is_closed()
                            && message_rx.is_empty()
                    };
                    let result = run_stage("dearmour", drained, || {
                        dearmour_batch(&message_rx, &payloads, &pool, &stats, budget)
                    });
                    payloads.close();
                    result
                })
                .map_err(|err| {
                    // lets the reassembly worker drain out once `fragments` drops
                    input_exhausted.store(true, Ordering::Release);
                    err
                })?
        };

        Ok(Pipeline {
            parser: SentenceParser::new(config.talker_mode),
            fragment_pool: BufferPool::with_limit(config.pool_limit),
            fragments,
            payloads,
            stats,
            input_exhausted,
            workers: vec![reassemble, dearmour],
        })
    }

    /// Ingest what fits right now; see [`ingest_bytes`]
    pub fn ingest(&mut self, input: &[u8]) -> Result<usize> {
        ingest_bytes(
            input,
            &self.parser,
            &self.fragment_pool,
            &self.fragments,
            &self.stats,
        )
    }

    /// Ingest every complete line of `input`, waiting out backpressure
    ///
    /// Returns the bytes consumed; only an unterminated last line is left.
    pub fn ingest_all(&mut self, input: &[u8]) -> Result<usize> {
        let backoff = Backoff::new();
        let mut consumed = 0;
        while consumed < input.len() {
            if self.fragments.is_closed() {
                return Err(DecodeError::QueueClosed);
            }
            let n = self.ingest(&input[consumed..])?;
            consumed += n;
            if self.fragments.is_full() {
                backoff.snooze();
            } else if n == 0 {
                break;
            }
        }
        Ok(consumed)
    }

    /// Read `reader` to the end, keeping partial lines across reads
    ///
    /// A last line without a terminator is still decoded. Returns the total
    /// bytes consumed.
    pub fn ingest_reader<R: Read>(&mut self, mut reader: R) -> Result<u64> {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK + MAX_TAIL);
        let mut total = 0u64;
        loop {
            let start = buf.len();
            buf.resize(start + READ_CHUNK, 0);
            let n = match reader.read(&mut buf[start..]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    buf.truncate(start);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            buf.truncate(start + n);

            if n == 0 {
                if !buf.is_empty() {
                    buf.push(b'\n');
                    total += self.ingest_all(&buf)? as u64;
                }
                return Ok(total);
            }

            let consumed = self.ingest_all(&buf)?;
            total += consumed as u64;
            buf.drain(..consumed);
            if buf.len() > MAX_TAIL {
                trace!(len = buf.len(), "dropping oversized unterminated line");
                self.stats.record_malformed();
                total += buf.len() as u64;
                buf.clear();
            }
        }
    }

    /// The queue carrying payload batches out of the pipeline
    ///
    /// It is closed once the pipeline has drained after [`finish`](Self::finish).
    pub fn payloads(&self) -> Arc<PayloadQueue> {
        Arc::clone(&self.payloads)
    }

    /// Live counters
    pub fn stats(&self) -> Arc<DecodeStats> {
        Arc::clone(&self.stats)
    }

    /// Batches waiting in the fragment and payload queues
    pub fn queue_depths(&self) -> (usize, usize) {
        (self.fragments.len(), self.payloads.len())
    }

    /// Mark the input exhausted, drain every stage and stop the workers
    pub fn finish(mut self) -> Result<StatsSnapshot> {
        self.join_workers()?;
        let snapshot = self.stats.snapshot();
        info!(%snapshot, "pipeline finished");
        Ok(snapshot)
    }

    fn join_workers(&mut self) -> Result<()> {
        self.input_exhausted.store(true, Ordering::Release);
        self.fragments.close();

        // a worker failing closes its queues, so its neighbours report
        // QueueClosed; keep the error that started it
        let mut result = Ok(());
        for worker in self.workers.drain(..) {
            let outcome = worker
                .join()
                .unwrap_or_else(|_| Err(DecodeError::Worker("stage thread panicked".into())));
            if matches!(result, Ok(()) | Err(DecodeError::QueueClosed)) && outcome.is_err() {
                result = outcome;
            }
        }
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        // nobody may be draining payloads any more
        self.payloads.close();
        if let Err(err) = self.join_workers() {
            debug!(%err, "pipeline dropped before finishing");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("mode", &self.parser.mode())
            .field("fragments", &self.fragments)
            .field("payloads", &self.payloads)
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::queue::PopError;
    use std::sync::mpsc;
    use std::time::Instant;

    const SINGLE: &str = "!AIVDM,1,1,,B,15M67FC000G?ufbE`FepT@3n00Sa,0*5C\r\n";
    const PART1: &str =
        "!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n";
    const PART2: &str = "!AIVDM,2,2,3,B,1@0000000000000,2*55\r\n";

    /// Frame `body` as a checksummed sentence line
    fn line(body: &str) -> String {
        format!("!{}*{:02X}\r\n", body, checksum::compute(body.as_bytes()))
    }

    fn stage_queues() -> Result<(
        SpscProducer<Pooled<FragmentBatch>>,
        crate::queue::SpscConsumer<Pooled<FragmentBatch>>,
    )> {
        spsc(8)
    }

    #[test]
    fn test_stages_end_to_end() -> Result<()> {
        let stats = DecodeStats::new();
        let parser = SentenceParser::default();
        let fragment_pool = BufferPool::new();
        let message_pool = BufferPool::new();
        let payload_pool = BufferPool::new();
        let (frag_tx, frag_rx) = stage_queues()?;
        let (msg_tx, msg_rx) = spsc::<Pooled<MessageBatch>>(8)?;
        let payloads = PayloadQueue::with_capacity(8)?;

        let input = format!("{}garbage line\n{}{}{}", SINGLE, PART1, PART2, SINGLE);
        let consumed = ingest_bytes(input.as_bytes(), &parser, &fragment_pool, &frag_tx, &stats)?;
        assert_eq!(consumed, input.len());

        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassemble_and_validate(&frag_rx, &msg_tx, &mut reassembler, &message_pool, &stats, 4)?,
            1
        );
        assert_eq!(dearmour_batch(&msg_rx, &payloads, &payload_pool, &stats, 4)?, 1);

        let batch = payloads.try_pop().unwrap();
        let types: Vec<u8> = batch.iter().map(|p| p.message_type().unwrap()).collect();
        assert_eq!(types, vec![1, 5, 1]);
        assert_eq!(batch.as_slice()[1].bits_used(), 424);

        let snap = stats.snapshot();
        assert_eq!(snap.sentences, 4);
        assert_eq!(snap.malformed, 1);
        assert_eq!(snap.messages, 3);
        assert_eq!(snap.payloads, 3);
        Ok(())
    }

    #[test]
    fn test_unterminated_tail_is_not_consumed() -> Result<()> {
        let stats = DecodeStats::new();
        let pool = BufferPool::new();
        let (tx, rx) = stage_queues()?;

        let input = format!("{}{}", SINGLE, &SINGLE[..30]);
        let consumed =
            ingest_bytes(input.as_bytes(), &SentenceParser::default(), &pool, &tx, &stats)?;
        assert_eq!(consumed, SINGLE.len());
        assert_eq!(rx.pop().map(|b| b.len()), Ok(1));
        Ok(())
    }

    #[test]
    fn test_full_sink_halts_ingestion() -> Result<()> {
        let stats = DecodeStats::new();
        let pool = BufferPool::new();
        let (tx, rx) = spsc::<Pooled<FragmentBatch>>(1)?;
        let parser = SentenceParser::default();

        let input = SINGLE.repeat(BATCH_SIZE + 10);
        let first = ingest_bytes(input.as_bytes(), &parser, &pool, &tx, &stats)?;
        assert_eq!(first, SINGLE.len() * BATCH_SIZE);
        assert_eq!(
            ingest_bytes(&input.as_bytes()[first..], &parser, &pool, &tx, &stats)?,
            0
        );

        assert_eq!(rx.pop().map(|b| b.len()), Ok(BATCH_SIZE));
        let rest = ingest_bytes(&input.as_bytes()[first..], &parser, &pool, &tx, &stats)?;
        assert_eq!(first + rest, input.len());
        assert_eq!(rx.pop().map(|b| b.len()), Ok(10));
        assert_eq!(stats.snapshot().sentences, (BATCH_SIZE + 10) as u64);
        Ok(())
    }

    #[test]
    fn test_checksum_failure_and_discard_are_counted() -> Result<()> {
        let stats = DecodeStats::new();
        let (frag_tx, frag_rx) = stage_queues()?;
        let (msg_tx, msg_rx) = spsc::<Pooled<MessageBatch>>(8)?;

        let bad = SINGLE.replace("*5C", "*5D");
        let input = format!("{}{}{}", bad, PART2, PART1);
        ingest_bytes(
            input.as_bytes(),
            &SentenceParser::default(),
            &BufferPool::new(),
            &frag_tx,
            &stats,
        )?;
        let mut reassembler = Reassembler::new();
        reassemble_and_validate(&frag_rx, &msg_tx, &mut reassembler, &BufferPool::new(), &stats, 1)?;

        assert_eq!(msg_rx.pop().err(), Some(PopError::Empty));
        let snap = stats.snapshot();
        assert_eq!(snap.checksum_failures, 1);
        assert_eq!(snap.fragments_discarded, 1);
        assert_eq!(reassembler.open_slots(), 1);
        Ok(())
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::builder().with_queue_capacity(48).build().is_err());
        assert!(PipelineConfig::builder().with_batches_per_call(0).build().is_err());
        assert!(PipelineConfig::builder()
            .with_queue_capacity(8)
            .with_pool_limit(4)
            .build()
            .is_err());

        let config = PipelineConfig::builder()
            .with_queue_capacity(16)
            .with_pool_limit(32)
            .with_talker_mode(TalkerMode::Strict)
            .with_pop_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        assert_eq!(config.pool_limit, Some(32));
        assert_eq!(config.talker_mode, TalkerMode::Strict);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_round_trips_through_json() {
        let config = PipelineConfig::builder().with_queue_capacity(32).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    fn collect_types(queue: Arc<PayloadQueue>) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut types = Vec::new();
            loop {
                match queue.pop_timeout(Duration::from_millis(50)) {
                    Ok(batch) => types.extend(batch.iter().map(|p| p.message_type().unwrap())),
                    Err(PopError::Closed) => return types,
                    Err(_) => continue,
                }
            }
        })
    }

    #[test]
    fn test_threaded_pipeline_drains_on_finish() -> Result<()> {
        let config = PipelineConfig::builder().with_queue_capacity(4).build()?;
        let mut pipeline = Pipeline::spawn(config)?;
        let consumer = collect_types(pipeline.payloads());

        let mut input = String::new();
        for i in 0..2000 {
            if i % 100 == 0 {
                input.push_str(PART1);
                input.push_str(PART2);
            } else {
                input.push_str(SINGLE);
            }
        }
        assert_eq!(pipeline.ingest_all(input.as_bytes())?, input.len());
        let snap = pipeline.finish()?;

        let types = consumer.join().unwrap();
        assert_eq!(types.len(), 2000);
        assert_eq!(types.iter().filter(|&&t| t == 5).count(), 20);
        assert_eq!(snap.messages, 2000);
        assert_eq!(snap.payloads, 2000);
        assert_eq!(snap.sentences, 2020);
        Ok(())
    }

    /// Reader returning at most `step` bytes per call
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_ingest_reader_keeps_partial_lines() -> Result<()> {
        let mut pipeline = Pipeline::spawn(PipelineConfig::default())?;
        let consumer = collect_types(pipeline.payloads());

        let mut input = String::new();
        input.push_str(SINGLE);
        input.push_str(PART1);
        input.push_str(PART2);
        input.push_str(&line("AIVDM,1,1,,A,15M67FC000G?ufbEGL4FO>064kP,0"));
        // no terminator on the final line
        input.push_str(SINGLE.trim_end());

        let reader = Trickle {
            data: input.as_bytes(),
            step: 7,
        };
        pipeline.ingest_reader(reader)?;
        let snap = pipeline.finish()?;

        assert_eq!(consumer.join().unwrap(), vec![1, 5, 1, 1]);
        assert_eq!(snap.malformed, 0);
        assert_eq!(snap.payloads, 4);
        Ok(())
    }

    #[test]
    fn test_drop_without_finish_stops_workers() -> Result<()> {
        let mut pipeline = Pipeline::spawn(PipelineConfig::default())?;
        pipeline.ingest_all(SINGLE.as_bytes())?;
        let payloads = pipeline.payloads();
        drop(pipeline);
        assert!(PayloadQueue::is_closed(&payloads));
        Ok(())
    }

    /// Ingest without a consumer until the fragment and payload queues are full
    fn fill_to_capacity(pipeline: &mut Pipeline, input: &[u8]) -> Result<usize> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut offset = 0;
        while pipeline.queue_depths() != (1, 1) && Instant::now() < deadline {
            offset += pipeline.ingest(&input[offset..])?;
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(pipeline.queue_depths(), (1, 1));
        Ok(offset)
    }

    fn backpressured_pipeline() -> Result<Pipeline> {
        let config = PipelineConfig::builder().with_queue_capacity(1).build()?;
        Pipeline::spawn(config)
    }

    #[test]
    fn test_drop_with_full_queues_returns() -> Result<()> {
        let mut pipeline = backpressured_pipeline()?;
        let input = SINGLE.repeat(BATCH_SIZE * 16);
        fill_to_capacity(&mut pipeline, input.as_bytes())?;
        let payloads = pipeline.payloads();

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            drop(pipeline);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(PayloadQueue::is_closed(&payloads));
        Ok(())
    }

    #[test]
    fn test_finish_after_payloads_closed_reports_queue_closed() -> Result<()> {
        let mut pipeline = backpressured_pipeline()?;
        let input = SINGLE.repeat(BATCH_SIZE * 16);
        fill_to_capacity(&mut pipeline, input.as_bytes())?;
        pipeline.payloads().close();

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = done_tx.send(pipeline.finish());
        });
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)).ok(),
            Some(Err(DecodeError::QueueClosed))
        );
        Ok(())
    }

    #[test]
    fn test_finish_drains_backlog_for_late_consumer() -> Result<()> {
        let mut pipeline = backpressured_pipeline()?;
        let input = SINGLE.repeat(BATCH_SIZE * 16);
        let offset = fill_to_capacity(&mut pipeline, input.as_bytes())?;

        let consumer = collect_types(pipeline.payloads());
        let rest = pipeline.ingest_all(&input.as_bytes()[offset..])?;
        assert_eq!(offset + rest, input.len());
        let snap = pipeline.finish()?;

        assert_eq!(consumer.join().unwrap().len(), BATCH_SIZE * 16);
        assert_eq!(snap.payloads, (BATCH_SIZE * 16) as u64);
        Ok(())
    }

    #[test]
    fn test_worker_failure_stops_pipeline_with_cause() -> Result<()> {
        let config = PipelineConfig::builder()
            .with_queue_capacity(1)
            .with_pool_limit(3)
            .build()?;
        let mut pipeline = Pipeline::spawn(config)?;

        // holds every payload batch so the de-armour pool runs dry
        let payloads = pipeline.payloads();
        let hoarder = thread::spawn(move || {
            let mut held = Vec::new();
            loop {
                match payloads.pop_timeout(Duration::from_millis(50)) {
                    Ok(batch) => held.push(batch),
                    Err(PopError::Closed) => return held.len(),
                    Err(_) => continue,
                }
            }
        });

        let input = SINGLE.repeat(BATCH_SIZE * 16);
        assert!(pipeline.ingest_all(input.as_bytes()).is_err());
        assert_eq!(pipeline.finish(), Err(DecodeError::PoolExhausted(3)));
        assert_eq!(hoarder.join().unwrap(), 3);
        Ok(())
    }

    #[test]
    fn test_stage_fails_on_closed_sink() -> Result<()> {
        let stats = DecodeStats::new();
        let (frag_tx, frag_rx) = stage_queues()?;
        let (msg_tx, msg_rx) = spsc::<Pooled<MessageBatch>>(1)?;
        ingest_bytes(
            SINGLE.as_bytes(),
            &SentenceParser::default(),
            &BufferPool::new(),
            &frag_tx,
            &stats,
        )?;
        drop(msg_rx);

        let result = reassemble_and_validate(
            &frag_rx,
            &msg_tx,
            &mut Reassembler::new(),
            &BufferPool::new(),
            &stats,
            4,
        );
        assert_eq!(result, Err(DecodeError::QueueClosed));

        drop(frag_rx);
        assert_eq!(
            ingest_bytes(
                SINGLE.as_bytes(),
                &SentenceParser::default(),
                &BufferPool::new(),
                &frag_tx,
                &stats,
            ),
            Err(DecodeError::QueueClosed)
        );
        Ok(())
    }
}
