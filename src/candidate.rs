//! Produces the stream of hostnames to probe.
//!
//! Lines are read one at a time from an async reader. Lines present in the
//! exact-host exclusion set are dropped before any rate limiting happens;
//! everything else is handed to the worker pool through a bounded channel,
//! so a slow pool holds the producer back.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::exclusion::ExclusionFilter;

/// Capacity of the handoff between the producer and the workers. Tokio
/// channels need at least one slot, so the producer can run one candidate
/// ahead of the pool and no further.
pub const HANDOFF_CAPACITY: usize = 1;

/// A hostname waiting to be probed. Taken verbatim from the input line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate(String);

impl Candidate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for Candidate {
    fn from(host: String) -> Self {
        Self(host)
    }
}

impl From<&str> for Candidate {
    fn from(host: &str) -> Self {
        Self(host.to_owned())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Creates the producer/consumer pair for a [`CandidateStream`].
pub fn handoff() -> (mpsc::Sender<Candidate>, mpsc::Receiver<Candidate>) {
    mpsc::channel(HANDOFF_CAPACITY)
}

/// Single-pass, rate-limited source of [`Candidate`]s.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use pinprobe::candidate::{handoff, CandidateStream};
/// # use pinprobe::exclusion::ExclusionFilter;
/// # async fn run() {
/// let filter = Arc::new(ExclusionFilter::default());
/// let stdin = tokio::io::BufReader::new(tokio::io::stdin());
/// let stream = CandidateStream::new(stdin, filter, Some(Duration::from_millis(100)));
///
/// let (tx, mut rx) = handoff();
/// tokio::spawn(stream.feed(tx));
/// while let Some(candidate) = rx.recv().await {
///     println!("{candidate}");
/// }
/// # }
/// ```
pub struct CandidateStream<R> {
    reader: R,
    filter: Arc<ExclusionFilter>,
    interval: Option<Duration>,
}

impl<R> CandidateStream<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// A zero interval behaves like `None`.
    pub fn new(reader: R, filter: Arc<ExclusionFilter>, interval: Option<Duration>) -> Self {
        Self {
            reader,
            filter,
            interval: interval.filter(|d| !d.is_zero()),
        }
    }

    /// Reads the source to the end, sending every non-excluded line into
    /// `tx`. Returns how many candidates were accepted by the consumer side.
    ///
    /// Candidate `k + 1` is never sent earlier than `interval` after
    /// candidate `k` was accepted. The channel is closed when this returns,
    /// which is how the workers learn the source is exhausted.
    ///
    /// Lines that are not valid UTF-8 are decoded lossily and still handed
    /// out. Only an I/O error ends the stream early; it is logged rather than
    /// returned so in-flight probes still finish.
    pub async fn feed(self, tx: mpsc::Sender<Candidate>) -> usize {
        let Self {
            mut reader,
            filter,
            interval,
        } = self;
        let mut raw = Vec::new();
        let mut not_before: Option<Instant> = None;
        let mut sent = 0;

        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Stopped reading candidates: {e}");
                    break;
                }
            }
            let line = decode_line(&raw);

            if filter.contains_host(&line) {
                debug!("Skipping excluded host {line}");
                continue;
            }

            if let Some(at) = not_before {
                time::sleep_until(at).await;
            }

            if tx.send(Candidate(line)).await.is_err() {
                debug!("All workers are gone, stop producing");
                break;
            }
            sent += 1;

            not_before = interval.map(|interval| Instant::now() + interval);
        }

        debug!("Candidate source exhausted after {sent} candidates");
        sent
    }
}

/// Strips the `\n` or `\r\n` terminator and decodes the rest.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => line.to_owned(),
        Err(e) => {
            let line = String::from_utf8_lossy(raw).into_owned();
            debug!("Line {line:?} is not valid UTF-8: {e}");
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{handoff, Candidate, CandidateStream};
    use crate::exclusion::ExclusionFilter;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    const NO_ENTRIES: [&str; 0] = [];

    async fn collect(
        input: &'static [u8],
        filter: ExclusionFilter,
        interval: Option<Duration>,
    ) -> (Vec<String>, usize) {
        let stream = CandidateStream::new(input, Arc::new(filter), interval);
        let (tx, mut rx) = handoff();
        let producer = tokio::spawn(stream.feed(tx));

        let mut seen = Vec::new();
        while let Some(candidate) = rx.recv().await {
            seen.push(candidate.into_inner());
        }
        (seen, producer.await.unwrap())
    }

    #[tokio::test]
    async fn yields_lines_in_order() {
        let input = b"a.example\nb.example\nc.example\n";
        let (seen, sent) = collect(input, ExclusionFilter::default(), None).await;
        assert_eq!(seen, ["a.example", "b.example", "c.example"]);
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn excluded_hosts_are_never_yielded() {
        let filter = ExclusionFilter::build(["b.example", "C.example"], NO_ENTRIES).unwrap();
        let input = b"a.example\nb.example\nc.example\nb.example\n";
        let (seen, sent) = collect(input, filter, None).await;
        assert_eq!(seen, ["a.example", "c.example"]);
        assert_eq!(sent, 2);
    }

    #[tokio::test]
    async fn duplicates_and_blank_lines_pass_through() {
        let input = b"a.example\n\na.example\r\n";
        let (seen, _) = collect(input, ExclusionFilter::default(), None).await;
        assert_eq!(seen, ["a.example", "", "a.example"]);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_stream() {
        let input = b"a.example\n\xffbad.example\nb.example\nc.example";
        let (seen, sent) = collect(input, ExclusionFilter::default(), None).await;
        assert_eq!(
            seen,
            ["a.example", "\u{fffd}bad.example", "b.example", "c.example"]
        );
        assert_eq!(sent, 4);
    }

    #[tokio::test]
    async fn last_line_without_newline_is_kept() {
        let (seen, _) = collect(b"a.example\r\nb.example", ExclusionFilter::default(), None).await;
        assert_eq!(seen, ["a.example", "b.example"]);
    }

    #[tokio::test]
    async fn empty_source_closes_channel() {
        let (seen, sent) = collect(b"", ExclusionFilter::default(), None).await;
        assert!(seen.is_empty());
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn interval_spaces_out_candidates() {
        let start = Instant::now();
        let (seen, _) = collect(
            b"1.example\n2.example\n3.example\n4.example\n5.example\n",
            ExclusionFilter::default(),
            Some(Duration::from_millis(100)),
        )
        .await;
        assert_eq!(seen.len(), 5);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn excluded_lines_do_not_consume_interval() {
        let filter = ExclusionFilter::build(["x.example"], NO_ENTRIES).unwrap();
        let start = Instant::now();
        let (seen, _) = collect(
            b"x.example\nx.example\nx.example\na.example\n",
            filter,
            Some(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(seen, ["a.example"]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn zero_interval_means_unthrottled() {
        let filter = Arc::new(ExclusionFilter::default());
        let stream = CandidateStream::new(&b""[..], filter, Some(Duration::ZERO));
        assert!(stream.interval.is_none());
    }

    #[tokio::test]
    async fn stops_when_receiver_dropped() {
        let filter = Arc::new(ExclusionFilter::default());
        let stream = CandidateStream::new(&b"a\nb\nc\n"[..], filter, None);
        let (tx, rx) = handoff();
        drop(rx);
        assert_eq!(stream.feed(tx).await, 0);
    }

    #[test]
    fn candidate_displays_verbatim() {
        let candidate = Candidate::from(" spaced.example ");
        assert_eq!(candidate.to_string(), " spaced.example ");
        assert_eq!(candidate.as_str(), " spaced.example ");
    }
}
