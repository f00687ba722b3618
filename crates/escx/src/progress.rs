// AI
//! 📊 progress.rs — "Are we there yet?" — every index copy, every time, forever.
//!
//! 🚀 Answers the two questions every long copy provokes: "how fast are
//! documents moving?" and "who is the bottleneck?" The second one is the
//! interesting one — `mark_blocked` times every send into the document
//! channel, so when downstream bulk writers can't keep up, the average send
//! time climbs and points a finger.
//!
//! ⚠️  Watching the progress bar will not make the copy faster. We've tried.
//! Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{presets::NOTHING, Cell, CellAlignment, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};

/// 📏 Bytes in the International Electrotechnical Commission format —
/// multiples of 1024, suffixed Ki/Mi/Gi and friends.
/// Because "20971520 bytes" in a log line is a war crime.
pub fn iec_format(num_in: u64) -> String {
    let mut num = num_in as f64;
    for unit in ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"] {
        if num < 1024.0 {
            return format!("{num:3.1}{unit}B");
        }
        num /= 1024.0;
    }
    format!("{num:.1}YiB")
}

/// 🔢 Commas for the three people in the audience who like readability.
/// "1000000 docs" → "1,000,000 docs" — you're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS when the copy has become a lifestyle.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        // -- 🔄 long haul. order pizza. plural.
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📡 A snapshot of throughput at one moment.
struct Rates {
    /// 🚀 docs per second over the sliding window (the twitchy metric)
    docs_per_sec: f64,
    /// 📊 docs per second since the beginning of time (the honest metric)
    overall_docs_per_sec: f64,
}

/// 📊 The brains behind the progress display.
///
/// Tracks documents scrolled, time spent blocked handing docs downstream, and
/// a 5-second sliding window so rate spikes don't read like a seismograph.
///
/// 🧠 Knowledge graph:
/// - Owned by the scroll reader, shared with its fan-out task behind one
///   mutex — every mutation AND every render goes through that lock.
/// - `mark_scrolled` fires once per page; `mark_blocked` once per doc send.
/// - `blocked_total / blocked_count` is the backpressure gauge: high average
///   send time means the bulk writers are the slow half of the pipeline.
///
/// # Ancient Proverb
/// "He who copies an index without a progress bar, copies alone and in darkness."
pub struct ProgressMetrics {
    /// 🏷️ what are we even copying? shown in the UI
    source_name: String,
    /// 📏 total docs expected — straight from `hits.total`
    expected_docs: u64,
    /// 📄 docs scrolled so far, relentlessly accumulating like technical debt
    scrolled: u64,
    /// ⏳ cumulative time spent blocked sending into the doc channel
    blocked_total: Duration,
    /// 🔢 number of sends measured (divisor for the average)
    blocked_count: u64,
    /// 🎨 the actual terminal bar (indicatif does the heavy lifting)
    progress_bar: ProgressBar,
    /// 🔄 sliding window of (timestamp, docs) samples for the current rate
    rate_samples: VecDeque<(Instant, u64)>,
    /// ⏱️ when this whole adventure started
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug. We work around her.
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("expected_docs", &self.expected_docs)
            .field("scrolled", &self.scrolled)
            .field("blocked_count", &self.blocked_count)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 Spin up fresh metrics for one scroll.
    ///
    /// `expected_docs` comes from the initial response's `hits.total` — the
    /// one number the engine volunteers up front.
    pub fn new(source_name: String, expected_docs: u64) -> Self {
        let progress_bar = ProgressBar::new(expected_docs);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n| [{bar:40.cyan/blue}]")
                // -- 🐛 safe unwrap: template string is hardcoded and valid, I checked, twice
                .unwrap()
                .progress_chars("=>-"),
        );

        let start_time = Instant::now();

        // -- 🔄 seed the window with t=0 so we never divide by zero like animals
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            source_name,
            expected_docs,
            scrolled: 0,
            blocked_total: Duration::ZERO,
            blocked_count: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 A page of `n` docs came off the scroll. Accumulate, re-rate, re-render.
    pub fn mark_scrolled(&mut self, n: u64) {
        self.scrolled += n;
        let rates = self.calculate_rates();
        self.render(rates);
        self.progress_bar.set_position(self.scrolled);
    }

    /// ⏳ One send into the doc channel took this long. Feeds the
    /// backpressure gauge — the single most diagnostic number in the table.
    pub fn mark_blocked(&mut self, blocked: Duration) {
        self.blocked_count += 1;
        self.blocked_total += blocked;
    }

    /// ✅ Ring the bell. We made it. (Or we got cancelled. Same bell.)
    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 📈 Current + overall throughput, via a 5-second sliding window.
    fn calculate_rates(&mut self) -> Rates {
        let now = Instant::now();
        // 🔄 evict samples older than 5 seconds — a bouncer for data points
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.scrolled));

        let overall_elapsed = now.duration_since(self.start_time).as_secs_f64();
        let overall = if overall_elapsed > 0.0 {
            self.scrolled as f64 / overall_elapsed
        } else {
            0.0
        };

        if let Some(&(oldest_time, oldest_docs)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return Rates {
                    docs_per_sec: self.scrolled.saturating_sub(oldest_docs) as f64 / elapsed,
                    overall_docs_per_sec: overall,
                };
            }
        }

        // -- 💤 not enough elapsed time yet — zeros, composure maintained
        Rates { docs_per_sec: 0.0, overall_docs_per_sec: overall }
    }

    /// 🎨 Render the stats block onto the bar's message area.
    ///
    /// ```text
    /// | source: <name>
    /// | [=====>----------]
    ///   <docs/s now>      <docs/s overall>
    ///   <scrolled>        <expected>
    ///   <avg send block>  <elapsed>
    /// ```
    ///
    /// If you're reading this comment at 3am during an incident: the number
    /// you want is "avg send block". If it's big, the writers are drowning.
    fn render(&self, rates: Rates) {
        let avg_blocked = self.blocked_total / u32::try_from(self.blocked_count.max(1)).unwrap_or(u32::MAX);

        let mut table = Table::new();
        // -- NOTHING preset because the borders looked bad. we checked.
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new(format!("{} docs/s now", format_number(rates.docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} docs/s overall",
                format_number(rates.overall_docs_per_sec as u64)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} scrolled", format_number(self.scrolled)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} expected", format_number(self.expected_docs)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{avg_blocked:?} avg send block")).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}
