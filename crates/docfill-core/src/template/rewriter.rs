//! Streaming placeholder substitution for WordprocessingML parts.
//!
//! A placeholder such as `{{total_amount}}` is often split over several
//! `<w:t>` runs because of proofing marks or formatting changes. The rewriter
//! buffers the runs of the current paragraph-level container and, once the
//! container ends, joins their text to find placeholders that straddle run
//! boundaries. Placeholders wholly inside a single run are replaced as soon
//! as that run's text element closes.

use std::mem;
use std::ops::Range;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use super::placeholders::{Match, Placeholders};

const WORD_PREFIX: &[u8] = b"w";
const TEXT: &[u8] = b"t";

/// Elements whose start or end closes the window in which runs are joined.
const JOIN_BOUNDARIES: &[&[u8]] = &[
    b"p",
    b"tr",
    b"tc",
    b"hyperlink",
    b"sdtContent",
    b"smartTag",
    b"fldSimple",
    b"txbxContent",
    b"body",
];

/// Output of a successful part rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RewrittenPart {
    pub bytes: Vec<u8>,
    pub replacements: usize,
}

/// Rewrite one XML part, failing on any tokenizer error or truncated input.
pub(crate) fn try_rewrite(
    xml: &[u8],
    placeholders: &Placeholders<'_>,
) -> Result<RewrittenPart, String> {
    let mut reader = Reader::from_reader(xml);
    let mut rewriter = PartRewriter::new(placeholders, xml.len());
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;
        if matches!(event, Event::Eof) {
            break;
        }
        rewriter.feed(event.into_owned())?;
        buf.clear();
    }

    rewriter.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    OutsideRun,
    InsideRun,
    BetweenRunsBufferingForJoin,
}

/// A buffered `<w:t>` element and the tokens following it up to the next run.
#[derive(Debug)]
struct TextRun {
    start: BytesStart<'static>,
    content: Vec<Event<'static>>,
    end: Option<BytesEnd<'static>>,
    trailing: Vec<Event<'static>>,
    text: String,
    /// Byte ranges of `text` holding substituted values, never rescanned.
    protected: Vec<Range<usize>>,
    modified: bool,
}

impl TextRun {
    fn new(start: BytesStart<'static>) -> Self {
        Self {
            start,
            content: Vec::new(),
            end: None,
            trailing: Vec::new(),
            text: String::new(),
            protected: Vec::new(),
            modified: false,
        }
    }

    fn substitute_within(&mut self, placeholders: &Placeholders<'_>) -> usize {
        let mut cursor = 0;
        let mut count = 0;
        while let Some(found) = placeholders.find_at(&self.text, cursor) {
            self.text.replace_range(found.start..found.end, found.value);
            self.protected
                .push(found.start..found.start + found.value.len());
            cursor = found.start + found.value.len();
            count += 1;
        }
        if count > 0 {
            self.modified = true;
        }
        count
    }
}

struct PartRewriter<'p, 'm> {
    placeholders: &'p Placeholders<'m>,
    writer: Writer<Vec<u8>>,
    state: RunState,
    runs: Vec<TextRun>,
    depth: usize,
    /// Elements opened inside the current `<w:t>`.
    run_depth: usize,
    replacements: usize,
}

impl<'p, 'm> PartRewriter<'p, 'm> {
    fn new(placeholders: &'p Placeholders<'m>, capacity: usize) -> Self {
        Self {
            placeholders,
            writer: Writer::new(Vec::with_capacity(capacity)),
            state: RunState::OutsideRun,
            runs: Vec::new(),
            depth: 0,
            run_depth: 0,
            replacements: 0,
        }
    }

    fn feed(&mut self, event: Event<'static>) -> Result<(), String> {
        match &event {
            Event::Start(_) => self.depth += 1,
            Event::End(_) => {
                self.depth = self
                    .depth
                    .checked_sub(1)
                    .ok_or_else(|| "closing tag without a matching start".to_string())?;
            }
            _ => {}
        }

        match self.state {
            RunState::InsideRun => self.feed_inside_run(event),
            RunState::OutsideRun | RunState::BetweenRunsBufferingForJoin => {
                self.feed_outside_run(event)
            }
        }
    }

    fn feed_outside_run(&mut self, event: Event<'static>) -> Result<(), String> {
        match event {
            Event::Start(start) if is_word(start.name(), TEXT) => {
                self.runs.push(TextRun::new(start));
                self.run_depth = 0;
                self.state = RunState::InsideRun;
                Ok(())
            }
            Event::Start(start) if is_boundary(start.name()) => {
                self.flush_runs()?;
                self.emit(Event::Start(start))
            }
            Event::End(end) if is_boundary(end.name()) => {
                self.pass_through(Event::End(end))?;
                self.flush_runs()
            }
            other => self.pass_through(other),
        }
    }

    fn feed_inside_run(&mut self, event: Event<'static>) -> Result<(), String> {
        let placeholders = self.placeholders;
        let Some(run) = self.runs.last_mut() else {
            return Err("text element without an open run".to_string());
        };

        match event {
            Event::End(end) if self.run_depth == 0 && is_word(end.name(), TEXT) => {
                run.end = Some(end);
                self.replacements += run.substitute_within(placeholders);
                self.state = RunState::BetweenRunsBufferingForJoin;
            }
            Event::Text(text) => {
                let decoded = text.unescape().map_err(|e| e.to_string())?;
                run.text.push_str(&decoded);
                run.content.push(Event::Text(text));
            }
            Event::CData(cdata) => {
                run.text.push_str(&String::from_utf8_lossy(&cdata));
                run.content.push(Event::CData(cdata));
            }
            other => {
                match &other {
                    Event::Start(_) => self.run_depth += 1,
                    Event::End(_) => self.run_depth = self.run_depth.saturating_sub(1),
                    _ => {}
                }
                run.content.push(other);
            }
        }
        Ok(())
    }

    /// Route a token that is not part of any run's text.
    fn pass_through(&mut self, event: Event<'static>) -> Result<(), String> {
        if self.state == RunState::BetweenRunsBufferingForJoin
            && let Some(run) = self.runs.last_mut()
        {
            run.trailing.push(event);
            return Ok(());
        }
        self.emit(event)
    }

    fn flush_runs(&mut self) -> Result<(), String> {
        self.state = RunState::OutsideRun;
        let mut runs = mem::take(&mut self.runs);
        if runs.is_empty() {
            return Ok(());
        }

        self.replacements += join_across_runs(&mut runs, self.placeholders);
        runs.into_iter().try_for_each(|run| self.emit_run(run))
    }

    fn emit_run(&mut self, run: TextRun) -> Result<(), String> {
        if run.modified {
            self.emit_text(&run.start, &run.text)?;
        } else {
            self.emit(Event::Start(run.start))?;
            for event in run.content {
                self.emit(event)?;
            }
        }
        if let Some(end) = run.end {
            self.emit(Event::End(end))?;
        }
        run.trailing
            .into_iter()
            .try_for_each(|event| self.emit(event))
    }

    /// Write substituted text, turning each `\n` into a `<w:br/>` between
    /// text elements of the same run. The caller closes the last element.
    fn emit_text(&mut self, start: &BytesStart<'static>, text: &str) -> Result<(), String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let line_break = match start.name().prefix() {
            Some(prefix) => format!("{}:br", String::from_utf8_lossy(prefix.as_ref())),
            None => "br".to_string(),
        };

        for (idx, fragment) in text.split('\n').enumerate() {
            if idx == 0 {
                let first = if needs_preserve(fragment) {
                    with_preserve(start)
                } else {
                    start.clone()
                };
                self.emit(Event::Start(first))?;
            } else {
                self.emit(Event::End(BytesEnd::new(name.clone())))?;
                self.emit(Event::Empty(BytesStart::new(line_break.clone())))?;
                self.emit(Event::Start(with_preserve(&BytesStart::new(name.clone()))))?;
            }
            if !fragment.is_empty() {
                self.emit(Event::Text(BytesText::new(fragment)))?;
            }
        }
        Ok(())
    }

    fn emit(&mut self, event: Event<'_>) -> Result<(), String> {
        self.writer.write_event(event).map_err(|e| e.to_string())
    }

    fn finish(mut self) -> Result<RewrittenPart, String> {
        if self.depth != 0 {
            return Err(format!(
                "unexpected end of input with {} element(s) still open",
                self.depth
            ));
        }
        self.flush_runs()?;
        Ok(RewrittenPart {
            bytes: self.writer.into_inner(),
            replacements: self.replacements,
        })
    }
}

/// Replace placeholders spanning several runs.
///
/// The first run touched by a match keeps its text before the match plus the
/// value, runs wholly inside the match are blanked and the last run keeps its
/// text after the match. Substituted values are never rescanned.
fn join_across_runs(runs: &mut [TextRun], placeholders: &Placeholders<'_>) -> usize {
    if runs.len() < 2 {
        return 0;
    }

    let mut replaced = 0;
    let mut cursor = 0;
    loop {
        let joined: String = runs.iter().map(|run| run.text.as_str()).collect();
        let offsets = run_offsets(runs);
        let Some(found) = next_unprotected(&joined, cursor, runs, &offsets, placeholders) else {
            break;
        };
        let Some(first) = locate(runs, &offsets, |base, len| {
            (base..base + len).contains(&found.start)
        }) else {
            break;
        };
        let Some(last) = locate(runs, &offsets, |base, len| {
            base < found.end && found.end <= base + len
        }) else {
            break;
        };
        let start = found.start - offsets[first];
        let end = found.end - offsets[last];

        splice(runs, first, start, last, end, found.value);
        replaced += 1;
        cursor = found.start + found.value.len();
    }
    replaced
}

fn run_offsets(runs: &[TextRun]) -> Vec<usize> {
    runs.iter()
        .scan(0, |offset, run| {
            let base = *offset;
            *offset += run.text.len();
            Some(base)
        })
        .collect()
}

fn next_unprotected<'m>(
    joined: &str,
    cursor: usize,
    runs: &[TextRun],
    offsets: &[usize],
    placeholders: &Placeholders<'m>,
) -> Option<Match<'m>> {
    let mut from = cursor;
    while let Some(found) = placeholders.find_at(joined, from) {
        let overlaps = runs.iter().zip(offsets).any(|(run, &base)| {
            run.protected
                .iter()
                .any(|range| base + range.start < found.end && found.start < base + range.end)
        });
        if !overlaps {
            return Some(found);
        }
        // placeholders start with an ASCII brace, so this stays on a char boundary
        from = found.start + 1;
    }
    None
}

/// Index of the first non-empty run whose `(base, len)` satisfies `hit`.
fn locate(
    runs: &[TextRun],
    offsets: &[usize],
    hit: impl Fn(usize, usize) -> bool,
) -> Option<usize> {
    runs.iter()
        .zip(offsets)
        .position(|(run, &base)| !run.text.is_empty() && hit(base, run.text.len()))
}

fn splice(runs: &mut [TextRun], first: usize, start: usize, last: usize, end: usize, value: &str) {
    if first == last {
        let run = &mut runs[first];
        let removed = end - start;
        run.text.replace_range(start..end, value);
        for range in &mut run.protected {
            if range.start >= end {
                *range = range.start - removed + value.len()..range.end - removed + value.len();
            }
        }
        run.protected.push(start..start + value.len());
        run.modified = true;
        return;
    }

    let head = &mut runs[first];
    head.text.truncate(start);
    head.protected.retain(|range| range.end <= start);
    head.text.push_str(value);
    head.protected.push(start..start + value.len());
    head.modified = true;

    for run in &mut runs[first + 1..last] {
        run.text.clear();
        run.protected.clear();
        run.modified = true;
    }

    let tail = &mut runs[last];
    tail.text.drain(..end);
    tail.protected = tail
        .protected
        .iter()
        .filter(|range| range.start >= end)
        .map(|range| range.start - end..range.end - end)
        .collect();
    tail.modified = true;
}

fn is_word(name: QName<'_>, local: &[u8]) -> bool {
    name.local_name().as_ref() == local
        && name.prefix().is_none_or(|prefix| prefix.as_ref() == WORD_PREFIX)
}

fn is_boundary(name: QName<'_>) -> bool {
    JOIN_BOUNDARIES.iter().any(|local| is_word(name, local))
}

fn needs_preserve(fragment: &str) -> bool {
    fragment.starts_with(char::is_whitespace) || fragment.ends_with(char::is_whitespace)
}

fn with_preserve(start: &BytesStart<'static>) -> BytesStart<'static> {
    let mut start = start.clone();
    let declared = start
        .attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == b"xml:space");
    if !declared {
        start.push_attribute(("xml:space", "preserve"));
    }
    start
}
