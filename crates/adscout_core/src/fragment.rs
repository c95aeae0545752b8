use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Byte range of a recognised fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Locates fragments of interest inside a piece of text.
///
/// Spans are relative to `text`, must not overlap and must be ordered left to
/// right. Spans violating this are dropped by the pipeline.
pub trait FragmentFinder: Send + Sync {
    fn find(&self, text: &str) -> Vec<Span>;
}

/// Rewrites the text of one recognised fragment.
pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Transform that keeps the fragment unchanged.
pub fn identity() -> Transform {
    Arc::new(|fragment: &str| fragment.to_string())
}

/// Transform that replaces every fragment with a fixed string.
pub fn replace_with(replacement: impl Into<String>) -> Transform {
    let replacement = replacement.into();
    Arc::new(move |_: &str| replacement.clone())
}

struct Stage {
    finder: Box<dyn FragmentFinder>,
    transform: Transform,
}

/// Ordered `(finder, transform)` stages with strictly decreasing priority.
///
/// Stage `k` only ever sees the gaps left between the fragments of stages
/// `0..k`, so a higher priority match is never split by a lower one.
#[derive(Default)]
pub struct FragmentPipeline {
    stages: Vec<Stage>,
}

impl FragmentPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, finder: impl FragmentFinder + 'static, transform: Transform) -> Self {
        self.push_stage(finder, transform);
        self
    }

    pub fn push_stage(&mut self, finder: impl FragmentFinder + 'static, transform: Transform) {
        self.stages.push(Stage {
            finder: Box::new(finder),
            transform,
        });
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Lazily partitions `text` into unchanged gaps and rewritten fragments.
    ///
    /// Concatenating the chunks reproduces `text` with only the fragments
    /// replaced. Empty gaps are skipped.
    pub fn chunks<'p, 't>(&'p self, text: &'t str) -> Chunks<'p, 't> {
        let mut chunks = Chunks {
            stages: &self.stages,
            text,
            stack: Vec::new(),
        };
        chunks.push_frame(0, 0, text.len());
        chunks
    }

    pub fn process(&self, text: &str) -> String {
        self.chunks(text).collect()
    }
}

impl fmt::Debug for FragmentPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// One pending region of the input, owned by the stage at `level`.
struct Frame {
    level: usize,
    cursor: usize,
    end: usize,
    spans: std::vec::IntoIter<Span>,
    pending: Option<Span>,
}

/// Iterator returned by [`FragmentPipeline::chunks`].
///
/// Uses an explicit stack instead of recursion: each frame walks the spans of
/// its own stage and pushes the gaps before them one level deeper.
pub struct Chunks<'p, 't> {
    stages: &'p [Stage],
    text: &'t str,
    stack: Vec<Frame>,
}

impl<'p, 't> Chunks<'p, 't> {
    fn push_frame(&mut self, level: usize, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let spans = match self.stages.get(level) {
            Some(stage) => {
                let region = &self.text[start..end];
                valid_spans(stage.finder.find(region), region)
                    .into_iter()
                    .map(|span| Span::new(span.offset + start, span.len))
                    .collect()
            }
            None => Vec::new(),
        };
        self.stack.push(Frame {
            level,
            cursor: start,
            end,
            spans: spans.into_iter(),
            pending: None,
        });
    }
}

impl<'p, 't> Iterator for Chunks<'p, 't> {
    type Item = Cow<'t, str>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = self.text;
        loop {
            let frame = self.stack.last_mut()?;

            if frame.level >= self.stages.len() {
                let (start, end) = (frame.cursor, frame.end);
                self.stack.pop();
                return Some(Cow::Borrowed(&text[start..end]));
            }

            if let Some(span) = frame.pending.take() {
                frame.cursor = span.end();
                let transform = &self.stages[frame.level].transform;
                return Some(Cow::Owned(transform(&text[span.offset..span.end()])));
            }

            let (level, cursor) = (frame.level, frame.cursor);
            match frame.spans.next() {
                Some(span) => {
                    frame.pending = Some(span);
                    self.push_frame(level + 1, cursor, span.offset);
                }
                None => {
                    let end = frame.end;
                    self.stack.pop();
                    self.push_frame(level + 1, cursor, end);
                }
            }
        }
    }
}

fn valid_spans(spans: Vec<Span>, region: &str) -> Vec<Span> {
    let mut last_end = 0;
    let mut kept = Vec::with_capacity(spans.len());
    for span in spans {
        let in_order = span.offset >= last_end && span.len > 0 && span.end() <= region.len();
        if in_order && region.is_char_boundary(span.offset) && region.is_char_boundary(span.end()) {
            last_end = span.end();
            kept.push(span);
        }
    }
    kept
}
