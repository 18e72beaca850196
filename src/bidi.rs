//! Bidi resolution, script detection and segmentation of input text into
//! runs that can be shaped independently.
//!
//! All indices in this module count `char`s, not bytes.

use unicode_bidi::{BidiInfo, Level};
use unicode_properties::{GeneralCategory, UnicodeGeneralCategory};
use unicode_script::{Script, UnicodeScript};

use crate::{shaper::Direction, tag_from_str, Tag};

/// The script assigned to characters whose script cannot be resolved.
pub fn unresolved_script() -> Tag {
    Tag::new(b"Zxxx")
}

/// A run of characters sharing a script and a bidi level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The characters of the run, in logical order.
    pub run_chars: String,
    /// ISO 15924 script tag, absent when bidi/script analysis was skipped.
    pub script: Option<Tag>,
    /// Bidi embedding level, absent when bidi analysis was skipped.
    pub bidi_level: Option<u8>,
    /// Index of the logically first character of the run in the source text.
    pub first_cluster: usize,
}

impl Segment {
    pub fn char_count(&self) -> usize {
        self.run_chars.chars().count()
    }

    /// The run as it appears on screen: reversed for odd levels.
    pub fn display_chars(&self) -> String {
        if self.bidi_level.is_some_and(|level| level % 2 == 1) {
            self.run_chars.chars().rev().collect()
        } else {
            self.run_chars.clone()
        }
    }
}

/// The outcome of running the bidi algorithm over a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidiResult {
    /// The text in visual order.
    pub display: String,
    /// Lengths of the runs of equal embedding level, in visual order.
    pub run_lengths: Vec<usize>,
    /// The paragraph embedding level: 0 for LTR, 1 for RTL.
    pub base_level: u8,
    /// `to_bidi[logical] == visual`
    pub to_bidi: Vec<usize>,
    /// `from_bidi[visual] == logical`
    pub from_bidi: Vec<usize>,
}

impl BidiResult {
    pub fn base_dir(&self) -> Direction {
        if self.base_level % 2 == 1 {
            Direction::Rtl
        } else {
            Direction::Ltr
        }
    }
}

fn is_unknown_script(script: Script) -> bool {
    matches!(script, Script::Inherited | Script::Common | Script::Unknown)
}

/// Resolve a script for every character of `text`.
///
/// Characters without a script of their own take the script of the preceding
/// character, except closing punctuation which takes the script of the
/// following one. Leading unknowns take the first following script.
pub fn detect_script(text: &str) -> Vec<Tag> {
    let chars: Vec<char> = text.chars().collect();
    let mut resolved: Vec<Option<Tag>> = Vec::with_capacity(chars.len());
    for (i, ch) in chars.iter().enumerate() {
        let script = ch.script();
        let tag = if is_unknown_script(script) {
            if ch.general_category() == GeneralCategory::ClosePunctuation || i == 0 {
                None
            } else {
                resolved[i - 1]
            }
        } else {
            tag_from_str(script.short_name())
        };
        resolved.push(tag);
    }

    let mut next: Option<Tag> = None;
    for slot in resolved.iter_mut().rev() {
        match slot {
            Some(tag) => next = Some(*tag),
            None => *slot = next,
        }
    }

    let mut scripts: Vec<Tag> = resolved
        .into_iter()
        .map(|tag| tag.unwrap_or_else(unresolved_script))
        .collect();
    fold_kana(&mut scripts);
    scripts
}

/// Hiragana and Katakana runs take whichever of the two dominates the run.
fn fold_kana(scripts: &mut [Tag]) {
    let hira = Tag::new(b"Hira");
    let kana = Tag::new(b"Kana");
    let mut i = 0;
    while i < scripts.len() {
        if scripts[i] != hira && scripts[i] != kana {
            i += 1;
            continue;
        }
        let start = i;
        while i < scripts.len() && (scripts[i] == hira || scripts[i] == kana) {
            i += 1;
        }
        let run = &mut scripts[start..i];
        let hira_count = run.iter().filter(|&&s| s == hira).count();
        let kana_count = run.len() - hira_count;
        let dominant = match hira_count.cmp(&kana_count) {
            std::cmp::Ordering::Greater => hira,
            std::cmp::Ordering::Less => kana,
            std::cmp::Ordering::Equal => run[0],
        };
        run.iter_mut().for_each(|s| *s = dominant);
    }
}

/// Per-character levels and visual order of a string.
struct Resolved {
    chars: Vec<char>,
    levels: Vec<u8>,
    base_level: u8,
    from_bidi: Vec<usize>,
}

fn resolve(text: &str, base_level: Option<u8>) -> Resolved {
    let chars: Vec<char> = text.chars().collect();
    let default_level = base_level.map(|l| if l % 2 == 1 { Level::rtl() } else { Level::ltr() });
    let info = BidiInfo::new(text, default_level);
    let mut levels: Vec<u8> = Vec::with_capacity(chars.len());
    let mut from_bidi: Vec<usize> = Vec::with_capacity(chars.len());
    for para in &info.paragraphs {
        // Byte-indexed over the whole text; only this paragraph's slice is reordered
        let line_levels = info.reordered_levels(para, para.range.clone());
        let para_levels: Vec<Level> = text[para.range.clone()]
            .char_indices()
            .map(|(i, _)| line_levels[para.range.start + i])
            .collect();
        let offset = levels.len();
        from_bidi.extend(
            BidiInfo::reorder_visual(&para_levels)
                .into_iter()
                .map(|logical| logical + offset),
        );
        levels.extend(para_levels.iter().map(|l| l.number()));
    }
    let base_level = info
        .paragraphs
        .first()
        .map(|p| p.level.number())
        .or(base_level)
        .unwrap_or(0);
    Resolved {
        chars,
        levels,
        base_level,
        from_bidi,
    }
}

fn invert(from_bidi: &[usize]) -> Vec<usize> {
    let mut to_bidi = vec![0; from_bidi.len()];
    for (visual, &logical) in from_bidi.iter().enumerate() {
        to_bidi[logical] = visual;
    }
    to_bidi
}

/// Run the Unicode bidi algorithm, detecting the paragraph direction.
pub fn apply_bidi(text: &str) -> BidiResult {
    apply_bidi_with_base(text, None)
}

/// Run the Unicode bidi algorithm with an optional forced paragraph level.
pub fn apply_bidi_with_base(text: &str, base_level: Option<u8>) -> BidiResult {
    let resolved = resolve(text, base_level);
    let display = resolved
        .from_bidi
        .iter()
        .map(|&logical| resolved.chars[logical])
        .collect();
    let mut run_lengths: Vec<usize> = vec![];
    let mut previous: Option<u8> = None;
    for &logical in &resolved.from_bidi {
        let level = resolved.levels[logical];
        match run_lengths.last_mut() {
            Some(len) if previous == Some(level) => *len += 1,
            _ => run_lengths.push(1),
        }
        previous = Some(level);
    }
    BidiResult {
        display,
        run_lengths,
        base_level: resolved.base_level,
        to_bidi: invert(&resolved.from_bidi),
        from_bidi: resolved.from_bidi,
    }
}

/// Split `text` into runs of equal script and bidi level, in logical order.
/// Returns the runs and the paragraph embedding level.
pub fn segment(text: &str) -> (Vec<Segment>, u8) {
    let (segments, base_level, _) = segment_with_order(text, None);
    (segments, base_level)
}

/// Like [`segment`], but also returns the visual order mapping
/// (`to_bidi[logical] == visual`).
pub(crate) fn segment_with_order(
    text: &str,
    base_level: Option<u8>,
) -> (Vec<Segment>, u8, Vec<usize>) {
    let scripts = detect_script(text);
    let resolved = resolve(text, base_level);
    let mut segments: Vec<Segment> = vec![];
    for (index, ((ch, script), level)) in resolved
        .chars
        .iter()
        .zip(scripts.iter())
        .zip(resolved.levels.iter())
        .enumerate()
    {
        match segments.last_mut() {
            Some(seg) if seg.script == Some(*script) && seg.bidi_level == Some(*level) => {
                seg.run_chars.push(*ch)
            }
            _ => segments.push(Segment {
                run_chars: ch.to_string(),
                script: Some(*script),
                bidi_level: Some(*level),
                first_cluster: index,
            }),
        }
    }
    (segments, resolved.base_level, invert(&resolved.from_bidi))
}

/// Put logically ordered segments into visual order.
///
/// Characters sharing one embedding level stay contiguous after reordering,
/// so each segment is placed by the visual position of its characters.
pub fn reorder_segments(segments: &[Segment], to_bidi: &[usize]) -> Vec<Segment> {
    let mut keyed: Vec<(usize, &Segment)> = segments
        .iter()
        .map(|seg| {
            let end = seg.first_cluster + seg.char_count();
            let visual = to_bidi
                .get(seg.first_cluster..end)
                .and_then(|positions| positions.iter().min().copied())
                .unwrap_or(seg.first_cluster);
            (visual, seg)
        })
        .collect();
    keyed.sort_by_key(|(visual, _)| *visual);
    keyed.into_iter().map(|(_, seg)| seg.clone()).collect()
}
