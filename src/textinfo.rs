use crate::{
    bidi::{reorder_segments, segment_with_order, Segment},
    shaper::Direction,
    Tag,
};

/// Where a line of text in a given direction is naturally aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
    Top,
    Bottom,
}

/// Per-input text state: the source text, its bidi mapping tables and its
/// segments in visual order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextInfo {
    text: String,
    should_apply_bidi: bool,
    direction_override: Option<Direction>,
    script_override: Option<Tag>,
    language_override: Option<String>,
    base_level: u8,
    reordered_segments: Vec<Segment>,
    to_bidi: Vec<usize>,
    from_bidi: Vec<usize>,
}

impl TextInfo {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let (segments, base_level, to_bidi) = segment_with_order(&text, None);
        let reordered_segments = reorder_segments(&segments, &to_bidi);
        let mut from_bidi = vec![0; to_bidi.len()];
        for (logical, &visual) in to_bidi.iter().enumerate() {
            from_bidi[visual] = logical;
        }
        TextInfo {
            text,
            should_apply_bidi: true,
            direction_override: None,
            script_override: None,
            language_override: None,
            base_level,
            reordered_segments,
            to_bidi,
            from_bidi,
        }
    }

    /// Switch bidi processing on or off; when off the whole text is one
    /// segment without script or level.
    pub fn with_bidi(mut self, should_apply_bidi: bool) -> Self {
        self.should_apply_bidi = should_apply_bidi;
        self
    }

    pub fn with_direction(mut self, direction: Option<Direction>) -> Self {
        self.direction_override = direction;
        self
    }

    pub fn with_script(mut self, script: Option<Tag>) -> Self {
        self.script_override = script;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language_override = language;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn char_count(&self) -> usize {
        self.to_bidi.len()
    }

    pub fn should_apply_bidi(&self) -> bool {
        self.should_apply_bidi
    }

    pub fn direction_override(&self) -> Option<Direction> {
        self.direction_override
    }

    pub fn script_override(&self) -> Option<Tag> {
        self.script_override
    }

    pub fn language_override(&self) -> Option<&str> {
        self.language_override.as_deref()
    }

    pub fn base_level(&self) -> u8 {
        self.base_level
    }

    /// The segments to shape, in visual order.
    pub fn segments(&self) -> Vec<Segment> {
        if self.should_apply_bidi {
            self.reordered_segments.clone()
        } else {
            vec![Segment {
                run_chars: self.text.clone(),
                script: None,
                bidi_level: None,
                first_cluster: 0,
            }]
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction_override.unwrap_or(if self.base_level % 2 == 1 {
            Direction::Rtl
        } else {
            Direction::Ltr
        })
    }

    pub fn suggested_alignment(&self) -> Alignment {
        match self.direction() {
            Direction::Ltr => Alignment::Left,
            Direction::Rtl => Alignment::Right,
            Direction::Ttb => Alignment::Top,
            Direction::Btt => Alignment::Bottom,
        }
    }

    pub fn to_bidi(&self) -> &[usize] {
        &self.to_bidi
    }

    pub fn from_bidi(&self) -> &[usize] {
        &self.from_bidi
    }

    /// Map logical character indices to display indices. Out of range
    /// indices are dropped.
    pub fn map_to_bidi(&self, indices: impl IntoIterator<Item = usize>) -> Vec<usize> {
        self.map_through(&self.to_bidi, indices)
    }

    /// Map display character indices back to logical indices.
    pub fn map_from_bidi(&self, indices: impl IntoIterator<Item = usize>) -> Vec<usize> {
        self.map_through(&self.from_bidi, indices)
    }

    fn map_through(&self, table: &[usize], indices: impl IntoIterator<Item = usize>) -> Vec<usize> {
        indices
            .into_iter()
            .filter_map(|i| {
                if self.should_apply_bidi {
                    table.get(i).copied()
                } else {
                    (i < table.len()).then_some(i)
                }
            })
            .collect()
    }
}
