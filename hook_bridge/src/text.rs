//! Splits long text into pieces that fit the engine's literal text buffer.
//!
//! Each chunk is sent as its own native call, so a boundary is a call
//! boundary. Boundaries never fall inside an encoded character.

/// UTF-8 byte budget per chunk: a 100-byte native buffer minus its terminator.
pub const MAX_TEXT_CHUNK_BYTES: usize = 99;

/// Iterator over the chunks of a string.
///
/// Text that already fits the budget comes back as a single chunk, including
/// the empty string.
#[derive(Debug, Clone)]
pub struct TextChunks<'a> {
    rest: &'a str,
    budget: usize,
    done: bool,
}

pub fn chunks(text: &str) -> TextChunks<'_> {
    chunks_with_budget(text, MAX_TEXT_CHUNK_BYTES)
}

pub fn chunks_with_budget(text: &str, budget: usize) -> TextChunks<'_> {
    TextChunks {
        rest: text,
        budget,
        done: false,
    }
}

impl<'a> Iterator for TextChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }
        if self.rest.len() <= self.budget {
            self.done = true;
            return Some(self.rest);
        }

        let mut end = 0;
        for (offset, ch) in self.rest.char_indices() {
            let next_end = offset + ch.len_utf8();
            if next_end > self.budget {
                break;
            }
            end = next_end;
        }
        // A budget smaller than the first character still makes progress.
        if end == 0 {
            end = self.rest.chars().next().map_or(0, char::len_utf8);
        }

        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        self.done = rest.is_empty();
        Some(chunk)
    }
}

/// Feeds each chunk of `text` to `action`, stopping at the first error.
pub fn emit_chunked<E>(text: &str, mut action: impl FnMut(&str) -> Result<(), E>) -> Result<(), E> {
    for chunk in chunks(text) {
        action(chunk)?;
    }
    Ok(())
}

const HIGH_SURROGATES: std::ops::RangeInclusive<u16> = 0xD800..=0xDBFF;
const LOW_SURROGATES: std::ops::RangeInclusive<u16> = 0xDC00..=0xDFFF;

/// UTF-8 width of the character starting at `units[pos]` and the number of
/// UTF-16 units it spans. `pos` must be in range.
///
/// An unpaired surrogate, high or low, is counted as zero bytes and one unit.
/// It stays in place in whatever chunk it falls into; no replacement width is
/// assumed for it.
pub(crate) fn utf16_char_width(units: &[u16], pos: usize) -> (usize, usize) {
    let unit = units[pos];
    match unit {
        0x0000..=0x007F => (1, 1),
        0x0080..=0x07FF => (2, 1),
        _ if HIGH_SURROGATES.contains(&unit) => match units.get(pos + 1) {
            Some(next) if LOW_SURROGATES.contains(next) => (4, 2),
            _ => (0, 1),
        },
        _ if LOW_SURROGATES.contains(&unit) => (0, 1),
        _ => (3, 1),
    }
}

/// UTF-8 length of `units` under the UTF-16 chunking widths.
pub fn utf16_encoded_len(units: &[u16]) -> usize {
    let mut pos = 0;
    let mut total = 0;
    while pos < units.len() {
        let (width, span) = utf16_char_width(units, pos);
        total += width;
        pos += span;
    }
    total
}

/// Chunks UTF-16 text, as handed over by script runtimes with UTF-16 strings.
///
/// A surrogate pair is never split.
pub fn chunk_utf16(units: &[u16], budget: usize, mut emit: impl FnMut(&[u16])) {
    if utf16_encoded_len(units) <= budget {
        emit(units);
        return;
    }

    let mut start = 0;
    let mut pos = 0;
    let mut total = 0;
    while pos < units.len() {
        let (width, span) = utf16_char_width(units, pos);
        if total + width > budget && pos > start {
            emit(&units[start..pos]);
            start = pos;
            total = 0;
            continue;
        }
        total += width;
        pos += span;
    }
    if start < units.len() {
        emit(&units[start..]);
    }
}
