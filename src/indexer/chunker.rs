#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
}

// 段落・改行・中英文の句讀點の順に区切りを探す
const BREAKS: [&str; 11] = ["\n\n", "\n", "。", "？", "！", "；", ". ", "? ", "! ", "，", " "];

/// Splits `text` into chunks of at most `max_chars` characters, preferring
/// paragraph and sentence breaks. Consecutive chunks share up to `overlap`
/// characters.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<TextChunk> {
    let text = text.trim();
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    // byte offset of every char boundary, including the end
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;

    if total <= max_chars {
        return vec![TextChunk {
            text: text.to_string(),
            chunk_index: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + max_chars).min(total);
        let actual_end = if end < total {
            find_break_point(text, &bounds, start, end)
        } else {
            end
        };

        let piece = text[bounds[start]..bounds[actual_end]].trim();
        if !piece.is_empty() {
            chunks.push(TextChunk {
                text: piece.to_string(),
                chunk_index: chunks.len(),
            });
        }

        if actual_end >= total {
            break;
        }
        let next_start = actual_end.saturating_sub(overlap);
        start = if next_start <= start { actual_end } else { next_start };
    }

    chunks
}

/// Char index just past the last break in `[start, max_end)`, or `max_end`.
fn find_break_point(text: &str, bounds: &[usize], start: usize, max_end: usize) -> usize {
    let seg_start = bounds[start];
    let segment = &text[seg_start..bounds[max_end]];

    for sentinel in BREAKS {
        if let Some(pos) = segment.rfind(sentinel) {
            let byte = seg_start + pos + sentinel.len();
            if let Ok(idx) = bounds.binary_search(&byte) {
                if idx > start {
                    return idx;
                }
            }
        }
    }
    max_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_text_breaks_on_sentences() {
        let text = "空腹血糖偏高可能代表胰島素阻抗。建議控制精緻澱粉攝取並規律運動。若持續偏高應至新陳代謝科追蹤。";
        let chunks = chunk_text(text, 20, 0);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 20);
            assert!(chunk.text.ends_with('。'));
        }
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn overlap_repeats_tail() {
        let text = "abcdefghij".repeat(5);
        let chunks = chunk_text(&text, 20, 5);
        assert_eq!(chunks[0].text, &text[..20]);
        assert_eq!(chunks[1].text, &text[15..35]);
        assert_eq!(chunks.last().unwrap().text.chars().last(), Some('j'));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn mixed_text_respects_char_limit() {
        let text = "LDL-C 160 mg/dL 屬於偏高範圍，建議減少飽和脂肪。HbA1c 6.1% 為糖尿病前期。";
        for chunk in chunk_text(text, 15, 3) {
            assert!(!chunk.text.is_empty());
            assert!(chunk.text.chars().count() <= 15);
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("  short  ", 100, 10);
        assert_eq!(
            chunks,
            vec![TextChunk {
                text: "short".into(),
                chunk_index: 0
            }]
        );
    }

    #[test]
    fn empty_text() {
        assert!(chunk_text("", 100, 10).is_empty());
        assert!(chunk_text("   ", 100, 10).is_empty());
    }
}
