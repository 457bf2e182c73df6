use crate::error::IngestError;
use crate::models::PipelineOptions;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl From<&PipelineOptions> for ChunkingConfig {
    fn from(value: &PipelineOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.chunk_size, self.overlap)
    }
}

/// Cleans extracted or OCR text while keeping its line structure.
pub fn normalize_text(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for raw_line in text.lines() {
        let cleaned: String = raw_line
            .chars()
            .filter(|c| *c != '\u{ad}')
            .map(|c| {
                if c.is_control() || c.is_whitespace() {
                    ' '
                } else {
                    c
                }
            })
            .collect();
        let line = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        if line.is_empty() && lines.last().map_or(true, |last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }

    while lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Splits text into overlapping windows of whole lines.
///
/// Lines are accumulated greedily; a window closes when the next line would
/// bring it to `chunk_size` characters or more. A single line longer than
/// `chunk_size` is kept whole. Every window after the first is prefixed with
/// the last `overlap` characters of its predecessor.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut windows: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in text.lines().filter(|line| !line.trim().is_empty()) {
        let paragraph_len = paragraph.chars().count();

        if current_len + paragraph_len >= chunk_size && !current.trim().is_empty() {
            windows.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }

        current.push_str(paragraph);
        current.push('\n');
        current_len += paragraph_len + 1;
    }

    if !current.trim().is_empty() {
        windows.push(current.trim_end().to_string());
    }

    let mut chunks = Vec::with_capacity(windows.len());
    for (index, window) in windows.iter().enumerate() {
        if index == 0 || overlap == 0 {
            chunks.push(window.clone());
            continue;
        }

        let mut chunk = tail_chars(&windows[index - 1], overlap).to_string();
        chunk.push_str(window);
        chunks.push(chunk);
    }

    chunks
}

pub fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }

    match text.char_indices().rev().nth(count - 1) {
        Some((offset, _)) => &text[offset..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_overlap(chunks: &[String], overlap: usize) -> Vec<String> {
        let mut bodies = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if index == 0 {
                bodies.push(chunk.clone());
                continue;
            }
            let previous_body = &bodies[index - 1];
            let prefix = tail_chars(previous_body, overlap);
            assert!(chunk.starts_with(prefix));
            bodies.push(chunk[prefix.len()..].to_string());
        }
        bodies
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1_000, 100).is_empty());
        assert!(chunk_text("\n\n   \n", 1_000, 100).is_empty());
    }

    #[test]
    fn repeated_short_lines_overlap_with_predecessor() {
        let text = "A\nB\n".repeat(500);
        let chunks = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);

        assert!(chunks.len() > 1);
        let bodies = strip_overlap(&chunks, DEFAULT_CHUNK_OVERLAP);
        for index in 1..chunks.len() {
            let expected = tail_chars(&bodies[index - 1], DEFAULT_CHUNK_OVERLAP);
            assert_eq!(expected.chars().count(), DEFAULT_CHUNK_OVERLAP);
            assert!(chunks[index].starts_with(expected));
        }
    }

    #[test]
    fn stripped_chunks_rebuild_the_paragraphs() {
        let paragraphs: Vec<String> = (0..60)
            .map(|i| format!("Paragraph {i} {}", "word ".repeat(i % 17 + 1).trim_end()))
            .collect();
        let text = paragraphs.join("\n\n");

        let chunks = chunk_text(&text, 200, 30);
        let rebuilt = strip_overlap(&chunks, 30).join("\n");

        assert_eq!(rebuilt, paragraphs.join("\n"));
    }

    #[test]
    fn long_paragraph_is_never_split() {
        let long = "x".repeat(2_500);
        let text = format!("{long}\nshort tail");
        let chunks = chunk_text(&text, 1_000, 100);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], long);
        assert_eq!(chunks[1], format!("{}short tail", "x".repeat(100)));
    }

    #[test]
    fn unoverlapped_part_is_never_empty() {
        let text = "alpha beta gamma\n".repeat(300);
        let chunks = chunk_text(&text, 120, 40);
        for body in strip_overlap(&chunks, 40) {
            assert!(!body.trim().is_empty());
        }
    }

    #[test]
    fn overlap_counts_characters_not_bytes() {
        let text = format!("{}\n{}", "é".repeat(30), "ü".repeat(30));
        let chunks = chunk_text(&text, 40, 5);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("ééééé"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = "  Pump\u{a0}\u{a0}pressure\t rating \r\n\r\n\r\n\u{c}Section 2  \n\nhy\u{ad}draulic\n\n";
        let once = normalize_text(raw);
        assert_eq!(once, "Pump pressure rating\n\nSection 2\n\nhydraulic");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = ChunkingConfig {
            chunk_size: 0,
            overlap: 10,
        };
        assert!(config.validate().is_err());
        assert!(ChunkingConfig::default().validate().is_ok());
    }
}
