use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const ARCHIVE_EXTENSION: &str = "cbz";

const MIN_NUMBER_WIDTH: usize = 3;

static LABELED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:chapter|chap|ch)[\s._/\-]*(\d+)(?:[._\-](\d+))?").expect("valid regex")
});

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:[._\-](\d+))?").expect("valid regex"));

static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^ch(\d+)(?:\.(\d+))?\.cbz$").expect("valid regex")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChapterKeyError {
    #[error("no chapter number in {0:?}")]
    NoNumber(String),
    #[error("chapter number out of range in {0:?}")]
    Overflow(String),
}

/// Normalized chapter identifier, rendered as `ch<NNN>` or `ch<NNN>.<frac>`.
///
/// The integer part is zero-padded to at least three digits. Trailing zeros
/// of the fractional part are trimmed and an all-zero fraction is dropped, so
/// `5.50` is `ch005.5` and `5.0` is `ch005`. Ordering is numeric on the
/// integer part, then on the decimal value of the fraction (trimmed digit
/// strings compare lexicographically in value order). This agrees with string
/// order of the rendered keys for every chapter below 1000.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChapterKey {
    number: u64,
    fraction: Option<String>,
}

impl ChapterKey {
    pub fn new(number: u64, fraction: Option<&str>) -> Self {
        let fraction = fraction
            .map(|frac| frac.trim_end_matches('0'))
            .filter(|frac| !frac.is_empty())
            .map(str::to_owned);
        Self { number, fraction }
    }

    /// Parses a raw, site-specific token (URL slug, file name, link text).
    pub fn normalize(raw: &str) -> Result<Self, ChapterKeyError> {
        let captures = LABELED_NUMBER
            .captures(raw)
            .or_else(|| FIRST_NUMBER.captures(raw))
            .ok_or_else(|| ChapterKeyError::NoNumber(raw.to_owned()))?;

        let number = captures[1]
            .parse::<u64>()
            .map_err(|_| ChapterKeyError::Overflow(raw.to_owned()))?;
        let fraction = captures.get(2).map(|m| m.as_str());
        Ok(Self::new(number, fraction))
    }

    /// Parses an archive file name produced by this crate (or a legacy
    /// unpadded one such as `ch5.cbz`). Anything else yields `None`.
    pub fn from_archive_name(file_name: &str) -> Option<Self> {
        let captures = ARCHIVE_NAME.captures(file_name)?;
        let number = captures[1].parse::<u64>().ok()?;
        Some(Self::new(number, captures.get(2).map(|m| m.as_str())))
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn archive_name(&self) -> String {
        format!("{self}.{ARCHIVE_EXTENSION}")
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{:0width$}", self.number, width = MIN_NUMBER_WIDTH)?;
        if let Some(fraction) = &self.fraction {
            write!(f, ".{fraction}")?;
        }
        Ok(())
    }
}

impl Serialize for ChapterKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterEntry {
    pub key: ChapterKey,
    pub url: String,
}

/// Pads a 1-based page position into the archive entry name (`001.jpg`).
pub fn page_file_name(position: usize) -> String {
    format!("{position:0width$}.jpg", width = MIN_NUMBER_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> String {
        ChapterKey::normalize(raw).unwrap().to_string()
    }

    #[test]
    fn pads_integer_part_to_three_digits() {
        for n in [0_u64, 1, 9, 10, 99, 100, 999] {
            let rendered = key(&format!("chapter-{n}"));
            assert_eq!(rendered, format!("ch{n:03}"));
            assert_eq!(rendered.len(), 5, "rendered={rendered}");
        }
    }

    #[test]
    fn does_not_truncate_large_numbers() {
        assert_eq!(key("chapter-1000"), "ch1000");
        assert_eq!(key("chapter-12345"), "ch12345");
    }

    #[test]
    fn unifies_fraction_separators() {
        assert_eq!(key("43.5"), "ch043.5");
        assert_eq!(key("chapter/54-4"), "ch054.4");
        assert_eq!(key("chapter_10_25"), "ch010.25");
    }

    #[test]
    fn drops_zero_fraction() {
        assert_eq!(key("chapter 5.0"), "ch005");
        assert_eq!(key("5.00"), "ch005");
        assert_eq!(
            ChapterKey::normalize("5.0").unwrap(),
            ChapterKey::normalize("5").unwrap()
        );
    }

    #[test]
    fn trims_trailing_fraction_zeros() {
        assert_eq!(key("5.50"), "ch005.5");
        assert_eq!(key("chapter_10_250"), "ch010.25");
        assert_eq!(key("5.05"), "ch005.05");
        assert_eq!(
            ChapterKey::normalize("5.50").unwrap(),
            ChapterKey::normalize("5.5").unwrap()
        );
        assert_eq!(
            ChapterKey::from_archive_name("ch005.5.cbz"),
            Some(ChapterKey::normalize("chapter-5.50").unwrap())
        );
        assert_eq!(
            ChapterKey::from_archive_name("ch005.50.cbz"),
            Some(ChapterKey::new(5, Some("5")))
        );
    }

    #[test]
    fn prefers_number_after_chapter_label() {
        assert_eq!(key("season-2-chapter-10"), "ch010");
        assert_eq!(key("Ch. 7"), "ch007");
        assert_eq!(key("https://example.com/manga/x/chapter-12/"), "ch012");
    }

    #[test]
    fn normalizing_a_key_is_stable() {
        assert_eq!(key("ch007.5.cbz"), "ch007.5");
        assert_eq!(key("ch012"), "ch012");
    }

    #[test]
    fn rejects_tokens_without_a_number() {
        assert_eq!(
            ChapterKey::normalize("prologue"),
            Err(ChapterKeyError::NoNumber("prologue".to_owned()))
        );
        assert!(matches!(
            ChapterKey::normalize("chapter-99999999999999999999999"),
            Err(ChapterKeyError::Overflow(_))
        ));
    }

    #[test]
    fn string_order_matches_numeric_order_below_one_thousand() {
        let mut previous = key("chapter-0");
        for n in 1..1000 {
            let current = key(&format!("chapter-{n}"));
            assert!(previous < current, "{previous} !< {current}");
            previous = current;
        }
    }

    #[test]
    fn key_order_is_numeric_including_fractions() {
        let mut keys = ["ch1000", "10", "5.5", "5", "999", "5.25"]
            .iter()
            .map(|raw| ChapterKey::normalize(raw).unwrap())
            .collect::<Vec<_>>();
        keys.sort();
        let rendered = keys.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(
            rendered,
            ["ch005", "ch005.25", "ch005.5", "ch010", "ch999", "ch1000"]
        );
    }

    #[test]
    fn parses_archive_names_including_legacy_padding() {
        assert_eq!(
            ChapterKey::from_archive_name("ch5.cbz"),
            Some(ChapterKey::new(5, None))
        );
        assert_eq!(
            ChapterKey::from_archive_name("ch05.cbz"),
            Some(ChapterKey::new(5, None))
        );
        assert_eq!(
            ChapterKey::from_archive_name("ch043.5.cbz"),
            Some(ChapterKey::new(43, Some("5")))
        );
        assert_eq!(ChapterKey::from_archive_name("notes.cbz"), None);
        assert_eq!(ChapterKey::from_archive_name("ch001.zip"), None);
    }

    #[test]
    fn archive_name_appends_extension() {
        assert_eq!(ChapterKey::new(2, None).archive_name(), "ch002.cbz");
        assert_eq!(ChapterKey::new(2, Some("5")).archive_name(), "ch002.5.cbz");
    }

    #[test]
    fn page_names_are_zero_padded() {
        assert_eq!(page_file_name(1), "001.jpg");
        assert_eq!(page_file_name(42), "042.jpg");
        assert_eq!(page_file_name(1200), "1200.jpg");
    }
}
