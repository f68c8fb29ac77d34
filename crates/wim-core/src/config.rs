//! `CaptureConfig` (spec.md §3, §4.1): the exclusion/inclusion/
//! compression/alignment pattern set read from an image's capture
//! configuration file.
//!
//! Pattern matching uses `globset` (spec.md §10.4): each pattern compiles
//! to a `globset::GlobMatcher` whose `*`/`?` never cross a `/` by
//! default, matching fnmatch's `FNM_PATHNAME` behavior in the original's
//! `match_pattern`, built with `.case_insensitive(true)` (`FNM_CASEFOLD`).

use globset::GlobMatcher;

use crate::error::{Error, Result};

/// Where a pattern anchors, mirroring the three cases `add_image.c`'s
/// `match_pattern` distinguishes by inspecting the raw pattern text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    /// Leading `/`: matches the full path from the capture root.
    Rooted,
    /// Contains `/` elsewhere: matches the full path, relative form (the
    /// original strips exactly the leading `/` and compares what's left).
    Relative,
    /// No `/` at all: matches only the basename of any path.
    Basename,
}

#[derive(Debug, Clone)]
struct Pattern {
    anchor: Anchor,
    matcher: GlobMatcher,
}

impl Pattern {
    fn compile(raw: &str) -> Result<Self> {
        let anchor = if raw.starts_with('/') {
            Anchor::Rooted
        } else if raw.contains('/') {
            Anchor::Relative
        } else {
            Anchor::Basename
        };
        // The pattern text itself keeps its leading `/` for `Rooted`
        // patterns; only the *matched* path is shaped per anchor below,
        // mirroring the original's `match_pattern` exactly.
        Ok(Self {
            anchor,
            matcher: globset::GlobBuilder::new(raw)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::InvalidCaptureConfig(format!("invalid pattern '{raw}': {e}")))?
                .compile_matcher(),
        })
    }

    /// `full_path` always carries its leading `/` (possibly after prefix
    /// stripping); `basename` is its last path component.
    fn matches(&self, full_path: &str, basename: &str) -> bool {
        match self.anchor {
            Anchor::Rooted => self.matcher.is_match(full_path),
            Anchor::Relative => self.matcher.is_match(full_path.strip_prefix('/').unwrap_or(full_path)),
            Anchor::Basename => self.matcher.is_match(basename),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    fn push(&mut self, raw: &str) -> Result<()> {
        self.patterns.push(Pattern::compile(raw)?);
        Ok(())
    }

    fn any_match(&self, full_path: &str, basename: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(full_path, basename))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    ExclusionList,
    ExclusionException,
    CompressionExclusionList,
    AlignmentList,
}

/// The parsed, ready-to-query capture configuration (spec.md §3, §4.1).
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    exclusion_list: PatternList,
    exclusion_exception: PatternList,
    compression_exclusion_list: PatternList,
    alignment_list: PatternList,
}

fn path_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl CaptureConfig {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default config used when the caller passes none (spec.md
    /// §4.1): excludes the usual Windows paging/log/metadata paths and
    /// compresses out a handful of already-compressed extensions.
    #[must_use]
    pub fn legacy_default() -> Self {
        let text = "[ExclusionList]\n\
                     /$ntfs.log\n\
                     /hiberfil.sys\n\
                     /pagefile.sys\n\
                     /System Volume Information\n\
                     /RECYCLER\n\
                     /Windows/CSC\n\
                     \n\
                     [CompressionExclusionList]\n\
                     *.mp3\n\
                     *.zip\n\
                     *.cab\n\
                     /Windows/inf/*.pnf\n";
        Self::parse(text.as_bytes()).expect("the built-in default capture config is well-formed")
    }

    /// Parses a capture-configuration file (spec.md §4.1, §6).
    ///
    /// Line-oriented, CRLF tolerant. A `[SectionName]` header selects
    /// which of the four pattern lists subsequent non-empty lines join.
    /// Backslashes are normalized to `/`; a leading drive letter `X:` is
    /// stripped. `#` is not a comment. An unrecognized `[...]` header, or
    /// a non-empty line before any header, is `InvalidCaptureConfig`.
    pub fn parse(config_bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(config_bytes)
            .map_err(|_| Error::InvalidCaptureConfig("configuration is not valid UTF-8".into()))?;

        let mut config = Self::default();
        let mut section: Option<Section> = None;

        for raw_line in text.split('\n') {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            if line.is_empty() {
                continue;
            }

            let mut normalized: String = line.replace('\\', "/");
            if normalized.len() > 2 {
                let bytes = normalized.as_bytes();
                if bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
                    normalized = normalized[2..].to_string();
                }
            }

            if let Some(name) = normalized.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = Some(match name {
                    "ExclusionList" => Section::ExclusionList,
                    "ExclusionException" => Section::ExclusionException,
                    "CompressionExclusionList" => Section::CompressionExclusionList,
                    "AlignmentList" => Section::AlignmentList,
                    other => {
                        return Err(Error::InvalidCaptureConfig(format!(
                            "unknown capture configuration section '[{other}]'"
                        )));
                    }
                });
                continue;
            }

            match section {
                Some(Section::ExclusionList) => config.exclusion_list.push(&normalized)?,
                Some(Section::ExclusionException) => {
                    config.exclusion_exception.push(&normalized)?;
                }
                Some(Section::CompressionExclusionList) => {
                    config.compression_exclusion_list.push(&normalized)?;
                }
                Some(Section::AlignmentList) => config.alignment_list.push(&normalized)?,
                None => {
                    return Err(Error::InvalidCaptureConfig(
                        "configuration line is not inside a section (such as [ExclusionList])"
                            .into(),
                    ));
                }
            }
        }

        Ok(config)
    }

    /// Whether `absolute_path` should be excluded from capture (spec.md
    /// §4.1). `absolute_path` must use forward slashes (the canonical
    /// internal form, spec.md §9). If `strip_prefix` and the path begins
    /// with `prefix` followed by `/`, the prefix is stripped before
    /// matching, so a pattern like `/hiberfil.sys` can match
    /// `/mnt/windows7/hiberfil.sys` when capturing `/mnt/windows7`.
    #[must_use]
    pub fn exclude(&self, absolute_path: &str, prefix: Option<&str>, strip_prefix: bool) -> bool {
        let path = if strip_prefix {
            match prefix {
                Some(prefix) if absolute_path.len() > prefix.len() => {
                    let (head, tail) = absolute_path.split_at(prefix.len());
                    if head == prefix && tail.starts_with('/') {
                        tail
                    } else {
                        absolute_path
                    }
                }
                _ => absolute_path,
            }
        } else {
            absolute_path
        };
        let basename = path_basename(path);
        self.exclusion_list.any_match(path, basename)
            && !self.exclusion_exception.any_match(path, basename)
    }

    #[must_use]
    pub fn is_compression_excluded(&self, absolute_path: &str) -> bool {
        let basename = path_basename(absolute_path);
        self.compression_exclusion_list.any_match(absolute_path, basename)
    }

    #[must_use]
    pub fn is_aligned(&self, absolute_path: &str) -> bool {
        let basename = path_basename(absolute_path);
        self.alignment_list.any_match(absolute_path, basename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_excludes_nothing() {
        let config = CaptureConfig::empty();
        assert!(!config.exclude("/src/anything.txt", Some("/src"), true));
    }

    #[test]
    fn legacy_default_excludes_pagefile() {
        let config = CaptureConfig::legacy_default();
        assert!(config.exclude("/mnt/windows7/pagefile.sys", Some("/mnt/windows7"), true));
    }

    #[test]
    fn legacy_default_excludes_nested_csc_directory() {
        let config = CaptureConfig::legacy_default();
        assert!(config.exclude(
            "/mnt/windows7/Windows/CSC",
            Some("/mnt/windows7"),
            true
        ));
    }

    #[test]
    fn basename_pattern_matches_anywhere() {
        let config = CaptureConfig::parse(b"[ExclusionList]\n*.tmp\n").unwrap();
        assert!(config.exclude("/src/deep/nested/file.tmp", Some("/src"), true));
        assert!(!config.exclude("/src/deep/nested/file.txt", Some("/src"), true));
    }

    #[test]
    fn rooted_pattern_requires_prefix_stripped_match() {
        let config = CaptureConfig::parse(b"[ExclusionList]\n/keep.log\n").unwrap();
        assert!(config.exclude("/src/keep.log", Some("/src"), true));
        assert!(!config.exclude("/src/sub/keep.log", Some("/src"), true));
    }

    #[test]
    fn exclusion_exception_overrides_exclusion() {
        let config = CaptureConfig::parse(
            b"[ExclusionList]\n*.log\n[ExclusionException]\n/keep.log\n",
        )
        .unwrap();
        assert!(!config.exclude("/src/keep.log", Some("/src"), true));
        assert!(config.exclude("/src/other.log", Some("/src"), true));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let err = CaptureConfig::parse(b"[NotASection]\nfoo\n").unwrap_err();
        assert!(matches!(err, Error::InvalidCaptureConfig(_)));
    }

    #[test]
    fn line_before_any_section_is_rejected() {
        let err = CaptureConfig::parse(b"foo.txt\n[ExclusionList]\nbar\n").unwrap_err();
        assert!(matches!(err, Error::InvalidCaptureConfig(_)));
    }

    #[test]
    fn backslash_patterns_and_drive_letters_are_normalized() {
        let config = CaptureConfig::parse(b"[ExclusionList]\nC:\\Windows\\CSC\n").unwrap();
        assert!(config.exclude("/mnt/img/Windows/CSC", Some("/mnt/img"), true));
    }

    #[test]
    fn compression_exclusion_list_is_queryable_independently() {
        let config = CaptureConfig::legacy_default();
        assert!(config.is_compression_excluded("/src/song.mp3"));
        assert!(!config.is_compression_excluded("/src/song.flac"));
    }
}
