//! Manifest pattern compilation and key matching.
//!
//! Patterns are literal filenames with two placeholder kinds: exactly one
//! `{time(FORMAT)}` (strftime format, required) and at most one
//! `{sequence}`. Compilation produces an anchored regex with named
//! captures plus the time format; matching is applied to the filename
//! segment of each candidate key. The scanner is hand-rolled: placeholder
//! syntax must not collide with the regex engine's own brace quantifiers.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::trace;

use super::Manifest;
use crate::error::IngestError;

/// A compiled manifest filename pattern.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
    time_format: String,
    sequence_mode: bool,
    processed_prefix: String,
}

/// Captures extracted from one matching key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMatch {
    /// Parsed `{sequence}` capture; 0 when the capture is empty.
    pub sequence: i64,
    /// Parsed `{time(FORMAT)}` capture.
    pub date: NaiveDateTime,
}

/// Maps one strftime directive to a digit class.
fn directive_class(directive: char) -> Result<&'static str, IngestError> {
    Ok(match directive {
        'Y' => r"\d{4}",
        'y' => r"\d{2}",
        'm' | 'd' | 'H' | 'M' | 'S' => r"\d{1,2}",
        'j' => r"\d{1,3}",
        's' => r"\d{10}",
        other => {
            return Err(IngestError::configuration(format!(
                "unsupported time directive %{other} in manifest pattern"
            )));
        }
    })
}

/// Translates a strftime format into a regex fragment.
fn time_format_to_regex(format: &str) -> Result<String, IngestError> {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let directive = chars.next().ok_or_else(|| {
                IngestError::configuration("dangling % in manifest time format")
            })?;
            out.push_str(directive_class(directive)?);
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    Ok(out)
}

impl CompiledPattern {
    /// Compiles a placeholder pattern into a matcher.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when the pattern has no
    /// `{time(...)}` placeholder, more than one of either placeholder,
    /// an unterminated placeholder, or an unsupported time directive.
    pub fn compile(pattern: &str, processed_prefix: &str) -> Result<Self, IngestError> {
        let mut regex_source = String::from("^");
        let mut time_format: Option<String> = None;
        let mut sequence_mode = false;

        let mut rest = pattern;
        while !rest.is_empty() {
            match rest.find('{') {
                None => {
                    regex_source.push_str(&regex::escape(rest));
                    break;
                }
                Some(open) => {
                    regex_source.push_str(&regex::escape(&rest[..open]));
                    let tail = &rest[open..];
                    let close = tail.find('}').ok_or_else(|| {
                        IngestError::configuration(format!(
                            "unterminated placeholder in manifest pattern {pattern:?}"
                        ))
                    })?;
                    let placeholder = &tail[1..close];
                    if placeholder == "sequence" {
                        if sequence_mode {
                            return Err(IngestError::configuration(
                                "manifest pattern has more than one {sequence} placeholder",
                            ));
                        }
                        sequence_mode = true;
                        regex_source.push_str(r"(?P<sequence>\d*)");
                    } else if let Some(format) = placeholder
                        .strip_prefix("time(")
                        .and_then(|p| p.strip_suffix(')'))
                    {
                        if time_format.is_some() {
                            return Err(IngestError::configuration(
                                "manifest pattern has more than one {time(...)} placeholder",
                            ));
                        }
                        regex_source.push_str("(?P<time>");
                        regex_source.push_str(&time_format_to_regex(format)?);
                        regex_source.push(')');
                        time_format = Some(format.to_string());
                    } else {
                        return Err(IngestError::configuration(format!(
                            "unknown placeholder {{{placeholder}}} in manifest pattern"
                        )));
                    }
                    rest = &tail[close + 1..];
                }
            }
        }

        let time_format = time_format.ok_or_else(|| {
            IngestError::configuration(format!(
                "manifest pattern {pattern:?} has no {{time(...)}} placeholder"
            ))
        })?;

        let regex = Regex::new(&regex_source).map_err(|e| {
            IngestError::configuration(format!("manifest pattern compiles to invalid regex: {e}"))
        })?;

        Ok(Self {
            regex,
            time_format,
            sequence_mode,
            processed_prefix: processed_prefix.to_string(),
        })
    }

    /// Whether the pattern carries a `{sequence}` placeholder.
    #[must_use]
    pub fn sequence_mode(&self) -> bool {
        self.sequence_mode
    }

    /// The strftime format declared in the `{time(...)}` placeholder.
    #[must_use]
    pub fn time_format(&self) -> &str {
        &self.time_format
    }

    /// The compiled regex source, mostly useful in logs.
    #[must_use]
    pub fn regex_source(&self) -> &str {
        self.regex.as_str()
    }

    fn parse_date(&self, capture: &str) -> Option<NaiveDateTime> {
        if self.time_format == "%s" {
            let epoch: i64 = capture.parse().ok()?;
            return DateTime::from_timestamp(epoch, 0).map(|dt| dt.naive_utc());
        }
        NaiveDateTime::parse_from_str(capture, &self.time_format)
            .ok()
            .or_else(|| {
                // Date-only formats parse without a time component.
                NaiveDate::parse_from_str(capture, &self.time_format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    /// Whether the key sits under the processed prefix. The prefix may be
    /// relocated anywhere inside the listed folder, so any directory
    /// segment counts, not just the first.
    fn is_processed(&self, key: &str) -> bool {
        if self.processed_prefix.contains('/') {
            return key.starts_with(&format!("{}/", self.processed_prefix))
                || key.contains(&format!("/{}/", self.processed_prefix));
        }
        let mut segments = key.split('/');
        // Last segment is the filename, never a directory.
        segments.next_back();
        segments.any(|segment| segment == self.processed_prefix)
    }

    /// Matches a candidate key against the pattern.
    ///
    /// Keys under the processed prefix are skipped, as are keys whose
    /// filename segment does not structurally match or whose time capture
    /// does not parse. Skipping is silent: foreign files next to the
    /// manifests are expected.
    #[must_use]
    pub fn match_key(&self, key: &str) -> Option<ManifestMatch> {
        if self.is_processed(key) {
            trace!(key, "skipping processed key");
            return None;
        }
        let filename = key.rsplit('/').next().unwrap_or(key);
        let captures = self.regex.captures(filename)?;

        let sequence = captures
            .name("sequence")
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let date = self.parse_date(captures.name("time")?.as_str())?;

        Some(ManifestMatch { sequence, date })
    }

    /// Matches a key and builds the manifest descriptor for it.
    #[must_use]
    pub fn match_manifest(&self, key: &str, regex_template: Option<&str>) -> Option<Manifest> {
        let matched = self.match_key(key)?;
        Some(Manifest {
            path: key.to_string(),
            sequence: self.sequence_mode.then_some(matched.sequence),
            date: matched.date,
            regex: regex_template.map(str::to_string),
            synthesized: false,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn compile(pattern: &str) -> CompiledPattern {
        CompiledPattern::compile(pattern, "processed").unwrap()
    }

    #[test]
    fn test_pattern_without_time_placeholder_fails() {
        let error = CompiledPattern::compile("manifest-{sequence}", "processed").unwrap_err();
        assert!(matches!(error, IngestError::Configuration { .. }));
        assert!(error.to_string().contains("time"));
    }

    #[test]
    fn test_epoch_pattern_regex_shape() {
        let pattern = compile("manifest_{time(%s)}.csv");
        assert_eq!(pattern.regex_source(), r"^manifest_(?P<time>\d{10})\.csv");
        assert_eq!(pattern.time_format(), "%s");
        assert!(!pattern.sequence_mode());
    }

    #[test]
    fn test_sequence_pattern_regex_shape() {
        let pattern = compile("manifest-blabla_{sequence}.{time(%Y%m%d%H%M%S)}");
        assert_eq!(
            pattern.regex_source(),
            r"^manifest\-blabla_(?P<sequence>\d*)\.(?P<time>\d{4}\d{1,2}\d{1,2}\d{1,2}\d{1,2}\d{1,2})"
        );
        assert!(pattern.sequence_mode());

        let pattern = compile("manifest-blabla_{time(%Y%m%d%H%M%S)}.{sequence}");
        assert_eq!(
            pattern.regex_source(),
            r"^manifest\-blabla_(?P<time>\d{4}\d{1,2}\d{1,2}\d{1,2}\d{1,2}\d{1,2})\.(?P<sequence>\d*)"
        );
    }

    #[test]
    fn test_duplicate_placeholders_fail() {
        assert!(
            CompiledPattern::compile("m_{time(%s)}_{time(%s)}.csv", "processed").is_err()
        );
        assert!(
            CompiledPattern::compile("m_{sequence}_{sequence}_{time(%s)}", "processed").is_err()
        );
    }

    #[test]
    fn test_match_key_extracts_sequence_and_date() {
        let pattern = compile("manifest-batchA_{sequence}.{time(%Y%m%d%H%M%S)}");
        let matched = pattern
            .match_key("path/manifest-batchA_10.20160714105300.csv")
            .unwrap();
        assert_eq!(matched.sequence, 10);
        assert_eq!(
            matched.date,
            NaiveDate::from_ymd_opt(2016, 7, 14)
                .unwrap()
                .and_hms_opt(10, 53, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_match_key_skips_processed_prefix() {
        let pattern = compile("manifest-batchA_{sequence}.{time(%Y%m%d%H%M%S)}");
        assert!(
            pattern
                .match_key("processed/manifest-batchA_10.20160714105300.csv")
                .is_none()
        );
    }

    #[test]
    fn test_match_key_skips_processed_folder_inside_listing() {
        let pattern = compile("manifest-batchA_{sequence}.{time(%Y%m%d%H%M%S)}");
        assert!(
            pattern
                .match_key("data/processed/manifest-batchA_10.20160714105300.csv")
                .is_none()
        );
        assert!(
            pattern
                .match_key("data/in/processed/manifest-batchA_10.20160714105300.csv")
                .is_none()
        );
        assert!(
            pattern
                .match_key("data/in/manifest-batchA_10.20160714105300.csv")
                .is_some()
        );
    }

    #[test]
    fn test_processed_check_spares_matching_filenames() {
        // Only directory segments count; a filename that happens to start
        // with the prefix still matches.
        let pattern = CompiledPattern::compile("processed_{time(%s)}.csv", "processed").unwrap();
        assert!(pattern.match_key("in/processed_1438758475.csv").is_some());
    }

    #[test]
    fn test_match_key_skips_non_matching() {
        let pattern = compile("manifest-batchA_{sequence}.{time(%Y%m%d%H%M%S)}");
        assert!(pattern.match_key("path/manifest_10.20160714105300.csv").is_none());
    }

    #[test]
    fn test_match_key_epoch_seconds() {
        let pattern = compile("manifest_{time(%s)}.csv");
        let matched = pattern.match_key("data/manifest_1438758475.csv").unwrap();
        assert_eq!(matched.sequence, 0);
        assert_eq!(matched.date.and_utc().timestamp(), 1_438_758_475);
        assert_eq!(matched.date.hour(), 7); // 2015-08-05T07:07:55Z
    }

    #[test]
    fn test_sequence_defaults_to_zero_when_capture_empty() {
        let pattern = compile("manifest-{sequence}_{time(%s)}.csv");
        let matched = pattern.match_key("manifest-_1438758475.csv").unwrap();
        assert_eq!(matched.sequence, 0);
    }

    #[test]
    fn test_match_manifest_sequence_only_in_sequence_mode() {
        let with_sequence = compile("manifest-{sequence}_{time(%s)}.csv");
        let manifest = with_sequence
            .match_manifest("in/manifest-3_1438758475.csv", None)
            .unwrap();
        assert_eq!(manifest.sequence, Some(3));

        let without = compile("manifest_{time(%s)}.csv");
        let manifest = without
            .match_manifest("in/manifest_1438758475.csv", None)
            .unwrap();
        assert_eq!(manifest.sequence, None);
    }

    #[test]
    fn test_unsupported_directive_fails() {
        assert!(CompiledPattern::compile("m_{time(%Q)}.csv", "processed").is_err());
    }
}
