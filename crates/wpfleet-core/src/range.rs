//! Host range expressions.
//!
//! A range expression names a contiguous block of numbered hosts with
//! optional holes:
//!
//! ```text
//! wp%02d.example.com:1-12            → wp01 … wp12
//! wp%02d.example.com:1-12:!3,7-9     → wp01 wp02 wp04 wp05 wp06 wp10 wp11 wp12
//! ```
//!
//! The template carries exactly one printf-style integer placeholder
//! (`%d`, `%3d`, `%03d`); `%%` is a literal percent sign.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::FormatError;
use crate::types::HostTarget;

/// A parsed host range: template, inclusive bounds, and excluded indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRangeSpec {
    template: HostTemplate,
    start: u32,
    end: u32,
    exclusions: BTreeSet<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostTemplate {
    raw: String,
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl HostRangeSpec {
    /// Parse a range expression.
    pub fn parse(expr: &str) -> Result<Self, FormatError> {
        let parts: Vec<&str> = expr.split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(FormatError::PartCount(expr.to_string()));
        }

        let template = HostTemplate::parse(parts[0])?;
        let (start, end) = parse_bounds(parts[1])?;
        if start > end {
            return Err(FormatError::Reversed { start, end });
        }

        let mut exclusions = BTreeSet::new();
        if let Some(segment) = parts.get(2) {
            let list = segment
                .strip_prefix('!')
                .ok_or_else(|| FormatError::ExclusionPrefix(segment.to_string()))?;
            for token in list.split(',') {
                let (lo, hi) = parse_exclusion(token)?;
                // Indices outside the range cannot be expanded anyway.
                let (lo, hi) = (lo.max(start), hi.min(end));
                if lo <= hi {
                    exclusions.extend(lo..=hi);
                }
            }
        }

        Ok(Self {
            template,
            start,
            end,
            exclusions,
        })
    }

    /// First index of the range.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last index of the range (inclusive).
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Excluded indices, all within `[start, end]`.
    pub fn exclusions(&self) -> &BTreeSet<u32> {
        &self.exclusions
    }

    /// The template as written.
    pub fn template(&self) -> &str {
        &self.template.raw
    }

    /// Number of hosts the range expands to.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1 - self.exclusions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Included indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        (self.start..=self.end).filter(|i| !self.exclusions.contains(i))
    }

    /// Hosts in ascending index order. Each call starts a fresh iteration.
    pub fn expand(&self) -> impl Iterator<Item = HostTarget> + '_ {
        self.indices().map(|i| HostTarget::new(self.template.format(i)))
    }

    /// Convenience for callers that want an owned list.
    pub fn targets(&self) -> Vec<HostTarget> {
        self.expand().collect()
    }
}

impl FromStr for HostRangeSpec {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HostRangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.template.raw, self.start, self.end)?;
        if !self.exclusions.is_empty() {
            let list: Vec<String> = self.exclusions.iter().map(u32::to_string).collect();
            write!(f, ":!{}", list.join(","))?;
        }
        Ok(())
    }
}

impl HostTemplate {
    fn parse(raw: &str) -> Result<Self, FormatError> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut placeholder: Option<(usize, bool)> = None;
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if placeholder.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };
            if c != '%' {
                out.push(c);
                continue;
            }
            if chars.next_if_eq(&'%').is_some() {
                out.push('%');
                continue;
            }

            let zero_pad = chars.next_if_eq(&'0').is_some();
            let mut digits = String::new();
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                digits.push(d);
            }
            if chars.next() != Some('d') || placeholder.is_some() {
                return Err(FormatError::Placeholder(raw.to_string()));
            }
            let width = if digits.is_empty() {
                0
            } else {
                digits
                    .parse()
                    .map_err(|_| FormatError::Placeholder(raw.to_string()))?
            };
            placeholder = Some((width, zero_pad));
        }

        let (width, zero_pad) =
            placeholder.ok_or_else(|| FormatError::Placeholder(raw.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            prefix,
            suffix,
            width,
            zero_pad,
        })
    }

    fn format(&self, index: u32) -> String {
        let (prefix, suffix, width) = (&self.prefix, &self.suffix, self.width);
        if self.zero_pad {
            format!("{prefix}{index:0width$}{suffix}")
        } else {
            format!("{prefix}{index:width$}{suffix}")
        }
    }
}

fn parse_bounds(part: &str) -> Result<(u32, u32), FormatError> {
    let err = || FormatError::Range(part.to_string());
    let (lo, hi) = part.split_once('-').ok_or_else(err)?;
    let lo = lo.trim().parse::<u32>().map_err(|_| err())?;
    let hi = hi.trim().parse::<u32>().map_err(|_| err())?;
    Ok((lo, hi))
}

fn parse_exclusion(token: &str) -> Result<(u32, u32), FormatError> {
    let token = token.trim();
    let err = || FormatError::ExclusionToken(token.to_string());
    match token.split_once('-') {
        Some((lo, hi)) => {
            let lo = lo.trim().parse::<u32>().map_err(|_| err())?;
            let hi = hi.trim().parse::<u32>().map_err(|_| err())?;
            if lo > hi {
                return Err(FormatError::ExclusionReversed { start: lo, end: hi });
            }
            Ok((lo, hi))
        }
        None => {
            let single = token.parse::<u32>().map_err(|_| err())?;
            Ok((single, single))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(expr: &str) -> Vec<String> {
        HostRangeSpec::parse(expr)
            .unwrap()
            .expand()
            .map(|t| t.host().to_string())
            .collect()
    }

    #[test]
    fn expands_simple_range() {
        assert_eq!(
            hosts("web%d.example.com:1-3"),
            vec!["web1.example.com", "web2.example.com", "web3.example.com"]
        );
    }

    #[test]
    fn zero_padded_placeholder() {
        assert_eq!(hosts("wp%02d:8-10"), vec!["wp08", "wp09", "wp10"]);
        assert_eq!(hosts("wp%03d:7-7"), vec!["wp007"]);
    }

    #[test]
    fn space_padded_and_literal_percent() {
        assert_eq!(hosts("h%3d:5-5"), vec!["h  5"]);
        assert_eq!(hosts("100%%-%d:1-1"), vec!["100%-1"]);
    }

    #[test]
    fn single_and_subrange_exclusions() {
        assert_eq!(
            hosts("wp%02d:1-12:!3,7-9"),
            vec!["wp01", "wp02", "wp04", "wp05", "wp06", "wp10", "wp11", "wp12"]
        );
    }

    #[test]
    fn count_matches_bounds_minus_exclusions() {
        let cases = [
            ("s%d:1-10", 10),
            ("s%d:1-10:!1", 9),
            ("s%d:1-10:!1,10", 8),
            ("s%d:1-10:!2-4,6", 6),
            ("s%d:5-5", 1),
            ("s%d:5-5:!5", 0),
            ("s%d:1-10:!0,11-20", 10),
            ("s%d:1-10:!3,3,2-4", 7),
        ];
        for (expr, expected) in cases {
            let spec = HostRangeSpec::parse(expr).unwrap();
            assert_eq!(spec.len(), expected, "{expr}");
            assert_eq!(spec.expand().count(), expected, "{expr}");
        }
    }

    #[test]
    fn expansion_is_strictly_ascending() {
        let spec = HostRangeSpec::parse("s%d:90-110:!95-99,101").unwrap();
        let indices: Vec<u32> = spec.indices().collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(indices.first(), Some(&90));
        assert_eq!(indices.last(), Some(&110));
    }

    #[test]
    fn expansion_is_restartable() {
        let spec = HostRangeSpec::parse("s%d:1-4:!2").unwrap();
        let first: Vec<HostTarget> = spec.expand().collect();
        let second: Vec<HostTarget> = spec.expand().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn out_of_range_exclusions_are_dropped() {
        let spec = HostRangeSpec::parse("s%d:3-5:!1-4,9").unwrap();
        assert_eq!(spec.exclusions().iter().copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn huge_exclusion_span_is_clamped_to_the_range() {
        let spec = HostRangeSpec::parse("s%d:1-2:!0-4000000000").unwrap();
        assert_eq!(spec.exclusions().len(), 2);
        assert!(spec.is_empty());

        let spec = HostRangeSpec::parse("s%d:1-2:!10-4000000000").unwrap();
        assert!(spec.exclusions().is_empty());
        assert_eq!(spec.len(), 2);
    }

    #[test]
    fn rejects_wrong_part_count() {
        assert!(matches!(
            HostRangeSpec::parse("s%d"),
            Err(FormatError::PartCount(_))
        ));
        assert!(matches!(
            HostRangeSpec::parse("s%d:1-2:!3:4"),
            Err(FormatError::PartCount(_))
        ));
    }

    #[test]
    fn rejects_swapped_bounds() {
        assert_eq!(
            HostRangeSpec::parse("s%d:9-2"),
            Err(FormatError::Reversed { start: 9, end: 2 })
        );
    }

    #[test]
    fn rejects_non_numeric_bounds() {
        for expr in ["s%d:a-3", "s%d:1-b", "s%d:1", "s%d:1-2-3", "s%d:-1-2"] {
            assert!(
                matches!(HostRangeSpec::parse(expr), Err(FormatError::Range(_))),
                "{expr}"
            );
        }
    }

    #[test]
    fn rejects_exclusions_without_bang() {
        assert!(matches!(
            HostRangeSpec::parse("s%d:1-5:3"),
            Err(FormatError::ExclusionPrefix(_))
        ));
    }

    #[test]
    fn rejects_bad_exclusion_tokens() {
        assert!(matches!(
            HostRangeSpec::parse("s%d:1-5:!x"),
            Err(FormatError::ExclusionToken(_))
        ));
        assert!(matches!(
            HostRangeSpec::parse("s%d:1-5:!"),
            Err(FormatError::ExclusionToken(_))
        ));
        assert_eq!(
            HostRangeSpec::parse("s%d:1-5:!4-2"),
            Err(FormatError::ExclusionReversed { start: 4, end: 2 })
        );
    }

    #[test]
    fn rejects_templates_without_single_placeholder() {
        for expr in ["web:1-2", "a%db%d:1-2", "web%s:1-2", "web%:1-2"] {
            assert!(
                matches!(HostRangeSpec::parse(expr), Err(FormatError::Placeholder(_))),
                "{expr}"
            );
        }
    }

    #[test]
    fn display_round_trips() {
        let spec = HostRangeSpec::parse("wp%02d:1-9:!2-3,5").unwrap();
        assert_eq!(spec.to_string(), "wp%02d:1-9:!2,3,5");
        let again: HostRangeSpec = spec.to_string().parse().unwrap();
        assert_eq!(again, spec);
    }
}
