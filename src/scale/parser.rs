/// Weight extraction from decoded scale frames
use regex::Regex;

/// Wire patterns in priority order. Each captures the signed decimal weight.
///
/// 1. Stability marker before the number: `ST,+12.34`
/// 2. Number before the stability marker: `+12.34,ST`
/// 3. Number, unit, then stability marker: `+12.34 kg ST`
pub const STABLE_WEIGHT_PATTERNS: [&str; 3] = [
    r"ST.*?([+-]?\d+\.?\d*)",
    r"([+-]?\d+\.?\d*).*?ST",
    r"([+-]?\d+\.?\d*)\s*kg.*?ST",
];

/// Priority-ordered matcher for stable weight frames.
///
/// This is the only place that knows the device wire format. Additional
/// device protocols are supported by appending patterns; the first pattern
/// whose capture parses as a number wins.
#[derive(Debug, Clone)]
pub struct FrameParser {
    patterns: Vec<Regex>,
}

impl FrameParser {
    /// Build a parser from patterns whose first capture group is the weight.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FrameParser { patterns })
    }

    /// Append a lower-priority pattern.
    pub fn push_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Extract a stable weight from a trimmed frame.
    ///
    /// Returns `None` for unstable, unrecognised, or malformed frames; that is
    /// the normal outcome for most device chatter, not an error.
    pub fn parse_weight(&self, frame: &str) -> Option<f64> {
        self.patterns.iter().find_map(|pattern| {
            pattern
                .captures(frame)
                .and_then(|caps| caps.get(1))
                .and_then(|group| group.as_str().parse::<f64>().ok())
        })
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        FrameParser {
            patterns: STABLE_WEIGHT_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("built-in weight pattern must compile"))
                .collect(),
        }
    }
}
