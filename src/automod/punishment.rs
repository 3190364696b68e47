use crate::error::PunishmentParseError;
use chrono::Duration;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Used when a punishment code carries a duration suffix that cannot be parsed.
pub const FALLBACK_DURATION_HOURS: i64 = 1;

/// An escalation tier, parsed once from its punishment code (`warn`,
/// `mute_1h`, `ban_3d`, `ban`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punishment {
    Warn,
    Mute(Duration),
    /// `None` is a permanent ban.
    Ban(Option<Duration>),
}

impl Punishment {
    pub fn parse(code: &str) -> Result<Self, PunishmentParseError> {
        let code = code.trim().to_ascii_lowercase();
        let (kind, suffix) = match code.split_once('_') {
            Some((kind, suffix)) => (kind, Some(suffix)),
            None => (code.as_str(), None),
        };

        match (kind, suffix) {
            ("warn", None) => Ok(Punishment::Warn),
            ("mute", suffix) => Ok(Punishment::Mute(parse_suffix(suffix))),
            ("ban", None) => Ok(Punishment::Ban(None)),
            ("ban", suffix) => Ok(Punishment::Ban(Some(parse_suffix(suffix)))),
            _ => Err(PunishmentParseError(code.clone())),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Punishment::Warn => None,
            Punishment::Mute(d) => Some(*d),
            Punishment::Ban(d) => *d,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Punishment::Warn => "warn".to_string(),
            Punishment::Mute(d) => format!("mute_{}", duration_suffix(*d)),
            Punishment::Ban(Some(d)) => format!("ban_{}", duration_suffix(*d)),
            Punishment::Ban(None) => "ban".to_string(),
        }
    }

    /// Human readable label, e.g. `mute (1h)` or `permanent ban`.
    pub fn describe(&self) -> String {
        match self {
            Punishment::Warn => "warning".to_string(),
            Punishment::Mute(d) => format!("mute ({})", humanize(*d)),
            Punishment::Ban(Some(d)) => format!("ban ({})", humanize(*d)),
            Punishment::Ban(None) => "permanent ban".to_string(),
        }
    }

    fn severity(&self) -> (u8, i64) {
        match self {
            Punishment::Warn => (0, 0),
            Punishment::Mute(d) => (1, d.num_seconds()),
            Punishment::Ban(Some(d)) => (2, d.num_seconds()),
            Punishment::Ban(None) => (3, 0),
        }
    }
}

impl PartialOrd for Punishment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Punishment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl FromStr for Punishment {
    type Err = PunishmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Punishment::parse(s)
    }
}

impl fmt::Display for Punishment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// `<digits><h|d>`; anything else falls back to one hour.
fn parse_suffix(suffix: Option<&str>) -> Duration {
    let fallback = Duration::hours(FALLBACK_DURATION_HOURS);
    let Some(suffix) = suffix else {
        return fallback;
    };
    if suffix.len() < 2 || !suffix.is_char_boundary(suffix.len() - 1) {
        return fallback;
    }
    let (digits, unit) = suffix.split_at(suffix.len() - 1);
    let Ok(value) = digits.parse::<i64>() else {
        return fallback;
    };
    match unit {
        "h" => Duration::try_hours(value).unwrap_or(fallback),
        "d" => Duration::try_days(value).unwrap_or(fallback),
        _ => fallback,
    }
}

fn duration_suffix(d: Duration) -> String {
    let hours = d.num_hours();
    if hours > 0 && hours % 24 == 0 {
        format!("{}d", hours / 24)
    } else {
        format!("{}h", hours.max(1))
    }
}

fn humanize(d: Duration) -> String {
    d.to_std()
        .map(|std| humantime::format_duration(std).to_string())
        .unwrap_or_else(|_| duration_suffix(d))
}

/// Maps a cumulative violation count to a punishment. Counts past the
/// highest key reuse the highest tier; counts below the lowest key use the
/// lowest tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishmentTable {
    tiers: BTreeMap<u32, Punishment>,
}

impl PunishmentTable {
    pub fn new(tiers: impl IntoIterator<Item = (u32, Punishment)>) -> Self {
        Self {
            tiers: tiers.into_iter().collect(),
        }
    }

    /// Builds a table from codes for counts 1, 2, 3, ...
    pub fn from_codes(codes: &[&str]) -> Result<Self, PunishmentParseError> {
        let mut tiers = BTreeMap::new();
        for (idx, code) in codes.iter().enumerate() {
            tiers.insert(idx as u32 + 1, Punishment::parse(code)?);
        }
        Ok(Self { tiers })
    }

    pub fn for_count(&self, count: u32) -> Punishment {
        self.tiers
            .range(..=count)
            .next_back()
            .or_else(|| self.tiers.iter().next())
            .map(|(_, p)| *p)
            .unwrap_or(Punishment::Warn)
    }

    pub fn max_count(&self) -> u32 {
        self.tiers.keys().next_back().copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Punishment)> + '_ {
        self.tiers.iter().map(|(count, p)| (*count, *p))
    }

    /// One-line ladder such as `warn → mute_1h → mute_1d → ban_3d`.
    pub fn ladder(&self) -> String {
        self.tiers
            .values()
            .map(|p| p.code())
            .collect::<Vec<_>>()
            .join(" → ")
    }
}
