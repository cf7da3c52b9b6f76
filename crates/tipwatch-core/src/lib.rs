//! Core domain model for tipwatch: listing summaries, detail standings and the merged record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tipwatch-core";

pub const DEFAULT_BASE_URL: &str = "https://www.forebet.com";

/// Lightweight record extracted from one listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub game: String,
    pub home_team: String,
    pub away_team: String,
    pub match_url: String,
    pub time_str: String,
    pub iso_time: String,
    pub score: String,
    pub half_time_score: String,
    pub extra_time: String,
    pub extra_minute: String,
    pub prediction: String,
    pub prob_home: String,
    pub prob_draw: String,
    pub prob_away: String,
    pub league: String,
    pub live_odds: String,
    pub captured_at: DateTime<Utc>,
}

impl MatchSummary {
    /// Summary with only the natural key populated; display fields start empty.
    pub fn new(
        game: impl Into<String>,
        home_team: impl Into<String>,
        away_team: impl Into<String>,
        match_url: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            game: game.into(),
            home_team: home_team.into(),
            away_team: away_team.into(),
            match_url: match_url.into(),
            time_str: String::new(),
            iso_time: String::new(),
            score: String::new(),
            half_time_score: String::new(),
            extra_time: String::new(),
            extra_minute: String::new(),
            prediction: String::new(),
            prob_home: String::new(),
            prob_draw: String::new(),
            prob_away: String::new(),
            league: String::new(),
            live_odds: String::new(),
            captured_at,
        }
    }

    pub fn has_usable_url(&self, base: &str) -> bool {
        is_usable_match_url(base, &self.match_url)
    }
}

/// League-table statistics for one side of a match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStanding {
    pub points: String,
    pub played: String,
    pub wins: String,
    pub draws: String,
    pub losses: String,
    pub goals_for: String,
    pub goals_against: String,
    pub goal_diff: String,
}

impl TeamStanding {
    pub fn is_empty(&self) -> bool {
        [
            &self.points,
            &self.played,
            &self.wins,
            &self.draws,
            &self.losses,
            &self.goals_for,
            &self.goals_against,
            &self.goal_diff,
        ]
        .iter()
        .all(|v| v.is_empty())
    }
}

/// Supplementary fields from a match detail page. `Default` is the degraded "not found" value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub home_rank: String,
    pub away_rank: String,
    pub league: String,
    pub home: TeamStanding,
    pub away: TeamStanding,
}

impl MatchDetail {
    pub fn is_empty(&self) -> bool {
        self.home_rank.is_empty()
            && self.away_rank.is_empty()
            && self.league.is_empty()
            && self.home.is_empty()
            && self.away.is_empty()
    }
}

pub const RECORD_TEXT_COLUMN_COUNT: usize = 34;

/// Text columns of a persisted record, in insert/update/export order.
pub const RECORD_TEXT_COLUMNS: [&str; RECORD_TEXT_COLUMN_COUNT] = [
    "game",
    "time_str",
    "iso_time",
    "score",
    "half_time_score",
    "extra_time",
    "extra_minute",
    "prediction",
    "prob_home",
    "prob_draw",
    "prob_away",
    "live_odds",
    "home_team",
    "away_team",
    "match_url",
    "league",
    "home_rank",
    "away_rank",
    "home_points",
    "home_played",
    "home_wins",
    "home_draws",
    "home_losses",
    "home_goals_for",
    "home_goals_against",
    "home_goal_diff",
    "away_points",
    "away_played",
    "away_wins",
    "away_draws",
    "away_losses",
    "away_goals_for",
    "away_goals_against",
    "away_goal_diff",
];

/// Timestamp column captured at listing parse time.
pub const CAPTURED_AT_COLUMN: &str = "captured_at";

/// Summary merged with detail; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub summary: MatchSummary,
    pub detail: MatchDetail,
}

impl MatchRecord {
    /// Merges detail into the summary. A non-empty detail league replaces the listing league.
    pub fn merge(mut summary: MatchSummary, detail: MatchDetail) -> Self {
        if !detail.league.trim().is_empty() {
            summary.league = detail.league.clone();
        }
        Self { summary, detail }
    }

    pub fn from_summary(summary: MatchSummary) -> Self {
        Self::merge(summary, MatchDetail::default())
    }

    pub fn is_degraded(&self) -> bool {
        self.detail.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.summary.captured_at
    }

    /// Values aligned with [`RECORD_TEXT_COLUMNS`].
    pub fn text_values(&self) -> [&str; RECORD_TEXT_COLUMN_COUNT] {
        let s = &self.summary;
        let d = &self.detail;
        [
            &s.game,
            &s.time_str,
            &s.iso_time,
            &s.score,
            &s.half_time_score,
            &s.extra_time,
            &s.extra_minute,
            &s.prediction,
            &s.prob_home,
            &s.prob_draw,
            &s.prob_away,
            &s.live_odds,
            &s.home_team,
            &s.away_team,
            &s.match_url,
            &s.league,
            &d.home_rank,
            &d.away_rank,
            &d.home.points,
            &d.home.played,
            &d.home.wins,
            &d.home.draws,
            &d.home.losses,
            &d.home.goals_for,
            &d.home.goals_against,
            &d.home.goal_diff,
            &d.away.points,
            &d.away.played,
            &d.away.wins,
            &d.away.draws,
            &d.away.losses,
            &d.away.goals_for,
            &d.away.goals_against,
            &d.away.goal_diff,
        ]
    }

    pub fn column_value(&self, column: &str) -> Option<&str> {
        RECORD_TEXT_COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|idx| self.text_values()[idx])
    }
}

fn has_http_scheme(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Normalizes a listing href into an absolute URL with exactly one `base` prefix.
///
/// Anything before the last occurrence of `base` is discarded. Input without `base` is joined onto
/// it as a path, absolute URLs on other hosts included, so the result always starts with `base`.
/// Empty input stays empty. Applying the function twice gives the same result as applying it once.
pub fn normalize_match_url(base: &str, raw: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if base.is_empty() {
        return raw.to_string();
    }

    let tail = match raw.rfind(base) {
        Some(idx) => &raw[idx + base.len()..],
        None => raw,
    };

    if tail.starts_with('/') {
        format!("{base}{tail}")
    } else {
        format!("{base}/{tail}")
    }
}

/// True when `url` is a detail page under `base`: it carries the base prefix, parses as an
/// http(s) URL on the base host, and has a path after the prefix that is not another URL.
pub fn is_usable_match_url(base: &str, url: &str) -> bool {
    let base = base.trim().trim_end_matches('/');
    if base.is_empty() || !has_http_scheme(url) {
        return false;
    }
    let Some(tail) = url.strip_prefix(base) else {
        return false;
    };
    if tail.trim_start_matches('/').is_empty() || tail.contains("://") {
        return false;
    }
    let (Ok(parsed), Ok(base_parsed)) = (url::Url::parse(url), url::Url::parse(base)) else {
        return false;
    };
    matches!(parsed.scheme(), "http" | "https")
        && parsed.host_str().is_some_and(|h| !h.is_empty())
        && parsed.host_str() == base_parsed.host_str()
}
