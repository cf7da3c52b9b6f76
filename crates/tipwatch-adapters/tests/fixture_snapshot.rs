use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tipwatch_adapters::{DetailExtractor, ListingExtractor};
use tipwatch_core::{MatchRecord, MatchSummary, DEFAULT_BASE_URL};

#[derive(Debug, PartialEq, Deserialize)]
struct GoldenSummary {
    game: String,
    home_team: String,
    away_team: String,
    match_url: String,
    league: String,
    prediction: String,
    prob_home: String,
    prob_draw: String,
    prob_away: String,
    time_str: String,
    iso_time: String,
    score: String,
    half_time_score: String,
    extra_time: String,
    extra_minute: String,
    live_odds: String,
}

impl From<&MatchSummary> for GoldenSummary {
    fn from(s: &MatchSummary) -> Self {
        Self {
            game: s.game.clone(),
            home_team: s.home_team.clone(),
            away_team: s.away_team.clone(),
            match_url: s.match_url.clone(),
            league: s.league.clone(),
            prediction: s.prediction.clone(),
            prob_home: s.prob_home.clone(),
            prob_draw: s.prob_draw.clone(),
            prob_away: s.prob_away.clone(),
            time_str: s.time_str.clone(),
            iso_time: s.iso_time.clone(),
            score: s.score.clone(),
            half_time_score: s.half_time_score.clone(),
            extra_time: s.extra_time.clone(),
            extra_minute: s.extra_minute.clone(),
            live_odds: s.live_odds.clone(),
        }
    }
}

fn fixture_path(parts: &[&str]) -> PathBuf {
    let mut path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures");
    for part in parts {
        path = path.join(part);
    }
    path
}

fn read_fixture(parts: &[&str]) -> String {
    let path = fixture_path(parts);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn listing_fixture_matches_snapshot() {
    let html = read_fixture(&["listing", "sample.html"]);
    let golden: Vec<GoldenSummary> =
        serde_json::from_str(&read_fixture(&["listing", "snapshot.json"])).expect("snapshot json");

    let captured_at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().expect("timestamp");
    let extractor = ListingExtractor::new(DEFAULT_BASE_URL).expect("selectors");
    let summaries = extractor.extract_summaries_at(&html, captured_at);

    let actual: Vec<GoldenSummary> = summaries.iter().map(GoldenSummary::from).collect();
    assert_eq!(actual, golden);
    assert!(summaries.iter().all(|s| s.captured_at == captured_at));
}

#[test]
fn listing_fixture_flags_entries_without_usable_url() {
    // 3rd entry has no href, 4th links to a mirror host.
    let html = read_fixture(&["listing", "sample.html"]);
    let extractor = ListingExtractor::new(DEFAULT_BASE_URL).expect("selectors");
    let usable: Vec<bool> = extractor
        .extract_summaries(&html)
        .iter()
        .map(|s| s.has_usable_url(DEFAULT_BASE_URL))
        .collect();
    assert_eq!(usable, vec![true, true, false, false]);
}

#[test]
fn detail_fixture_yields_ranks_standings_and_league() {
    let html = read_fixture(&["detail", "sample.html"]);
    let extractor = DetailExtractor::new().expect("selectors");
    let detail = extractor.extract_detail(&html, "Arsenal", "Chelsea");

    assert_eq!(detail.home_rank, "2");
    assert_eq!(detail.away_rank, "5");
    assert_eq!(detail.league, "England Premier League");
    assert_eq!(detail.home.points, "54");
    assert_eq!(detail.home.played, "27");
    assert_eq!(detail.home.goal_diff, "29");
    assert_eq!(detail.away.wins, "13");
    assert_eq!(detail.away.goals_against, "34");
}

#[test]
fn detail_league_overrides_listing_league_on_merge() {
    let listing = read_fixture(&["listing", "sample.html"]);
    let detail_html = read_fixture(&["detail", "sample.html"]);
    let summary = ListingExtractor::new(DEFAULT_BASE_URL)
        .expect("selectors")
        .extract_summaries(&listing)
        .into_iter()
        .next()
        .expect("first summary");
    let detail = DetailExtractor::new()
        .expect("selectors")
        .extract_detail(&detail_html, &summary.home_team, &summary.away_team);

    let record = MatchRecord::merge(summary, detail);
    assert_eq!(record.summary.league, "England Premier League");
    assert!(!record.is_degraded());
}

#[test]
fn detail_fixture_for_unknown_teams_is_empty() {
    let html = read_fixture(&["detail", "sample.html"]);
    let detail = DetailExtractor::new()
        .expect("selectors")
        .extract_detail(&html, "Leeds", "Burnley");
    assert_eq!(detail.home_rank, "");
    assert!(detail.home.is_empty());
    assert!(detail.away.is_empty());
    assert_eq!(detail.league, "England Premier League");
}
