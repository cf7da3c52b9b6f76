//! Listing and detail page extraction.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tipwatch_core::{normalize_match_url, MatchDetail, MatchSummary, TeamStanding};
use tracing::{debug, info, warn};

use crate::AdapterError;

/// Standings rows need this many cells before fixed offsets are read.
pub const STAT_MIN_CELLS: usize = 10;

const STANDINGS_TABLES: [&str; 2] = [
    "#stand_hidden table.standings",
    "#short_standings table.standings",
];

fn compile(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(element_text)
}

fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(|s| s.trim().to_string())
}

/// Why a listing entry was left out of the summary sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryRejection {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("expected 3 probabilities, found {0}")]
    ProbabilityCount(usize),
}

struct ListingSelectors {
    entry_or_league: Selector,
    league_heading: Selector,
    league_link: Selector,
    game: Selector,
    prediction: Selector,
    probabilities: Selector,
    span: Selector,
    link: Selector,
    home_team: Selector,
    away_team: Selector,
    time_label: Selector,
    start_time: Selector,
    score: Selector,
    half_time: Selector,
    extra_time: Selector,
    extra_minute: Selector,
    live_odds: Selector,
}

impl ListingSelectors {
    fn compile() -> Result<Self, AdapterError> {
        Ok(Self {
            entry_or_league: compile("center.leagpredlnk, div.rcnt")?,
            league_heading: compile("center.leagpredlnk")?,
            league_link: compile("a.leagpred_btn")?,
            game: compile("meta[itemprop=\"name\"]")?,
            prediction: compile("span.forepr")?,
            probabilities: compile("div.fprc")?,
            span: compile("span")?,
            link: compile("a.tnmscn")?,
            home_team: compile("span.homeTeam")?,
            away_team: compile("span.awayTeam")?,
            time_label: compile("span.date_bah")?,
            start_time: compile("time[itemprop=\"startDate\"]")?,
            score: compile("b.l_scr")?,
            half_time: compile("span.ht_scr")?,
            extra_time: compile("div.ladtm")?,
            extra_minute: compile("span.l_min")?,
            live_odds: compile("span.lscrsp")?,
        })
    }
}

/// Produces [`MatchSummary`] values from a fully loaded listing page.
pub struct ListingExtractor {
    base_url: String,
    sel: ListingSelectors,
}

impl ListingExtractor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AdapterError> {
        Ok(Self {
            base_url: base_url.into(),
            sel: ListingSelectors::compile()?,
        })
    }

    pub fn extract_summaries(&self, html: &str) -> Vec<MatchSummary> {
        self.extract_summaries_at(html, Utc::now())
    }

    /// Walks entries and league headings in document order, so each entry takes the league of
    /// the nearest heading before it.
    pub fn extract_summaries_at(&self, html: &str, captured_at: DateTime<Utc>) -> Vec<MatchSummary> {
        let document = Html::parse_document(html);
        let mut league = String::new();
        let mut summaries = Vec::new();
        let mut entries = 0usize;

        for el in document.select(&self.sel.entry_or_league) {
            if self.sel.league_heading.matches(&el) {
                league = first_text(el, &self.sel.league_link).unwrap_or_default();
                continue;
            }
            entries += 1;
            match self.extract_entry(el, &league, captured_at) {
                Ok(summary) => summaries.push(summary),
                Err(reason) => warn!(entry = entries, %reason, "listing entry skipped"),
            }
        }

        if entries == 0 {
            warn!("no listing entries found; page structure may have changed");
        } else {
            info!(entries, extracted = summaries.len(), "listing parsed");
        }
        summaries
    }

    fn extract_entry(
        &self,
        el: ElementRef<'_>,
        league: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<MatchSummary, EntryRejection> {
        let game = el
            .select(&self.sel.game)
            .next()
            .ok_or(EntryRejection::Missing("display name"))?;
        let prediction = el
            .select(&self.sel.prediction)
            .next()
            .ok_or(EntryRejection::Missing("prediction"))?;
        let probabilities = el
            .select(&self.sel.probabilities)
            .next()
            .ok_or(EntryRejection::Missing("probabilities"))?;
        let link = el
            .select(&self.sel.link)
            .next()
            .ok_or(EntryRejection::Missing("detail link"))?;

        let probs: Vec<String> = probabilities.select(&self.sel.span).map(element_text).collect();
        let [prob_home, prob_draw, prob_away]: [String; 3] = probs
            .try_into()
            .map_err(|p: Vec<String>| EntryRejection::ProbabilityCount(p.len()))?;

        let home_team =
            first_text(link, &self.sel.home_team).ok_or(EntryRejection::Missing("home team"))?;
        let away_team =
            first_text(link, &self.sel.away_team).ok_or(EntryRejection::Missing("away team"))?;
        let href = link.value().attr("href").unwrap_or_default();

        let mut summary = MatchSummary::new(
            game.value().attr("content").unwrap_or_default().trim(),
            home_team,
            away_team,
            normalize_match_url(&self.base_url, href),
            captured_at,
        );
        summary.prediction = element_text(prediction);
        summary.prob_home = prob_home;
        summary.prob_draw = prob_draw;
        summary.prob_away = prob_away;
        summary.league = league.to_string();
        summary.time_str = first_text(el, &self.sel.time_label).unwrap_or_default();
        summary.iso_time = first_attr(el, &self.sel.start_time, "datetime").unwrap_or_default();
        summary.score = first_text(el, &self.sel.score).unwrap_or_default();
        summary.half_time_score = first_text(el, &self.sel.half_time).unwrap_or_default();
        summary.extra_time = first_text(el, &self.sel.extra_time).unwrap_or_default();
        summary.extra_minute = first_text(el, &self.sel.extra_minute).unwrap_or_default();
        summary.live_odds = first_text(el, &self.sel.live_odds).unwrap_or_default();
        Ok(summary)
    }
}

struct DetailSelectors {
    tables: Vec<Selector>,
    row: Selector,
    stat_row: Selector,
    cell: Selector,
    team_container: Selector,
    team_left: Selector,
    team_right: Selector,
    league_link: Selector,
}

impl DetailSelectors {
    fn compile() -> Result<Self, AdapterError> {
        Ok(Self {
            tables: STANDINGS_TABLES
                .iter()
                .map(|s| compile(s))
                .collect::<Result<_, _>>()?,
            row: compile("tr")?,
            stat_row: compile("tr.color0, tr.color1")?,
            cell: compile("td")?,
            team_container: compile("div.teamtablesp_container")?,
            team_left: compile("span.teamtableleft")?,
            team_right: compile("span.teamtableright")?,
            league_link: compile("div.teamtablesp_container center.leagpredlnk a.leagpred_btn")?,
        })
    }
}

/// Reads standings and league data from a match detail page.
pub struct DetailExtractor {
    sel: DetailSelectors,
}

impl DetailExtractor {
    pub fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            sel: DetailSelectors::compile()?,
        })
    }

    /// Never fails: anything not found is left empty.
    pub fn extract_detail(&self, html: &str, home_team: &str, away_team: &str) -> MatchDetail {
        let document = Html::parse_document(html);
        let tables: Vec<ElementRef<'_>> = self
            .sel
            .tables
            .iter()
            .filter_map(|sel| document.select(sel).next())
            .collect();

        MatchDetail {
            home_rank: self.find_rank(&document, &tables, home_team),
            away_rank: self.find_rank(&document, &tables, away_team),
            league: document
                .select(&self.sel.league_link)
                .next()
                .map(element_text)
                .unwrap_or_default(),
            home: self.find_standing(&tables, home_team),
            away: self.find_standing(&tables, away_team),
        }
    }

    fn find_rank(&self, document: &Html, tables: &[ElementRef<'_>], team: &str) -> String {
        let needle = team.trim().to_lowercase();
        if needle.is_empty() {
            return String::new();
        }

        for table in tables {
            for row in table.select(&self.sel.row) {
                let cells: Vec<_> = row.select(&self.sel.cell).collect();
                if cells.len() >= 2 && element_text(cells[1]).to_lowercase().contains(&needle) {
                    return element_text(cells[0]);
                }
            }
        }

        if let Some(container) = document.select(&self.sel.team_container).next() {
            for side in [&self.sel.team_left, &self.sel.team_right] {
                if let Some(text) = first_text(container, side) {
                    if text.to_lowercase().contains(&needle) {
                        return text.split_whitespace().next().unwrap_or_default().to_string();
                    }
                }
            }
        }

        debug!(team, "no rank found");
        String::new()
    }

    fn find_standing(&self, tables: &[ElementRef<'_>], team: &str) -> TeamStanding {
        let needle = team.trim().to_lowercase();
        if needle.is_empty() {
            return TeamStanding::default();
        }

        for table in tables {
            for row in table.select(&self.sel.stat_row) {
                let cells: Vec<String> = row.select(&self.sel.cell).map(element_text).collect();
                if cells.len() < STAT_MIN_CELLS {
                    continue;
                }
                if cells[1].to_lowercase().contains(&needle) {
                    return TeamStanding {
                        points: cells[2].clone(),
                        played: cells[3].clone(),
                        wins: cells[4].clone(),
                        draws: cells[5].clone(),
                        losses: cells[6].clone(),
                        goals_for: cells[7].clone(),
                        goals_against: cells[8].clone(),
                        goal_diff: cells[9].clone(),
                    };
                }
            }
        }

        warn!(team, "no standings found");
        TeamStanding::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipwatch_core::DEFAULT_BASE_URL;

    fn entry(game: &str, href: &str, probs: &[&str]) -> String {
        let spans = probs
            .iter()
            .map(|p| format!("<span>{p}</span>"))
            .collect::<String>();
        format!(
            r#"<div class="rcnt">
                 <meta itemprop="name" content="{game}">
                 <a class="tnmscn" href="{href}"><span class="homeTeam">Home</span><span class="awayTeam">Away</span></a>
                 <div class="fprc">{spans}</div>
                 <span class="forepr">X</span>
               </div>"#
        )
    }

    #[test]
    fn malformed_probability_counts_do_not_affect_neighbours() {
        let html = format!(
            "<html><body>{}{}{}</body></html>",
            entry("First", "/en/m/1", &["40", "30", "30"]),
            entry("Broken", "/en/m/2", &["50", "50"]),
            entry("Third", "/en/m/3", &["10", "20", "70"]),
        );
        let extractor = ListingExtractor::new(DEFAULT_BASE_URL).unwrap();
        let summaries = extractor.extract_summaries(&html);
        let games: Vec<_> = summaries.iter().map(|s| s.game.as_str()).collect();
        assert_eq!(games, vec!["First", "Third"]);
        assert_eq!(summaries[1].prob_away, "70");
        assert_eq!(summaries[0].match_url, "https://www.forebet.com/en/m/1");
    }

    #[test]
    fn entry_without_league_heading_has_empty_league() {
        let html = entry("Solo", "/en/m/9", &["1", "2", "3"]);
        let extractor = ListingExtractor::new(DEFAULT_BASE_URL).unwrap();
        let summaries = extractor.extract_summaries(&html);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].league, "");
        assert_eq!(summaries[0].score, "");
    }

    #[test]
    fn short_rows_are_skipped_and_empty_team_never_matches() {
        let html = r#"<div id="stand_hidden"><table class="standings">
            <tr class="color0"><td>1</td><td>Rovers</td><td>9</td></tr>
            <tr class="color1"><td>2</td><td>Rovers</td><td>30</td><td>12</td><td>9</td><td>3</td><td>0</td><td>25</td><td>8</td><td>17</td></tr>
        </table></div>"#;
        let extractor = DetailExtractor::new().unwrap();
        let detail = extractor.extract_detail(html, "rovers", "");
        assert_eq!(detail.home_rank, "1");
        assert_eq!(detail.home.points, "30");
        assert_eq!(detail.home.goal_diff, "17");
        assert_eq!(detail.away_rank, "");
        assert!(detail.away.is_empty());
    }

    #[test]
    fn rank_falls_back_to_team_container() {
        let html = r#"<div class="teamtablesp_container">
            <span class="teamtableleft">4 Harbour City</span>
            <span class="teamtableright">11 Valley Town</span>
            <center class="leagpredlnk"><a class="leagpred_btn">Coastal League</a></center>
        </div>"#;
        let extractor = DetailExtractor::new().unwrap();
        let detail = extractor.extract_detail(html, "Harbour City", "Valley Town");
        assert_eq!(detail.home_rank, "4");
        assert_eq!(detail.away_rank, "11");
        assert_eq!(detail.league, "Coastal League");
        assert!(detail.home.is_empty());
    }

    #[test]
    fn unrelated_document_yields_empty_detail() {
        let extractor = DetailExtractor::new().unwrap();
        let detail = extractor.extract_detail("<html><p>challenge page</p></html>", "A", "B");
        assert!(detail.is_empty());
    }
}
