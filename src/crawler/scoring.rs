//! Relevance scoring for fetched pages and their outgoing links
//!
//! Scorers are pure and untrusted: whatever they return is clamped again by
//! the frontier merge before it reaches the store. [`KeywordScorer`] is the
//! default heuristic; [`frontier_candidates`] turns any scorer's link scores
//! into ranked merge candidates.

use crate::config::{FrontierConfig, ScoringConfig};
use crate::crawler::parser::{PageLink, ParsedPage};
use crate::frontier::clamp_relevance;
use crate::url::host_affinity;
use url::Url;

/// Page text considered for term density, in characters
const MAX_SCORED_TEXT: usize = 5000;

/// Links considered when judging a page's outgoing link quality
const LINK_QUALITY_SAMPLE: usize = 15;

/// Paths with more segments than this are penalized as deep
const SHALLOW_PATH_SLASHES: usize = 5;

const DEFAULT_TOPIC_TERMS: &[&str] = &[
    "map",
    "mapping",
    "geospatial",
    "geography",
    "terrain",
    "satellite",
    "imagery",
    "street",
    "city",
    "urban",
    "vps",
    "localization",
    "positioning",
    "ar",
    "xr",
    "robot",
    "robotics",
    "autonomous",
    "drone",
    "navigation",
    "wayfinding",
    "3d",
    "reconstruction",
    "sfm",
    "gaussian",
    "splatting",
    "mesh",
    "pointcloud",
    "coordinate",
    "gis",
    "lidar",
];

const DEFAULT_NOISE_TERMS: &[&str] = &[
    "login",
    "signup",
    "privacy",
    "terms",
    "careers",
    "contact",
    "cookie",
    "advertise",
    "sponsor",
];

/// Per-page relevance features, each in `[0, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PageSignals {
    pub topic_density: f64,
    pub freshness: f64,
    pub structured_data: f64,
    pub link_quality: f64,
}

impl PageSignals {
    /// Weighted page relevance
    pub fn aggregate(&self) -> f64 {
        clamp_relevance(
            self.topic_density * 0.42
                + self.freshness * 0.18
                + self.structured_data * 0.22
                + self.link_quality * 0.18,
        )
    }
}

/// Why a link scored the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateReason {
    TopicDense,
    HostAffinity,
    LikelyNoise,
    Explore,
}

impl CandidateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateReason::TopicDense => "topic-dense",
            CandidateReason::HostAffinity => "host-affinity",
            CandidateReason::LikelyNoise => "likely-noise",
            CandidateReason::Explore => "explore",
        }
    }
}

impl std::fmt::Display for CandidateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Score of a single outgoing link, before blending with its page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkScore {
    pub score: f64,
    pub reason: CandidateReason,
}

/// A link proposed for the frontier
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCandidate {
    pub url: Url,
    /// Link score blended with the page's relevance
    pub relevance_score: f64,
    pub priority: i64,
    pub reason: CandidateReason,
}

/// Pluggable relevance heuristic
pub trait RelevanceScorer: Send + Sync {
    /// Relevance features of a fetched page
    fn page_signals(&self, url: &Url, page: &ParsedPage) -> PageSignals;

    /// Relevance of following `link` out of `parent`
    fn score_link(&self, parent: &Url, link: &PageLink) -> LinkScore;
}

/// Keyword-density heuristic over topic and noise vocabularies
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    topic_terms: Vec<String>,
    noise_terms: Vec<String>,
}

impl KeywordScorer {
    pub fn new(topic_terms: Vec<String>, noise_terms: Vec<String>) -> Self {
        Self {
            topic_terms: topic_terms.into_iter().map(|t| t.to_lowercase()).collect(),
            noise_terms: noise_terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            config
                .topic_terms
                .clone()
                .unwrap_or_else(|| owned(DEFAULT_TOPIC_TERMS)),
            config
                .noise_terms
                .clone()
                .unwrap_or_else(|| owned(DEFAULT_NOISE_TERMS)),
        )
    }

    fn mentions_topic(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.topic_terms.iter().any(|term| lowered.contains(term))
    }
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new(owned(DEFAULT_TOPIC_TERMS), owned(DEFAULT_NOISE_TERMS))
    }
}

fn owned(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

/// Fraction of `terms` found in `text`, scaled so about a third of the
/// vocabulary counts as a full hit
fn keyword_hits(text: &str, terms: &[String]) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let lowered = text.to_lowercase();
    let hits = terms.iter().filter(|term| lowered.contains(term.as_str())).count();
    hits as f64 / (terms.len() as f64 * 0.35).max(1.0)
}

/// True if `text` contains a standalone year in 2024..=2039
fn mentions_recent_year(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 4)
        .filter_map(|token| token.parse::<u32>().ok())
        .any(|year| (2024..=2039).contains(&year))
}

impl RelevanceScorer for KeywordScorer {
    fn page_signals(&self, url: &Url, page: &ParsedPage) -> PageSignals {
        let text: String = page.text.chars().take(MAX_SCORED_TEXT).collect();
        let blob = format!(
            "{}\n{}\n{}\n{}",
            url,
            page.title.as_deref().unwrap_or(""),
            page.description.as_deref().unwrap_or(""),
            text
        );

        let topic_density = clamp_relevance(keyword_hits(&blob, &self.topic_terms) * 3.4);

        let mut freshness: f64 = 0.0;
        if page.published.is_some() {
            freshness = 0.65;
        }
        if mentions_recent_year(&blob) {
            freshness = freshness.max(0.8);
        }

        let mut structured_data: f64 = 0.0;
        if page.has_json_ld {
            structured_data = 0.7;
        }
        let lowered = text.to_lowercase();
        if page.has_microdata
            || ["schema.org", "latitude", "longitude"]
                .iter()
                .any(|marker| lowered.contains(marker))
        {
            structured_data = structured_data.max(0.6);
        }

        let strong = page
            .links
            .iter()
            .filter(|link| self.mentions_topic(&format!("{} {}", link.url, link.text)))
            .count();
        let sample = page.links.len().clamp(1, LINK_QUALITY_SAMPLE);
        let link_quality = clamp_relevance(strong as f64 / sample as f64);

        PageSignals {
            topic_density,
            freshness,
            structured_data,
            link_quality,
        }
    }

    fn score_link(&self, parent: &Url, link: &PageLink) -> LinkScore {
        let blob = format!("{} {}", link.url, link.text);
        let topic = clamp_relevance(keyword_hits(&blob, &self.topic_terms) * 3.7);
        let noise = clamp_relevance(keyword_hits(&blob, &self.noise_terms) * 2.6);

        let slashes = link.url.path().matches('/').count();
        let depth_penalty = if slashes > SHALLOW_PATH_SLASHES {
            ((slashes - SHALLOW_PATH_SLASHES) as f64 * 0.05).min(0.28)
        } else {
            0.0
        };

        let host = host_affinity(parent, &link.url);
        let score =
            clamp_relevance(topic * 0.62 + host * 0.28 + (1.0 - noise) * 0.10 - depth_penalty);

        let reason = if topic > 0.7 {
            CandidateReason::TopicDense
        } else if host > 0.9 {
            CandidateReason::HostAffinity
        } else if noise > 0.3 {
            CandidateReason::LikelyNoise
        } else {
            CandidateReason::Explore
        };

        LinkScore { score, reason }
    }
}

/// Scores a page's links and returns the best ones as frontier candidates
///
/// Each link's score is blended with the page's relevance, and shallower
/// pages hand out a priority bonus. A page at or beyond `max_depth`
/// contributes nothing. The result is ordered best first and capped at
/// `max_links`.
pub fn frontier_candidates(
    scorer: &dyn RelevanceScorer,
    parent: &Url,
    page: &ParsedPage,
    page_score: f64,
    depth: u32,
    limits: &FrontierConfig,
) -> Vec<LinkCandidate> {
    if depth >= limits.max_depth {
        return Vec::new();
    }

    let page_score = clamp_relevance(page_score);
    let depth_bonus = (20 - 6 * i64::from(depth)).max(0);

    let mut candidates: Vec<LinkCandidate> = page
        .links
        .iter()
        .map(|link| {
            let scored = scorer.score_link(parent, link);
            let blended = clamp_relevance(scored.score * 0.72 + page_score * 0.28);
            LinkCandidate {
                url: link.url.clone(),
                relevance_score: blended,
                priority: (blended * 100.0).ceil() as i64 + depth_bonus,
                reason: scored.reason,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then(b.priority.cmp(&a.priority))
    });
    candidates.truncate(limits.max_links);
    candidates
}
