use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// "S1:E1", "Season 2: Episode 4", "Staffel 1: Folge 3", "Т1:С5".
static RE_EPISODE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\p{L}+(?:.\s?)?(\d+)\s?:\s?\p{L}+(?:.\s?)?(\d+)$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Show {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Season {
    pub number: u32,
    pub show: Show,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Episode {
    pub number: u32,
    pub season: Season,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Movie {
    pub title: String,
}

/// What is playing, derived from the player's title and subtitle text.
/// Compared by value; two parses of the same text are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaIdentity {
    Movie(Movie),
    Episode(Episode),
    Season(Season),
    Show(Show),
}

impl MediaIdentity {
    pub fn movie(title: impl Into<String>) -> Self {
        Self::Movie(Movie {
            title: title.into(),
        })
    }

    pub fn episode(show: impl Into<String>, season: u32, episode: u32) -> Self {
        Self::Episode(Episode {
            number: episode,
            season: Season {
                number: season,
                show: Show { title: show.into() },
            },
        })
    }

    /// Movie title or show title.
    pub fn title(&self) -> &str {
        match self {
            Self::Movie(m) => &m.title,
            Self::Episode(e) => &e.season.show.title,
            Self::Season(s) => &s.show.title,
            Self::Show(s) => &s.title,
        }
    }
}

impl fmt::Display for MediaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie(m) => write!(f, "{}", m.title),
            Self::Episode(e) => write!(
                f,
                "{} S{:02}E{:02}",
                e.season.show.title, e.season.number, e.number
            ),
            Self::Season(s) => write!(f, "{} S{:02}", s.show.title, s.number),
            Self::Show(s) => write!(f, "{}", s.title),
        }
    }
}

/// Build an identity from the player's title and subtitle text.
///
/// Without a non-empty subtitle the title is a movie. Otherwise the first
/// non-empty subtitle must read as a season/episode label; anything else
/// yields `None`.
pub fn parse(title: Option<&str>, subtitles: &[String]) -> Option<MediaIdentity> {
    let title = title.map(str::trim).filter(|t| !t.is_empty())?;

    let Some(label) = subtitles.iter().map(|s| s.trim()).find(|s| !s.is_empty()) else {
        return Some(MediaIdentity::movie(title));
    };

    let Some(caps) = RE_EPISODE_LABEL.captures(label) else {
        warn!(title, label, "Unable to parse episode label");
        return None;
    };
    let (Ok(season), Ok(episode)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
        warn!(title, label, "Episode label numbers out of range");
        return None;
    };

    Some(MediaIdentity::episode(title, season, episode))
}
