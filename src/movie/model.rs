use crate::aggregate::{Section, SortPriority};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image root used when none is configured.
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

/// Envelope of every list and search response.
#[derive(Debug, Clone, Deserialize)]
pub struct MovieResponse {
    pub results: Vec<Movie>,
}

/// A movie as returned by list, search and detail endpoints.
///
/// List and search results leave `runtime`, `genres`, `credits` and `videos`
/// empty; the detail endpoint fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: u64,
    pub title: String,
    pub backdrop_path: Option<String>,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u64,
    pub runtime: Option<u32>,
    pub release_date: Option<String>,
    pub genres: Option<Vec<MovieGenre>>,
    pub credits: Option<MovieCredit>,
    pub videos: Option<MovieVideoResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieGenre {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieCredit {
    pub cast: Vec<MovieCast>,
    pub crew: Vec<MovieCrew>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieCast {
    pub id: u64,
    pub character: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieCrew {
    pub id: u64,
    pub job: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieVideoResponse {
    pub results: Vec<MovieVideo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieVideo {
    pub id: String,
    pub key: String,
    pub name: String,
    pub site: String,
}

impl MovieVideo {
    /// Watch URL for YouTube-hosted videos.
    pub fn youtube_url(&self) -> Option<String> {
        (self.site == "YouTube").then(|| format!("https://youtube.com/watch?v={}", self.key))
    }
}

fn image_url(image_base: &str, path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{}{}", image_base.trim_end_matches('/'), p))
}

impl Movie {
    pub fn backdrop_url(&self, image_base: &str) -> Option<String> {
        image_url(image_base, self.backdrop_path.as_deref())
    }

    pub fn poster_url(&self, image_base: &str) -> Option<String> {
        image_url(image_base, self.poster_path.as_deref())
    }

    pub fn genre_text(&self) -> String {
        self.genres
            .as_ref()
            .and_then(|genres| genres.first())
            .map(|genre| genre.name.clone())
            .unwrap_or_else(|| "Unknown genre".to_string())
    }

    /// One star per whole point of the average vote.
    pub fn rating_text(&self) -> String {
        let stars = self.vote_average.max(0.0) as usize;
        "★".repeat(stars)
    }

    pub fn score_text(&self) -> String {
        let stars = self.rating_text().chars().count();
        if stars == 0 {
            return "No rating is available".to_string();
        }
        format!("{stars}/10")
    }

    pub fn year_text(&self) -> String {
        self.release_date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
            .map(|date| date.year().to_string())
            .unwrap_or_else(|| "Unknown release date".to_string())
    }

    /// Runtime spelled out in hours and minutes, e.g. "2 hours, 19 minutes".
    pub fn duration_text(&self) -> String {
        let Some(runtime) = self.runtime.filter(|&r| r > 0) else {
            return "Unknown duration".to_string();
        };

        let (hours, minutes) = (runtime / 60, runtime % 60);
        let unit = |n: u32, singular: &str| {
            if n == 1 {
                format!("1 {singular}")
            } else {
                format!("{n} {singular}s")
            }
        };

        match (hours, minutes) {
            (0, m) => unit(m, "minute"),
            (h, 0) => unit(h, "hour"),
            (h, m) => format!("{}, {}", unit(h, "hour"), unit(m, "minute")),
        }
    }

    pub fn cast(&self) -> &[MovieCast] {
        self.credits
            .as_ref()
            .map(|c| c.cast.as_slice())
            .unwrap_or_default()
    }

    pub fn crew(&self) -> &[MovieCrew] {
        self.credits
            .as_ref()
            .map(|c| c.crew.as_slice())
            .unwrap_or_default()
    }

    fn crew_with_job(&self, job: &str) -> Vec<&MovieCrew> {
        self.crew()
            .iter()
            .filter(|member| member.job.eq_ignore_ascii_case(job))
            .collect()
    }

    pub fn directors(&self) -> Vec<&MovieCrew> {
        self.crew_with_job("director")
    }

    pub fn producers(&self) -> Vec<&MovieCrew> {
        self.crew_with_job("producer")
    }

    pub fn screen_writers(&self) -> Vec<&MovieCrew> {
        self.crew_with_job("story")
    }

    pub fn youtube_trailers(&self) -> Vec<&MovieVideo> {
        self.videos
            .as_ref()
            .map(|videos| {
                videos
                    .results
                    .iter()
                    .filter(|video| video.youtube_url().is_some())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The movie lists shown on the home screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovieListEndpoint {
    NowPlaying,
    Upcoming,
    TopRated,
    Popular,
}

impl MovieListEndpoint {
    pub const ALL: [MovieListEndpoint; 4] = [
        MovieListEndpoint::NowPlaying,
        MovieListEndpoint::Upcoming,
        MovieListEndpoint::TopRated,
        MovieListEndpoint::Popular,
    ];

    /// Path segment under `/movie/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovieListEndpoint::NowPlaying => "now_playing",
            MovieListEndpoint::Upcoming => "upcoming",
            MovieListEndpoint::TopRated => "top_rated",
            MovieListEndpoint::Popular => "popular",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MovieListEndpoint::NowPlaying => "Now Playing",
            MovieListEndpoint::Upcoming => "Upcoming",
            MovieListEndpoint::TopRated => "Top Rated",
            MovieListEndpoint::Popular => "Popular",
        }
    }
}

impl SortPriority for MovieListEndpoint {
    fn sort_priority(&self) -> u32 {
        match self {
            MovieListEndpoint::NowPlaying => 0,
            MovieListEndpoint::Upcoming => 1,
            MovieListEndpoint::TopRated => 2,
            MovieListEndpoint::Popular => 3,
        }
    }
}

impl fmt::Display for MovieListEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// How a section's movies are best displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailType {
    Poster,
    Backdrop,
}

/// One list of the home feed.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieSection {
    pub endpoint: MovieListEndpoint,
    pub movies: Vec<Movie>,
}

impl MovieSection {
    pub fn title(&self) -> &'static str {
        self.endpoint.description()
    }

    pub fn thumbnail_type(&self) -> ThumbnailType {
        match self.endpoint {
            MovieListEndpoint::NowPlaying => ThumbnailType::Poster,
            _ => ThumbnailType::Backdrop,
        }
    }
}

impl From<Section<MovieListEndpoint, Vec<Movie>>> for MovieSection {
    fn from(section: Section<MovieListEndpoint, Vec<Movie>>) -> Self {
        Self {
            endpoint: section.key,
            movies: section.value,
        }
    }
}
