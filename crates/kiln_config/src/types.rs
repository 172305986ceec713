//! Configuration types deserialized from `kiln.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The top-level project configuration parsed from `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Core project metadata (name, version, source directories).
    pub project: ProjectMeta,
    /// Cache location and reuse policy.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Build settings (granularity, output, parallelism).
    #[serde(default)]
    pub build: BuildConfig,
}

/// Core project metadata required in every `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// The project version string.
    #[serde(default)]
    pub version: String,
    /// Directories (or single files) scanned for `*.calc` sources, relative
    /// to the project root.
    ///
    /// Accepts either a single string or a list of strings.
    #[serde(
        default = "default_sources",
        deserialize_with = "deserialize_string_or_vec"
    )]
    pub sources: Vec<String>,
}

fn default_sources() -> Vec<String> {
    vec!["src".to_string()]
}

/// Where the cache lives and how it is reused.
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    /// Cache directory, relative to the project root.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Reuse results from the previous build.
    #[serde(default = "default_true")]
    pub incremental: bool,
    /// Drop cached nodes a build no longer reaches.
    #[serde(default = "default_true")]
    pub prune_unvisited: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            incremental: true,
            prune_unvisited: true,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".kiln")
}

fn default_true() -> bool {
    true
}

/// Build configuration.
#[derive(Debug, Default, Deserialize)]
pub struct BuildConfig {
    /// How finely sources are carved into input nodes.
    #[serde(default)]
    pub granularity: Granularity,
    /// File the linked program is written to; standard output when absent.
    pub output: Option<PathBuf>,
    /// Worker threads; `0` uses one per core.
    #[serde(default)]
    pub jobs: usize,
}

/// How finely source text is carved into input nodes.
///
/// Coarser inputs mean fewer nodes and edges to track but more
/// invalidation per edit.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One input per source file. An edit anywhere in a file invalidates
    /// everything derived from that file.
    File,
    /// One input per definition, keyed by its name. Editing one definition
    /// leaves the others valid, even in the same file.
    #[default]
    Item,
}

impl Granularity {
    /// Returns the lowercase name used in configuration and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::File => "file",
            Granularity::Item => "item",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Granularity::File),
            "item" => Ok(Granularity::Item),
            other => Err(format!(
                "unknown granularity '{other}' (expected 'file' or 'item')"
            )),
        }
    }
}

/// Deserializes a field that can be either a single string or a list of strings.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}
