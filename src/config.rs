// ⚙️ Run configuration (TOML)
//
// [analysis]
// pairing = "same_rank"          # or "shared_members"
//
// [filter]
// retain_unmatched = false
// min_users = 0
// exclude_related = false
//
// [output]
// csv = "matches.csv"
// json = "report.json"
// sqlite = "org-match.db"

use crate::error::{OrgMatchError, Result};
use crate::filter::FilterOptions;
use crate::similarity::Pairing;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub filter: FilterOptions,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub pairing: Pairing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub csv: Option<PathBuf>,

    #[serde(default)]
    pub json: Option<PathBuf>,

    #[serde(default)]
    pub sqlite: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content)
            .map_err(|e| OrgMatchError::config(format!("failed to parse run config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        RunConfig::from_toml_str(&content)
    }

    /// Output targets must be distinct files
    pub fn validate(&self) -> Result<()> {
        let targets: Vec<&PathBuf> = [&self.output.csv, &self.output.json, &self.output.sqlite]
            .into_iter()
            .flatten()
            .collect();

        for (i, a) in targets.iter().enumerate() {
            if a.as_os_str().is_empty() {
                return Err(OrgMatchError::config("output path is empty"));
            }
            if targets[i + 1..].contains(a) {
                return Err(OrgMatchError::config(format!(
                    "output path used twice: {}",
                    a.display()
                )));
            }
        }

        #[cfg(not(feature = "sqlite"))]
        if self.output.sqlite.is_some() {
            return Err(OrgMatchError::config(
                "sqlite output requested but the sqlite feature is disabled",
            ));
        }

        Ok(())
    }
}
