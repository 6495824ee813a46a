//! Inspector profile storage
//!
//! Handles saving and loading the inspector's profile to a JSON file in the
//! platform config directory. The profile currently carries the jurisdiction
//! used to localize generated statement wording.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

/// Fallback jurisdiction when the profile has none
pub(crate) const DEFAULT_JURISDICTION: &str = "WA";

/// Inspector profile
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Profile {
    /// Two-letter region code for statement wording (e.g. "WA", "OR")
    pub(crate) jurisdiction: Option<String>,
}

/// Get the profile file path
fn profile_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("snagscribe").join("profile.json"))
}

/// Load the profile, falling back to defaults on any problem
///
/// A missing file is the normal first-run case and is not logged; a file
/// that exists but cannot be read or parsed is.
pub(crate) fn load_profile() -> Profile {
    let Some(path) = profile_path() else {
        return Profile::default();
    };

    match fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            error!("Profile at {:?} is malformed, starting fresh: {}", path, e);
            Profile::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Profile::default(),
        Err(e) => {
            error!("Could not read profile at {:?}: {}", path, e);
            Profile::default()
        }
    }
}

/// Persist the profile to disk, creating the directory on first save
pub(crate) fn save_profile(profile: &Profile) -> Result<(), ProfileError> {
    let path = profile_path().ok_or(ProfileError::NoConfigDir)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(profile)?)?;
    info!("Profile written to {:?}", path);
    Ok(())
}

/// Jurisdiction from the profile, falling back to [`DEFAULT_JURISDICTION`]
pub(crate) fn get_jurisdiction() -> String {
    load_profile()
        .jurisdiction
        .filter(|j| !j.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_JURISDICTION.to_string())
}

/// Set the jurisdiction in the profile
pub(crate) fn set_jurisdiction(code: &str) -> Result<(), ProfileError> {
    let mut profile = load_profile();
    profile.jurisdiction = Some(code.to_uppercase());
    save_profile(&profile)
}

/// Convert a jurisdiction code to its display name
pub(crate) fn jurisdiction_name(code: &str) -> &str {
    match code {
        "WA" => "Washington",
        "OR" => "Oregon",
        "CA" => "California",
        "TX" => "Texas",
        "FL" => "Florida",
        "NY" => "New York",
        _ => code, // Display the code itself for unmapped regions
    }
}

/// Profile persistence errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProfileError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("Failed to serialize profile: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write profile: {0}")]
    Write(#[from] std::io::Error),
}
