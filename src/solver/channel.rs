// src/solver/channel.rs

//! Channel names, aliases and URLs

use crate::error::{Error, Result};
use crate::matrix::Target;
use std::path::Path;
use url::Url;

/// Base URL for bare channel names such as `conda-forge`
pub const CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// Base URL of the `defaults` multichannel members
pub const DEFAULTS_BASE: &str = "https://repo.anaconda.com";

/// Replace `defaults` with its member channels and drop duplicates
///
/// Order is preserved; it is the channel priority.
pub fn expand_aliases(channels: &[String], target: &Target) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for channel in channels {
        let members = if channel == "defaults" {
            let mut members = vec!["pkgs/main".to_string(), "pkgs/r".to_string()];
            if target.platform() == "win" {
                members.push("pkgs/msys2".to_string());
            }
            members
        } else {
            vec![channel.clone()]
        };
        for member in members {
            if !out.contains(&member) {
                out.push(member);
            }
        }
    }
    out
}

/// Base URL of a channel
///
/// Accepts full URLs, local directories and names relative to
/// [`CHANNEL_ALIAS`]; `pkgs/*` names resolve under [`DEFAULTS_BASE`].
pub fn channel_url(channel: &str) -> Result<Url> {
    let invalid = |reason: String| Error::IndexError(format!("invalid channel '{}': {}", channel, reason));

    if channel.contains("://") {
        return Url::parse(channel).map_err(|e| invalid(e.to_string()));
    }

    let path = Path::new(channel);
    if path.is_absolute() || channel.starts_with("./") || channel.starts_with("../") || path.is_dir() {
        let absolute = std::path::absolute(path).map_err(|e| invalid(e.to_string()))?;
        return Url::from_directory_path(&absolute).map_err(|_| invalid("not a directory path".to_string()));
    }

    let base = if channel.starts_with("pkgs/") {
        DEFAULTS_BASE
    } else {
        CHANNEL_ALIAS
    };
    Url::parse(&format!("{}/{}", base, channel.trim_matches('/'))).map_err(|e| invalid(e.to_string()))
}

/// URL of `repodata.json` for one subdir of a channel
pub fn repodata_url(base: &Url, subdir: &str) -> Result<Url> {
    subdir_file_url(base, subdir, "repodata.json")
}

/// URL of a file stored next to `repodata.json`
pub fn subdir_file_url(base: &Url, subdir: &str, file: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("{}/{}", subdir, file))
        .map_err(|e| Error::IndexError(format!("invalid URL for {} under {}: {}", file, base, e)))
}
