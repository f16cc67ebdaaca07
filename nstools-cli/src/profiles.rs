use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nstools_packet::FaultProfile;
use serde::{Deserialize, Serialize};

use crate::args::FaultArgs;

/// A fault profile as stored on disk.
///
/// ```toml
/// description = "Frequent fragmentation changes"
///
/// [fault]
/// more_fragments = 0.9
/// ```
///
/// Probabilities missing from `[fault]` keep their default values.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoredProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fault: FaultProfile,
}

/// Shipped with the binary; `--save-profile` refuses these names.
const BUILTIN_NAMES: &[&str] = &["default", "gentle", "aggressive"];

fn builtin_profiles() -> Vec<(&'static str, StoredProfile)> {
    vec![
        (
            "default",
            StoredProfile {
                description: Some("Stock corruption probabilities".into()),
                fault: FaultProfile::default(),
            },
        ),
        (
            "gentle",
            StoredProfile {
                description: Some("Rare fragmentation changes, reserved flag never set".into()),
                fault: FaultProfile {
                    reserved_flag: 0.0,
                    more_fragments: 0.1,
                    clear_dont_fragment: 0.1,
                    fragment_offset: 0.1,
                    protocol_flip: 0.5,
                    protocol_unknown: 0.1,
                },
            },
        ),
        (
            "aggressive",
            StoredProfile {
                description: Some("Disturb fragmentation on nearly every send".into()),
                fault: FaultProfile {
                    reserved_flag: 0.5,
                    more_fragments: 0.9,
                    clear_dont_fragment: 0.9,
                    fragment_offset: 0.9,
                    protocol_flip: 0.3,
                    protocol_unknown: 0.7,
                },
            },
        ),
    ]
}

/// `$HOME/.nstools/profiles`, or `./.nstools/profiles` without a home.
fn profiles_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nstools/profiles")
}

/// Profile names become file names, so keep them to one plain path component.
fn validate_profile_name(name: &str) -> Result<()> {
    let plain = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if name.is_empty() || name.starts_with('.') || !name.chars().all(plain) {
        bail!(
            "profile name {name:?} must be letters, digits, '-', '_' or '.', not starting with '.'"
        );
    }
    if name.contains("..") {
        bail!("profile name {name:?} must not contain '..'");
    }
    Ok(())
}

/// Built-in profiles win over files of the same name.
pub fn load_profile(name: &str) -> Result<StoredProfile> {
    load_profile_from(&profiles_dir(), name)
}

fn load_profile_from(dir: &Path, name: &str) -> Result<StoredProfile> {
    validate_profile_name(name)?;

    if let Some((_, profile)) = builtin_profiles().into_iter().find(|(n, _)| *n == name) {
        return Ok(profile);
    }

    let path = profile_path(dir, name);
    if !path.is_file() {
        bail!("no profile named '{name}' (see --list-profiles)");
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let profile: StoredProfile =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    profile
        .fault
        .validate()
        .with_context(|| format!("{} holds invalid probabilities", path.display()))?;
    Ok(profile)
}

/// Save a profile under `name` in the user profile directory.
pub fn save_profile(name: &str, profile: &StoredProfile) -> Result<PathBuf> {
    save_profile_to(&profiles_dir(), name, profile)
}

fn save_profile_to(dir: &Path, name: &str, profile: &StoredProfile) -> Result<PathBuf> {
    validate_profile_name(name)?;

    if is_builtin(name) {
        bail!("'{name}' is a built-in profile and cannot be replaced");
    }
    profile.fault.validate()?;

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = profile_path(dir, name);
    let text = toml::to_string_pretty(profile).context("encoding profile as TOML")?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn profile_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.toml"))
}

fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Built-ins first, then user files sorted by name. The flag marks built-ins.
pub fn list_all_profiles() -> Vec<(String, StoredProfile, bool)> {
    list_profiles_in(&profiles_dir())
}

fn list_profiles_in(dir: &Path) -> Vec<(String, StoredProfile, bool)> {
    let mut profiles: Vec<_> = builtin_profiles()
        .into_iter()
        .map(|(name, profile)| (name.to_string(), profile, true))
        .collect();

    let Ok(entries) = std::fs::read_dir(dir) else {
        return profiles;
    };
    let mut user: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .filter_map(|path| {
            let name = path.file_stem()?.to_string_lossy().into_owned();
            if is_builtin(&name) {
                return None;
            }
            let text = std::fs::read_to_string(&path).ok()?;
            let profile = toml::from_str::<StoredProfile>(&text).ok()?;
            Some((name, profile, false))
        })
        .collect();
    user.sort_by(|a, b| a.0.cmp(&b.0));
    profiles.extend(user);

    profiles
}

pub fn show_profiles() {
    println!("Fault profiles:\n");
    for (name, profile, builtin) in list_all_profiles() {
        let origin = if builtin { "built-in" } else { "user" };
        let about = profile.description.as_deref().unwrap_or("-");
        println!("  {name:<16} {origin:<9} {about}");
    }

    println!(
        "\nUsage: nstools --profile <NAME> icmpv4 -f ...\n\
         Save:  nstools --profile <BASE> --p-more-fragments 0.8 --save-profile <NAME>"
    );
}

/// Overlay the probabilities given on the command line.
pub fn apply_overrides(profile: &mut FaultProfile, overrides: &FaultArgs) {
    let fields = [
        (&mut profile.reserved_flag, overrides.reserved_flag),
        (&mut profile.more_fragments, overrides.more_fragments),
        (&mut profile.clear_dont_fragment, overrides.clear_dont_fragment),
        (&mut profile.fragment_offset, overrides.fragment_offset),
        (&mut profile.protocol_flip, overrides.protocol_flip),
        (&mut profile.protocol_unknown, overrides.protocol_unknown),
    ];
    for (slot, value) in fields {
        if let Some(value) = value {
            *slot = value;
        }
    }
}

/// The profile in effect: `--profile` (or `default`) with overrides applied.
pub fn resolve(name: Option<&str>, overrides: &FaultArgs) -> Result<StoredProfile> {
    let mut profile = match name {
        Some(name) => {
            load_profile(name).with_context(|| format!("failed to load profile '{name}'"))?
        }
        None => load_profile("default")?,
    };
    apply_overrides(&mut profile.fault, overrides);
    profile
        .fault
        .validate()
        .context("invalid fault probabilities")?;
    Ok(profile)
}
