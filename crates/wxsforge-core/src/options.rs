use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wxsforge_contracts::WXSFORGE_CONFIG_SCHEMA_VERSION;

use crate::guid::GuidMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportState {
    /// Treated the same as `Enabled`.
    Automatic,
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoElementsOptions {
    pub disable_auto_key_path: bool,
    pub disable_auto_user_profile_registry: bool,
    /// Give every component the per-user registry key path, in or out of the
    /// user profile.
    pub force_user_profile_registry: bool,
    pub support_empty_directories: SupportState,
    /// Host orphan components in `ProgramFilesFolder\WxsForge\DummyDir`
    /// instead of directly under the program files folder.
    pub legacy_dummy_dir_algorithm: bool,
}

impl AutoElementsOptions {
    pub fn empty_directories_enabled(&self) -> bool {
        self.support_empty_directories != SupportState::Disabled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdOptions {
    pub do_not_reset: bool,
    pub suppress_reset_warning: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuidOptions {
    pub mode: GuidMode,
    pub base: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    Absolute,
    #[default]
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Msi,
    Msm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputOptions {
    pub path_mode: PathMode,
    /// Directory relative source paths are resolved against. Defaults to the
    /// process working directory.
    pub source_base_dir: Option<PathBuf>,
    pub output_type: OutputType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub auto_elements: AutoElementsOptions,
    pub ids: IdOptions,
    pub guid: GuidOptions,
    pub output: OutputOptions,
}

/// On-disk form of `wxsforge.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub schema_version: String,
    #[serde(default)]
    pub auto_elements: AutoElementsOptions,
    #[serde(default)]
    pub ids: IdOptions,
    #[serde(default)]
    pub guid: GuidOptions,
    #[serde(default)]
    pub output: OutputOptions,
}

impl From<ConfigFile> for BuildOptions {
    fn from(cfg: ConfigFile) -> Self {
        BuildOptions {
            auto_elements: cfg.auto_elements,
            ids: cfg.ids,
            guid: cfg.guid,
            output: cfg.output,
        }
    }
}

pub fn parse_config(bytes: &[u8]) -> Result<BuildOptions> {
    let cfg: ConfigFile = serde_json::from_slice(bytes).context("parse config JSON")?;
    if cfg.schema_version.trim() != WXSFORGE_CONFIG_SCHEMA_VERSION {
        anyhow::bail!(
            "config schema_version mismatch: expected {WXSFORGE_CONFIG_SCHEMA_VERSION} got {:?}",
            cfg.schema_version
        );
    }
    Ok(cfg.into())
}

/// Loads a config file. A relative `output.source_base_dir` is taken relative
/// to the directory holding the config file.
pub fn load_config(path: &Path) -> Result<BuildOptions> {
    let bytes = std::fs::read(path).with_context(|| format!("read config: {}", path.display()))?;
    let mut opts =
        parse_config(&bytes).with_context(|| format!("load config: {}", path.display()))?;
    if let Some(dir) = opts.output.source_base_dir.as_mut() {
        if dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            *dir = base.join(&*dir);
        }
    }
    Ok(opts)
}
