use std::path::{Path, PathBuf};

use irvmodel::{
    constraints::{ConstraintRecord, manager::UnknownConstraintPolicy},
    tech::{MetalLayerRecord, Stackup},
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    magic::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_SOURCE_EXTENSION, ENV_PROJECT_CONFIG_PATH},
    utils::error::{IrvError, IrvResult},
};

/// Where hardware-description sources are found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directories scanned recursively, in order.
    pub dirs: Vec<PathBuf>,
    /// Explicit files, scanned after the directories in the given order.
    pub files: Vec<PathBuf>,
    pub extension: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            files: Vec::new(),
            extension: DEFAULT_SOURCE_EXTENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyMacroConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Macro library files: parsed at load time, or on first use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacrosConfig {
    pub eager: Vec<PathBuf>,
    pub lazy: Vec<LazyMacroConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub on_unknown_constraint: UnknownConstraintPolicy,
    /// Publish a snapshot every this many coarse steps (files, records).
    pub publish_interval: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            on_unknown_constraint: UnknownConstraintPolicy::Skip,
            publish_interval: 1,
        }
    }
}

/// Everything needed to load one design.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_module: Option<String>,
    pub sources: SourcesConfig,
    pub macros: MacrosConfig,
    pub load: LoadConfig,
    pub stackup: Vec<MetalLayerRecord>,
    pub placement_constraints: Vec<ConstraintRecord>,
}

impl ProjectConfig {
    /// Get the default path to the project file.
    pub fn default_path() -> PathBuf {
        if let Ok(config_path) = std::env::var(ENV_PROJECT_CONFIG_PATH) {
            return config_path.into();
        }

        let mut path = PathBuf::new();

        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                path.push(appdata);
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
                path.push(xdg_config_home);
            } else if let Ok(home) = std::env::var("HOME") {
                path.push(home);
                path.push(".config");
            }
        }

        path.push(CONFIG_DIR_NAME);
        path.push(CONFIG_FILE_NAME);
        path
    }

    /// Parse a project from TOML text. Paths are kept as written.
    pub fn from_toml_str(text: &str) -> IrvResult<Self> {
        toml::from_str(text).map_err(|e| IrvError::ManifestParseError {
            source: e,
            file: "<inline>".to_string(),
        })
    }

    /// Load a project file; relative paths are taken from the file's directory.
    pub fn load_from_toml(path: &Path) -> IrvResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;

        let mut config: Self = toml::from_str(&toml_str).map_err(|e| IrvError::ManifestParseError {
            source: e,
            file: path.display().to_string(),
        })?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        debug!("Loaded project file `{}`", path.display());
        Ok(config)
    }

    /// Save the project to a TOML file, creating parent directories.
    pub fn save_to_toml(&self, path: &Path) -> IrvResult<()> {
        let toml_str = toml::to_string(self).map_err(|e| {
            IrvError::Unknown(format!(
                "Failed during serialization of TOML to path `{}`: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Make every relative path absolute against `base`.
    pub fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.sources.dirs.iter_mut().for_each(rebase);
        self.sources.files.iter_mut().for_each(rebase);
        self.macros.eager.iter_mut().for_each(rebase);
        self.macros
            .lazy
            .iter_mut()
            .for_each(|entry| rebase(&mut entry.path));
    }

    /// Validated stackup, or `None` when no layer is configured.
    pub fn stackup(&self) -> IrvResult<Option<Stackup>> {
        if self.stackup.is_empty() {
            return Ok(None);
        }
        Ok(Some(Stackup::from_records(&self.stackup)?))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bigdecimal::BigDecimal;

    use super::*;

    const PROJECT: &str = r#"
top_module = "chip"

[sources]
dirs = ["rtl"]
files = ["/abs/extra.v"]
extension = "v"

[macros]
eager = ["tech/stdcells.lef"]

[[macros.lazy]]
name = "sram_1k"
path = "tech/sram_1k.lef"

[load]
on_unknown_constraint = "abort"

[[stackup]]
name = "M1"
direction = "horizontal"
pitch = "0.14"

[[stackup]]
name = "M2"
direction = "vertical"
pitch = 0.2

[[placement_constraints]]
path = "chip"
type = "toplevel"
x = 0
y = 0
width = "400.05"
height = 300

[[placement_constraints]]
path = "chip/u_core"
type = "hierarchical"
master = "core"
x = 10
y = 10

[placement_constraints.margins]
left = 1.5
"#;

    #[test]
    fn parses_full_project() {
        let config = ProjectConfig::from_toml_str(PROJECT).unwrap();
        assert_eq!(config.top_module.as_deref(), Some("chip"));
        assert_eq!(config.sources.extension, "v");
        assert_eq!(config.macros.lazy[0].name, "sram_1k");
        assert!(config.load.on_unknown_constraint.is_abort());
        assert_eq!(config.load.publish_interval, 1);

        let stackup = config.stackup().unwrap().unwrap();
        assert_eq!(stackup.layer("M2").unwrap().pitch(), &BigDecimal::from_str("0.2").unwrap());

        let outline = &config.placement_constraints[0];
        assert_eq!(outline.width, Some(BigDecimal::from_str("400.05").unwrap()));
        let child = &config.placement_constraints[1];
        assert_eq!(child.master.as_deref(), Some("core"));
        assert_eq!(
            child.margins.as_ref().unwrap().left,
            BigDecimal::from_str("1.5").unwrap()
        );
        assert!(child.width.is_none());
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let config = ProjectConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.sources.extension, DEFAULT_SOURCE_EXTENSION);
        assert!(config.stackup().unwrap().is_none());
    }

    #[test]
    fn bad_direction_surfaces_as_model_error() {
        let config = ProjectConfig::from_toml_str(
            "[[stackup]]\nname = \"M1\"\ndirection = \"diagonal\"\npitch = 1\n",
        )
        .unwrap();
        assert!(matches!(
            config.stackup(),
            Err(IrvError::Model(e)) if e.is_unknown_direction()
        ));
    }

    #[test]
    fn save_and_reload_rebases_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/project.toml");
        let config = ProjectConfig::from_toml_str(PROJECT).unwrap();
        config.save_to_toml(&path).unwrap();

        let reloaded = ProjectConfig::load_from_toml(&path).unwrap();
        assert_eq!(reloaded.sources.dirs, [dir.path().join("nested/rtl")]);
        assert_eq!(reloaded.sources.files, [PathBuf::from("/abs/extra.v")]);
        assert_eq!(
            reloaded.macros.lazy[0].path,
            dir.path().join("nested/tech/sram_1k.lef")
        );
        assert_eq!(reloaded.stackup, config.stackup);
        assert_eq!(reloaded.placement_constraints, config.placement_constraints);
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "top_module = ").unwrap();
        match ProjectConfig::load_from_toml(&path) {
            Err(IrvError::ManifestParseError { file, .. }) => assert!(file.ends_with("broken.toml")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
