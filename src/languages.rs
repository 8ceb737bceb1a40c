//! Language configuration for compilation and execution

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// File in the sandbox working directory that is fed to the program as stdin
pub const INPUT_FILE: &str = "input.txt";

/// How a language turns source into a running program
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Compiled {
        build: Vec<String>,
        run: Vec<String>,
    },
    Interpreted {
        run: Vec<String>,
    },
}

/// Configuration for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Canonical language name (table key)
    pub name: String,
    /// Toolchain image
    pub image: String,
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    pub strategy: Strategy,
    /// Wall-clock budget for one sandbox run, compilation included
    pub timeout_ms: u64,
}

impl LanguageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Shell script executed inside the sandbox.
    ///
    /// Built only from this trusted configuration. The source file and
    /// `input.txt` are already in the working directory when it runs; the
    /// shell only ever sees their names.
    pub fn script(&self) -> String {
        match &self.strategy {
            Strategy::Compiled { build, run } => {
                format!("{} && {} < {}", build.join(" "), run.join(" "), INPUT_FILE)
            }
            Strategy::Interpreted { run } => format!("{} < {}", run.join(" "), INPUT_FILE),
        }
    }

    /// Argument vector handed to the container runtime
    pub fn command(&self) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), self.script()]
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    image: String,
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    timeout_ms: u64,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Language table, keyed by lowercase name and aliases
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: HashMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    /// The language table compiled into the binary
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml(content)
    }

    /// Load from `path` if given, otherwise use the built-in table
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read language config {:?}", path))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid language config {:?}", path))
            }
            None => Self::builtin(),
        }
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut languages = HashMap::new();
        for (name, raw) in raw_configs {
            if raw.image.trim().is_empty() {
                bail!("Language {} has no image", name);
            }
            if raw.timeout_ms == 0 {
                bail!("Language {} has a zero timeout", name);
            }
            ensure_script_safe(&name, "source_file", &raw.source_file)?;
            if raw.source_file == INPUT_FILE {
                bail!("Language {} cannot use {} as its source file", name, INPUT_FILE);
            }

            let run = into_command(&name, "run_command", &raw.run_command)?;
            let strategy = match raw.compile_command {
                Some(build) => Strategy::Compiled {
                    build: into_command(&name, "compile_command", &build)?,
                    run,
                },
                None => Strategy::Interpreted { run },
            };

            let config = LanguageConfig {
                name: name.to_lowercase(),
                image: raw.image,
                source_file: raw.source_file,
                strategy,
                timeout_ms: raw.timeout_ms,
            };

            for alias in raw.aliases {
                languages.insert(alias.to_lowercase(), config.clone());
            }
            languages.insert(name.to_lowercase(), config);
        }

        Ok(Self { languages })
    }

    /// Get language configuration by language name or alias
    pub fn get(&self, language: &str) -> Option<&LanguageConfig> {
        self.languages.get(&language.to_lowercase())
    }

    /// Iterate over every accepted identifier and its configuration
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LanguageConfig)> {
        self.languages.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn into_command(language: &str, field: &str, command: &str) -> anyhow::Result<Vec<String>> {
    let parts: Vec<String> = command.split_whitespace().map(|s| s.to_string()).collect();
    if parts.is_empty() {
        bail!("Empty {} for {}", field, language);
    }
    for part in &parts {
        ensure_script_safe(language, field, part)?;
    }
    Ok(parts)
}

/// Config words are pasted into the sandbox script; keep them free of shell syntax.
fn ensure_script_safe(language: &str, field: &str, word: &str) -> anyhow::Result<()> {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/+=:,".contains(c));
    if !safe {
        bail!("Invalid {} for {}: {:?}", field, language, word);
    }
    Ok(())
}
