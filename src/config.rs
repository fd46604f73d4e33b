use std::fs::File;
use std::io::{BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required configuration key '{0}'")]
    MissingKey(String),

    #[error("configuration key '{key}' must be {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Pipeline configuration: shared settings at the top level plus one table per tool.
///
/// ```json
/// {
///   "reference": "hg19.fa",
///   "dbsnp": "dbsnp.vcf",
///   "gatk": { "bin": "GenomeAnalysisTK.jar", "max_mem": 8, "num_cores": 4 },
///   "snpeff": { "bin": "snpEff", "max_mem": 4, "reference": "GRCh37.75" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    entries: IndexMap<String, Value>,
}

impl PipelineConfig {
    pub fn from_path(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Walk the nested mapping along `keys`.
    pub fn lookup(&self, keys: &[&str]) -> Result<&Value, ConfigError> {
        let dotted = || keys.join(".");
        let (first, rest) = keys
            .split_first()
            .ok_or_else(|| ConfigError::MissingKey(String::new()))?;

        let mut value = self
            .entries
            .get(*first)
            .ok_or_else(|| ConfigError::MissingKey(dotted()))?;

        for key in rest {
            value = value
                .as_object()
                .ok_or_else(|| ConfigError::WrongType {
                    key: dotted(),
                    expected: "a nested table",
                })?
                .get(*key)
                .ok_or_else(|| ConfigError::MissingKey(dotted()))?;
        }

        Ok(value)
    }

    /// Render a scalar setting as command-line text. Strings are taken as is,
    /// numbers and booleans are rendered in their JSON form.
    pub fn text(&self, keys: &[&str]) -> Result<String, ConfigError> {
        match self.lookup(keys)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(ConfigError::WrongType {
                key: keys.join("."),
                expected: "a string or number",
            }),
        }
    }

    /// Integer setting. Accepts a JSON number or a string holding one.
    pub fn integer(&self, keys: &[&str]) -> Result<u64, ConfigError> {
        let wrong_type = || ConfigError::WrongType {
            key: keys.join("."),
            expected: "a non-negative integer",
        };
        match self.lookup(keys)? {
            Value::Number(n) => n.as_u64().ok_or_else(wrong_type),
            Value::String(s) => s.trim().parse().map_err(|_| wrong_type()),
            _ => Err(wrong_type()),
        }
    }

    pub fn optional_integer(&self, keys: &[&str]) -> Result<Option<u64>, ConfigError> {
        match self.integer(keys) {
            Ok(n) => Ok(Some(n)),
            Err(ConfigError::MissingKey(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn tool(&self, name: &str) -> Result<ToolSettings, ConfigError> {
        ToolSettings::from_config(self, name)
    }
}

/// Settings shared by every tool table: executable and resource limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub name: String,
    pub bin: String,
    pub max_mem: Option<u64>,
    pub num_cores: Option<u64>,
}

impl ToolSettings {
    pub fn from_config(config: &PipelineConfig, name: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            name: name.to_string(),
            bin: config.text(&[name, "bin"])?,
            max_mem: config.optional_integer(&[name, "max_mem"])?,
            num_cores: config.optional_integer(&[name, "num_cores"])?,
        })
    }

    pub fn require_max_mem(&self) -> Result<u64, ConfigError> {
        self.max_mem
            .ok_or_else(|| ConfigError::MissingKey(format!("{}.max_mem", self.name)))
    }

    pub fn require_num_cores(&self) -> Result<u64, ConfigError> {
        self.num_cores
            .ok_or_else(|| ConfigError::MissingKey(format!("{}.num_cores", self.name)))
    }

    /// Explicit request first, then the configured core count, then every logical CPU.
    pub fn threads(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|&n| n > 0)
            .or(self.num_cores.map(|n| n as usize).filter(|&n| n > 0))
            .unwrap_or_else(num_cpus::get)
    }
}
