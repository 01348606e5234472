use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::thread;

/// Errors raised while reading compiler options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {detail}")]
    InvalidValue {
        name: String,
        value: String,
        detail: &'static str,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "toml-config")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Options of a [`ShaderCompiler`](crate::compiler::ShaderCompiler).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerOptions {
    /// Wait for every queued job right after enqueueing it.
    pub sync_compile: bool,
    /// Build every variant monolithically.
    pub monolithic: bool,
    /// Target supports primitive shaders.
    pub ngg: bool,
    pub compiler_threads: usize,
    pub low_priority_threads: usize,
    pub disk_cache: bool,
    /// Overrides the default cache root.
    pub cache_dir: Option<PathBuf>,
    /// Keep generated-code text in artifacts and trace records.
    pub capture_disassembly: bool,
}

fn default_threads() -> usize {
    thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
        .clamp(1, 8)
}

impl Default for CompilerOptions {
    fn default() -> Self {
        let threads = default_threads();
        Self {
            sync_compile: false,
            monolithic: false,
            ngg: false,
            compiler_threads: threads,
            low_priority_threads: (threads / 2).max(1),
            disk_cache: true,
            cache_dir: None,
            capture_disassembly: false,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_owned(),
            value: value.to_owned(),
            detail: "expected a boolean",
        }),
    }
}

fn parse_threads(name: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(threads) if threads > 0 => Ok(threads),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_owned(),
            value: value.to_owned(),
            detail: "expected a positive thread count",
        }),
    }
}

impl CompilerOptions {
    /// Defaults overridden by `SHADERCACHE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        let flag = |name: &str| -> Result<Option<bool>, ConfigError> {
            lookup(name).map(|value| parse_bool(name, &value)).transpose()
        };

        if let Some(sync) = flag("SHADERCACHE_SYNC")? {
            options.sync_compile = sync;
        }
        if let Some(mono) = flag("SHADERCACHE_MONO")? {
            options.monolithic = mono;
        }
        if let Some(ngg) = flag("SHADERCACHE_NGG")? {
            options.ngg = ngg;
        }
        if let Some(disasm) = flag("SHADERCACHE_DISASM")? {
            options.capture_disassembly = disasm;
        }
        if let Some(disable) = flag("SHADERCACHE_DISABLE_DISK")? {
            options.disk_cache = !disable;
        }
        if let Some(value) = lookup("SHADERCACHE_THREADS") {
            let threads = parse_threads("SHADERCACHE_THREADS", &value)?;
            options.compiler_threads = threads;
            options.low_priority_threads = (threads / 2).max(1);
        }
        if let Some(dir) = lookup(crate::cache::CACHE_DIR_ENV)
            && !dir.is_empty()
        {
            options.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(options)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(text)?;
        options.validate()
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject thread counts of zero.
    pub fn validate(self) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("compiler_threads", self.compiler_threads),
            ("low_priority_threads", self.low_priority_threads),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.to_owned(),
                    value: value.to_string(),
                    detail: "expected a positive thread count",
                });
            }
        }
        Ok(self)
    }

    /// Options for tests and tools: synchronous, no disk layer.
    pub fn deterministic() -> Self {
        Self {
            sync_compile: true,
            disk_cache: false,
            compiler_threads: 1,
            low_priority_threads: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let options = CompilerOptions::default();
        assert!((1..=8).contains(&options.compiler_threads));
        assert!(options.low_priority_threads >= 1);
        assert!(options.low_priority_threads <= options.compiler_threads);
        assert!(!options.sync_compile);
        assert!(options.disk_cache);
    }

    #[test]
    fn environment_overrides_defaults() {
        let options = CompilerOptions::from_lookup(lookup(&[
            ("SHADERCACHE_SYNC", "1"),
            ("SHADERCACHE_MONO", "true"),
            ("SHADERCACHE_THREADS", "6"),
            ("SHADERCACHE_DISABLE_DISK", "yes"),
            ("SHADERCACHE_DIR", "/tmp/shaders"),
        ]))
        .unwrap();
        assert!(options.sync_compile);
        assert!(options.monolithic);
        assert_eq!(options.compiler_threads, 6);
        assert_eq!(options.low_priority_threads, 3);
        assert!(!options.disk_cache);
        assert_eq!(options.cache_dir, Some(PathBuf::from("/tmp/shaders")));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = CompilerOptions::from_lookup(lookup(&[("SHADERCACHE_NGG", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("SHADERCACHE_NGG"));

        assert!(CompilerOptions::from_lookup(lookup(&[("SHADERCACHE_THREADS", "0")])).is_err());
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let options = CompilerOptions::from_toml_str("monolithic = true\ncompiler_threads = 2\n").unwrap();
        assert!(options.monolithic);
        assert_eq!(options.compiler_threads, 2);
        assert_eq!(
            options.capture_disassembly,
            CompilerOptions::default().capture_disassembly
        );

        assert!(CompilerOptions::from_toml_str("unknown = 1").is_err());
        assert!(CompilerOptions::from_toml_str("compiler_threads = 0").is_err());
    }
}
