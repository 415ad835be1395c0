//! Layered configuration.
//!
//! Values are resolved from, in increasing order of precedence:
//! 1. built-in defaults (paths under the platform's data and cache
//!    directories),
//! 2. a configuration file: the one passed explicitly, or `vellum.toml` in
//!    the working directory if it exists,
//! 3. `VELLUM_`-prefixed environment variables, with `__` separating nested
//!    keys (`VELLUM_SCAN__CONCURRENCY=8` sets `scan.concurrency`).

pub mod error;
mod section;

pub use crate::section::{CacheSection, ContentSection, DetectSection, ExtractSection, LibrarySection, ScanSection};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File looked up in the working directory when none is given.
pub const DEFAULT_FILE: &str = "vellum.toml";
pub const ENV_PREFIX: &str = "VELLUM_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibrarySection,
    pub cache: CacheSection,
    pub detect: DetectSection,
    pub extract: ExtractSection,
    pub content: ContentSection,
    pub scan: ScanSection,
}
impl Config {
    /// Resolve and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// The layered providers, without extracting them.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        let figment = match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
                    Some("toml") => figment.merge(Toml::file_exact(path)),
                    Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                    Some("json") => figment.merge(Json::file_exact(path)),
                    _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
                }
            },
            None => figment.merge(Toml::file(DEFAULT_FILE)),
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Reject values that would make the system unusable.
    pub fn validate(&self) -> Result<()> {
        for (field, path) in [
            ("library.root", &self.library.root),
            ("cache.artifacts", &self.cache.artifacts),
            ("cache.database", &self.cache.database),
        ] {
            if !path.is_absolute() {
                exn::bail!(ErrorKind::Invalid { field, reason: format!("{} is not absolute", path.display()) });
            }
        }
        if self.library.root == self.cache.artifacts {
            exn::bail!(ErrorKind::Invalid {
                field: "cache.artifacts",
                reason: "must not be the library root".to_string(),
            });
        }
        for (field, value) in [
            ("detect.min_works", self.detect.min_works),
            ("detect.toc_depth", self.detect.toc_depth),
            ("extract.max_reference_depth", self.extract.max_reference_depth),
            ("content.workers", self.content.workers),
            ("scan.concurrency", self.scan.concurrency),
        ] {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid { field, reason: "must be greater than zero".to_string() });
            }
        }
        let timeouts = [("content.timeout_secs", self.content.timeout_secs), ("scan.timeout_secs", self.scan.timeout_secs)];
        for (field, value) in timeouts {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid { field, reason: "must be greater than zero".to_string() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use std::fs;
    use std::path::PathBuf;

    fn absolute(config: &mut Config, base: &Path) {
        config.library.root = base.join("library");
        config.cache.artifacts = base.join("artifacts");
        config.cache.database = base.join("vellum.db");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detect, DetectSection { min_works: 2, toc_depth: 1 });
        assert_eq!(config.content.timeout(), std::time::Duration::from_secs(60));
        assert_eq!(config.scan.concurrency, 4);
        assert!(!config.scan.prewarm);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        let root = dir.path().join("books");
        fs::write(
            &file,
            format!(
                "[library]\nroot = {root:?}\n[cache]\nartifacts = {:?}\ndatabase = {:?}\n[scan]\nprewarm = true\n",
                dir.path().join("artifacts"),
                dir.path().join("vellum.db"),
            ),
        )
        .unwrap();
        let config = Config::load(Some(&file)).unwrap();
        assert_eq!(config.library.root, root);
        assert!(config.scan.prewarm);
        assert_eq!(config.detect.min_works, 2);
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vellum.yaml");
        fs::write(&file, "detect:\n  min_works: 3\ncontent:\n  workers: 6\n").unwrap();
        let config: Config = Config::figment(Some(&file)).unwrap().extract().unwrap();
        assert_eq!(config.detect.min_works, 3);
        assert_eq!(config.content.workers, 6);
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert_eq!(*Config::figment(Some(&missing)).unwrap_err(), ErrorKind::NotFound(missing.clone()));
        let ini = dir.path().join("vellum.ini");
        fs::write(&ini, "").unwrap();
        assert_eq!(*Config::figment(Some(&ini)).unwrap_err(), ErrorKind::UnsupportedFormat(ini.clone()));
    }

    #[test]
    fn test_environment_wins_over_file() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_FILE, "[scan]\nconcurrency = 2\ntimeout_secs = 30\n")?;
            jail.set_env("VELLUM_SCAN__CONCURRENCY", "8");
            jail.set_env("VELLUM_CONTENT__EVICTION_AGE_SECS", "600");
            let config: Config = Config::figment(None).unwrap().extract()?;
            assert_eq!(config.scan.concurrency, 8);
            assert_eq!(config.scan.timeout_secs, 30);
            assert_eq!(config.content.eviction_age(), std::time::Duration::from_secs(600));
            Ok(())
        });
    }

    #[rstest]
    #[case::zero_workers(|c: &mut Config| c.content.workers = 0, "content.workers")]
    #[case::zero_depth(|c: &mut Config| c.detect.toc_depth = 0, "detect.toc_depth")]
    #[case::zero_timeout(|c: &mut Config| c.scan.timeout_secs = 0, "scan.timeout_secs")]
    #[case::relative_root(|c: &mut Config| c.library.root = PathBuf::from("books"), "library.root")]
    #[case::shared_root(|c: &mut Config| c.cache.artifacts = c.library.root.clone(), "cache.artifacts")]
    fn test_validation(#[case] change: fn(&mut Config), #[case] expected: &str) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        absolute(&mut config, dir.path());
        assert!(config.validate().is_ok());
        change(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field, .. } if *field == expected));
    }
}
