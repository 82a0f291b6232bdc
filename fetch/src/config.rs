//! Configuration surface: TOML file, built-in defaults, and CLI overrides.
//!
//! The resolved [`FetchConfig`] is turned into an explicit
//! [`PipelineConfig`] value; nothing is read from ambient state after that.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::auth::{Credential, Secret};
use crate::catalog::{CatalogEntry, CatalogError, build_catalog, default_catalog, select};
use crate::fetch::DEFAULT_CHUNK_SIZE;
use crate::pipeline::PipelineConfig;
use crate::resolve::Region;

/// Identity provider used for login.
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://cognito-idp.us-east-1.amazonaws.com/";
/// Application client registered with the identity provider.
pub const DEFAULT_CLIENT_ID: &str = "7fq5jvs5ffs1c50hd3toobb3b9";
/// Root of the archive listing API.
pub const DEFAULT_API_BASE: &str =
    "https://o9k5xn5546.execute-api.us-east-1.amazonaws.com/v1/archives/v1.0";
/// Project tag sent with every resolution request.
pub const DEFAULT_PROJECT: &str = "nuScenes";
/// Default free-space threshold in gibibytes.
pub const DEFAULT_MIN_FREE_GIB: u64 = 150;
/// File name looked up in the platform configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`FetchConfig`].
    #[error("invalid configuration in {origin}: {reason}")]
    Parse {
        /// File path, or a description of the source text.
        origin: String,
        /// Parser message.
        reason: String,
    },

    /// A required setting has no value.
    #[error("missing setting {setting}: {hint}")]
    Missing {
        /// Name of the setting.
        setting: &'static str,
        /// How to provide it.
        hint: &'static str,
    },

    /// The configured catalog or selection is invalid.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// One `[[catalog]]` table in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogItem {
    /// Archive file name.
    pub identifier: String,
    /// Expected MD5 or SHA-256 digest in hex.
    pub digest: String,
}

/// Settings for a fetch run.
///
/// # Examples
///
/// ```
/// use nuscenes_fetch::config::FetchConfig;
///
/// let config = FetchConfig::from_toml_str(
///     "email = \"user@example.com\"\nregion = \"asia\"\n",
///     "inline",
/// )
/// .unwrap();
/// assert_eq!(config.region.as_str(), "asia");
/// assert_eq!(config.min_free_gib, 150);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Account email.
    pub email: Option<String>,
    /// Account password. Prefer the environment over the file.
    pub password: Option<Secret>,
    /// Destination for archives and their extracted contents.
    pub output_dir: Option<PathBuf>,
    /// Storage region for download URLs.
    pub region: Region,
    /// Free-space threshold in gibibytes.
    pub min_free_gib: u64,
    /// Project tag for the archive API.
    pub project: String,
    /// Identity provider endpoint.
    pub auth_endpoint: String,
    /// Identity provider client id.
    pub client_id: String,
    /// Archive API root.
    pub api_base: String,
    /// Download read size in bytes.
    pub chunk_size: usize,
    /// Replacement catalog; the built-in one is used when absent.
    pub catalog: Option<Vec<CatalogItem>>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            email: None,
            password: None,
            output_dir: None,
            region: Region::default(),
            min_free_gib: DEFAULT_MIN_FREE_GIB,
            project: DEFAULT_PROJECT.to_owned(),
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_owned(),
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            api_base: DEFAULT_API_BASE.to_owned(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            catalog: None,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--email` or `NUSCENES_EMAIL`.
    pub email: Option<String>,
    /// `--password` or `NUSCENES_PASSWORD`.
    pub password: Option<Secret>,
    /// `--output-dir`.
    pub output_dir: Option<PathBuf>,
    /// `--region`.
    pub region: Option<Region>,
    /// `--min-free-gib`.
    pub min_free_gib: Option<u64>,
}

/// Platform directory lookup, abstracted for tests.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs {
    /// Directory holding this tool's configuration, if the platform has one.
    fn config_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBaseDirs;

impl BaseDirs for SystemBaseDirs {
    fn config_dir(&self) -> Option<PathBuf> {
        directories_next::ProjectDirs::from("", "", "nuscenes-fetch")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }
}

/// Default configuration file location.
#[must_use]
pub fn default_config_path(dirs: &dyn BaseDirs) -> Option<PathBuf> {
    dirs.config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

impl FetchConfig {
    /// Parse configuration text. `origin` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse {
            origin: origin.to_owned(),
            reason: err.to_string(),
        })
    }

    /// Load configuration from `explicit`, or from the default location.
    ///
    /// An explicit path must exist. A missing default file yields the
    /// built-in defaults. Returns the path actually read, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(
        explicit: Option<&Path>,
        dirs: &dyn BaseDirs,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path(dirs) {
                Some(path) if path.is_file() => path,
                _ => {
                    log::debug!("no configuration file found; using defaults");
                    return Ok((Self::default(), None));
                }
            },
        };
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&text, &path.display().to_string())?;
        log::debug!("loaded configuration from {}", path.display());
        Ok((config, Some(path)))
    }

    /// Replace file values with any provided on the command line.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            email,
            password,
            output_dir,
            region,
            min_free_gib,
        } = overrides;
        if email.is_some() {
            self.email = email;
        }
        if password.is_some() {
            self.password = password;
        }
        if output_dir.is_some() {
            self.output_dir = output_dir;
        }
        if let Some(region) = region {
            self.region = region;
        }
        if let Some(min_free_gib) = min_free_gib {
            self.min_free_gib = min_free_gib;
        }
    }

    /// The login credential.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the email or password is unset
    /// or empty.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        let email = self
            .email
            .as_deref()
            .filter(|email| !email.trim().is_empty())
            .ok_or(ConfigError::Missing {
                setting: "email",
                hint: "pass --email, set NUSCENES_EMAIL, or add `email` to the config file",
            })?;
        let password = self
            .password
            .clone()
            .filter(|secret| !secret.expose().is_empty())
            .ok_or(ConfigError::Missing {
                setting: "password",
                hint: "pass --password, set NUSCENES_PASSWORD, or add `password` to the config file",
            })?;
        Ok(Credential::new(email.trim(), password))
    }

    /// The destination directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when no directory was given.
    pub fn output_dir(&self) -> Result<&Path, ConfigError> {
        self.output_dir.as_deref().ok_or(ConfigError::Missing {
            setting: "output_dir",
            hint: "pass --output-dir or add `output_dir` to the config file",
        })
    }

    /// The configured catalog restricted to `only` (all entries when empty).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Catalog`] for invalid entries or unknown names
    /// in `only`.
    pub fn catalog_entries(&self, only: &[String]) -> Result<Vec<CatalogEntry>, ConfigError> {
        let catalog = match &self.catalog {
            Some(items) => build_catalog(
                items
                    .iter()
                    .map(|item| (item.identifier.as_str(), item.digest.as_str())),
            )?,
            None => default_catalog()?,
        };
        Ok(select(catalog, only)?)
    }

    /// Build the explicit pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when credentials or the output directory are
    /// missing.
    pub fn pipeline_config(
        &self,
        catalog: Vec<CatalogEntry>,
        honour_stamps: bool,
    ) -> Result<PipelineConfig, ConfigError> {
        Ok(PipelineConfig {
            credential: self.credential()?,
            output_dir: self.output_dir()?.to_path_buf(),
            region: self.region,
            catalog,
            honour_stamps,
        })
    }
}
