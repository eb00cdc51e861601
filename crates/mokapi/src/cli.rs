//! Static configuration.
//!
//! Flags and `MOKAPI_*` environment variables are parsed with clap and laid
//! over an optional YAML file given by `--config-file`.

use crate::dynamic::FileProviderConfig;
use crate::runtime::StoreSizes;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiConfig {
    pub port: u16,
    pub path: String,
    pub base: String,
    pub dashboard: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            path: String::new(),
            base: String::new(),
            dashboard: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileProviderSettings {
    pub filenames: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    pub skip_prefix: Vec<String>,
    pub include: Vec<String>,
}

impl Default for FileProviderSettings {
    fn default() -> Self {
        Self {
            filenames: Vec::new(),
            directories: Vec::new(),
            skip_prefix: vec!["_".to_string()],
            include: Vec::new(),
        }
    }
}

impl FileProviderSettings {
    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty() && self.directories.is_empty()
    }
}

impl From<&FileProviderSettings> for FileProviderConfig {
    fn from(s: &FileProviderSettings) -> Self {
        FileProviderConfig {
            filenames: s.filenames.clone(),
            directories: s.directories.clone(),
            skip_prefix: s.skip_prefix.clone(),
            include: s.include.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpProviderSettings {
    pub urls: Vec<String>,
    pub poll_interval: String,
    pub poll_timeout: String,
    pub proxy: String,
    pub tls_skip_verify: bool,
    pub ca: String,
}

impl Default for HttpProviderSettings {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            poll_interval: "3m".to_string(),
            poll_timeout: "5s".to_string(),
            proxy: String::new(),
            tls_skip_verify: false,
            ca: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitProviderSettings {
    pub urls: Vec<String>,
    pub pull_interval: String,
    pub temp_dir: String,
}

impl Default for GitProviderSettings {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            pull_interval: "3m".to_string(),
            temp_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NpmProviderSettings {
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Providers {
    pub file: FileProviderSettings,
    pub http: HttpProviderSettings,
    pub git: GitProviderSettings,
    pub npm: NpmProviderSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventConfig {
    /// Event store size by service name; `default` applies to the rest.
    pub store: HashMap<String, usize>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            store: HashMap::from([("default".to_string(), crate::runtime::store::DEFAULT_STORE_SIZE)]),
        }
    }
}

/// Complete static configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticConfig {
    pub log: LogConfig,
    pub api: ApiConfig,
    pub providers: Providers,
    pub event: EventConfig,
}

impl StaticConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: StaticConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn store_sizes(&self) -> StoreSizes {
        let mut sizes = EventConfig::default().store;
        sizes.extend(self.event.store.iter().map(|(k, v)| (k.clone(), *v)));
        StoreSizes::new(sizes)
    }

    /// YAML rendering used by `--generate-cli-skeleton`.
    pub fn skeleton(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Provider settings that are parsed but not served.
    pub fn unsupported_providers(&self) -> Vec<&'static str> {
        let mut unsupported = Vec::new();
        if !self.providers.http.urls.is_empty() {
            unsupported.push("http");
        }
        if !self.providers.git.urls.is_empty() {
            unsupported.push("git");
        }
        if !self.providers.npm.packages.is_empty() {
            unsupported.push("npm");
        }
        unsupported
    }
}

/// Mokapi - mock HTTP, Kafka, mail and LDAP services from their specifications
#[derive(Parser, Debug)]
#[command(name = "mokapi")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML file with static configuration; flags take precedence
    #[arg(long, env = "MOKAPI_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Print (or write to the given path) the static configuration and exit
    #[arg(long, num_args = 0..=1, default_missing_value = "-", value_name = "PATH")]
    pub generate_cli_skeleton: Option<String>,

    /// Log level: debug, info, warn or error
    #[arg(long, env = "MOKAPI_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "MOKAPI_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,

    /// Port of the management API
    #[arg(long, env = "MOKAPI_API_PORT")]
    pub api_port: Option<u16>,

    /// Path prefix of the management API
    #[arg(long, env = "MOKAPI_API_PATH")]
    pub api_path: Option<String>,

    /// Base path of the dashboard
    #[arg(long, env = "MOKAPI_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "MOKAPI_API_DASHBOARD", num_args = 0..=1, default_missing_value = "true")]
    pub api_dashboard: Option<bool>,

    #[arg(long)]
    pub api_no_dashboard: bool,

    #[arg(long = "providers-file-filename", env = "MOKAPI_PROVIDERS_FILE_FILENAME", value_delimiter = ',')]
    pub file_filenames: Vec<PathBuf>,

    #[arg(long = "providers-file-directory", env = "MOKAPI_PROVIDERS_FILE_DIRECTORY", value_delimiter = ',')]
    pub file_directories: Vec<PathBuf>,

    /// File and directory name prefixes to skip [default: _]
    #[arg(long = "providers-file-skip-prefix", env = "MOKAPI_PROVIDERS_FILE_SKIP_PREFIX", value_delimiter = ',')]
    pub file_skip_prefix: Vec<String>,

    #[arg(long = "providers-file-include", env = "MOKAPI_PROVIDERS_FILE_INCLUDE", value_delimiter = ',')]
    pub file_include: Vec<String>,

    #[arg(long = "providers-http-url", env = "MOKAPI_PROVIDERS_HTTP_URL", value_delimiter = ',')]
    pub http_urls: Vec<String>,

    #[arg(long = "providers-http-poll-interval", env = "MOKAPI_PROVIDERS_HTTP_POLL_INTERVAL")]
    pub http_poll_interval: Option<String>,

    #[arg(long = "providers-http-poll-timeout", env = "MOKAPI_PROVIDERS_HTTP_POLL_TIMEOUT")]
    pub http_poll_timeout: Option<String>,

    #[arg(long = "providers-http-proxy", env = "MOKAPI_PROVIDERS_HTTP_PROXY")]
    pub http_proxy: Option<String>,

    #[arg(long = "providers-http-tls-skip-verify", env = "MOKAPI_PROVIDERS_HTTP_TLS_SKIP_VERIFY")]
    pub http_tls_skip_verify: bool,

    #[arg(long = "providers-http-ca", env = "MOKAPI_PROVIDERS_HTTP_CA")]
    pub http_ca: Option<String>,

    #[arg(long = "providers-git-url", env = "MOKAPI_PROVIDERS_GIT_URL", value_delimiter = ',')]
    pub git_urls: Vec<String>,

    #[arg(long = "providers-git-pull-interval", env = "MOKAPI_PROVIDERS_GIT_PULL_INTERVAL")]
    pub git_pull_interval: Option<String>,

    #[arg(long = "providers-git-temp-dir", env = "MOKAPI_PROVIDERS_GIT_TEMP_DIR")]
    pub git_temp_dir: Option<String>,

    #[arg(long = "providers-npm-package", env = "MOKAPI_PROVIDERS_NPM_PACKAGE", value_delimiter = ',')]
    pub npm_packages: Vec<String>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

fn extend<T>(target: &mut Vec<T>, values: Vec<T>) {
    if !values.is_empty() {
        *target = values;
    }
}

impl Args {
    /// Static configuration from the config file, overridden by flags.
    pub fn into_config(self) -> Result<StaticConfig, anyhow::Error> {
        let mut c = match &self.config_file {
            Some(path) => StaticConfig::from_file(path)
                .map_err(|e| anyhow::anyhow!("unable to read config file {}: {}", path.display(), e))?,
            None => StaticConfig::default(),
        };

        set(&mut c.log.level, self.log_level);
        set(&mut c.log.format, self.log_format);

        set(&mut c.api.port, self.api_port);
        set(&mut c.api.path, self.api_path);
        set(&mut c.api.base, self.api_base);
        set(&mut c.api.dashboard, self.api_dashboard);
        if self.api_no_dashboard {
            c.api.dashboard = false;
        }

        let file = &mut c.providers.file;
        extend(&mut file.filenames, self.file_filenames);
        extend(&mut file.directories, self.file_directories);
        extend(&mut file.skip_prefix, self.file_skip_prefix);
        extend(&mut file.include, self.file_include);

        let http = &mut c.providers.http;
        extend(&mut http.urls, self.http_urls);
        set(&mut http.poll_interval, self.http_poll_interval);
        set(&mut http.poll_timeout, self.http_poll_timeout);
        set(&mut http.proxy, self.http_proxy);
        if self.http_tls_skip_verify {
            http.tls_skip_verify = true;
        }
        set(&mut http.ca, self.http_ca);

        let git = &mut c.providers.git;
        extend(&mut git.urls, self.git_urls);
        set(&mut git.pull_interval, self.git_pull_interval);
        set(&mut git.temp_dir, self.git_temp_dir);

        extend(&mut c.providers.npm.packages, self.npm_packages);

        Ok(c)
    }
}
