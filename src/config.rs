use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::PathBuf, str::FromStr};
use url::Url;

use crate::auth::Credentials;
use crate::graph::DEFAULT_GRAPH_BASE_URL;
use crate::policy::UploadPolicy;
use crate::submission::DEFAULT_ROOT_FOLDER;

pub const KEYRING_SERVICE: &str = "classdrop";

/// Secrets kept in the OS keyring rather than the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    RefreshToken,
    ClientSecret,
}

impl Secret {
    fn keyring_user(&self) -> &'static str {
        match self {
            Secret::RefreshToken => "ms-refresh-token",
            Secret::ClientSecret => "ms-client-secret",
        }
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::RefreshToken => write!(f, "refresh token"),
            Secret::ClientSecret => write!(f, "client secret"),
        }
    }
}

impl FromStr for Secret {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "refresh-token" => Ok(Secret::RefreshToken),
            "client-secret" => Ok(Secret::ClientSecret),
            other => Err(anyhow!(
                "Unknown secret '{other}', expected refresh-token or client-secret"
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    pub ms_tenant_id: Option<String>,
    pub ms_client_id: Option<String>,
    pub root_folder_path: Option<String>,
    pub graph_base_url: Option<Url>,
    #[serde(skip_serializing)]
    pub upload: Option<UploadPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    ms_tenant_id: Option<String>,
    ms_client_id: Option<String>,
    ms_client_secret: Option<String>,
    ms_refresh_token: Option<String>,
    root_folder_path: Option<String>,
    graph_base_url: Option<Url>,
}

pub struct Config {
    pub credentials: Credentials,
    pub root_folder_path: String,
    pub graph_base_url: Url,
    pub upload: UploadPolicy,
}

fn secret_from_keyring(secret: Secret) -> Result<String> {
    let entry = Entry::new(KEYRING_SERVICE, secret.keyring_user())?;
    let value = entry.get_secret().with_context(|| {
        format!("The {secret} is not specified via environment variable nor present in OS keyring")
    })?;
    Ok(String::from_utf8(value)?)
}

fn merge_config(
    base: ConfigFile,
    override_config: ConfigEnv,
    keyring: impl Fn(Secret) -> Result<String>,
) -> Result<Config> {
    let tenant_id = override_config
        .ms_tenant_id
        .or(base.ms_tenant_id)
        .ok_or(anyhow!("No Microsoft tenant ID provided (MS_TENANT_ID)"))?;

    let client_id = override_config
        .ms_client_id
        .or(base.ms_client_id)
        .ok_or(anyhow!("No Microsoft client ID provided (MS_CLIENT_ID)"))?;

    let client_secret = match override_config.ms_client_secret {
        Some(secret) => secret,
        None => keyring(Secret::ClientSecret)?,
    };

    let refresh_token = match override_config.ms_refresh_token {
        Some(token) => token,
        None => keyring(Secret::RefreshToken)?,
    };

    let root_folder_path = override_config
        .root_folder_path
        .or(base.root_folder_path)
        .unwrap_or_else(|| DEFAULT_ROOT_FOLDER.to_string());

    let graph_base_url = match override_config.graph_base_url.or(base.graph_base_url) {
        Some(url) => url,
        None => Url::parse(DEFAULT_GRAPH_BASE_URL)?,
    };

    Ok(Config {
        credentials: Credentials {
            tenant_id,
            client_id,
            client_secret,
            refresh_token,
        },
        root_folder_path,
        graph_base_url,
        upload: base.upload.unwrap_or_default(),
    })
}

pub fn config_file_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "classdrop", "classdrop")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config_file() -> Result<ConfigFile> {
    let config_file = config_file_path()?;
    match fs::read_to_string(&config_file) {
        Ok(config) => toml::from_str(&config)
            .with_context(|| format!("Failed to parse {}", config_file.display())),
        Err(_) => Ok(ConfigFile::default()),
    }
}

/// Upload tuning alone, for commands that never talk to the store.
pub fn read_upload_policy() -> Result<UploadPolicy> {
    Ok(read_config_file()?.upload.unwrap_or_default())
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();
    let file_config = read_config_file()?;

    merge_config(file_config, env_config, secret_from_keyring)
}

/// Writes the non-secret settings. Upload tuning is edited by hand and left untouched.
pub fn write_config(config: ConfigFile) -> Result<()> {
    let config_file = config_file_path()?;
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut document = match fs::read_to_string(&config_file) {
        Ok(existing) => existing.parse::<toml::Table>().unwrap_or_default(),
        Err(_) => toml::Table::new(),
    };
    let settings: toml::Table = toml::from_str(&toml::to_string(&config)?)?;
    document.extend(settings);

    fs::write(&config_file, toml::to_string_pretty(&document)?)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(())
}

pub fn set_secret_keyring(secret: Secret, value: String) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, secret.keyring_user())?;
    entry.set_secret(value.as_bytes())?;
    Ok(())
}
