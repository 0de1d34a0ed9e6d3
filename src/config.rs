//! Run configuration loaded from environment variables
//!
//! Built once at startup (after `.env` is loaded) and handed by reference to
//! every component. Missing values become empty strings; nothing is validated
//! here, a component complains when it actually needs a value.

use std::env;
use std::path::PathBuf;

use crate::source::{S3Location, SourceDescriptor};

pub const DEFAULT_FILE_DIRECTORY: &str = "summaries_information";
pub const DEFAULT_FILE_NAME: &str = "summary_information.csv";
pub const DEFAULT_DB_NAME: &str = "summary_information.db";
pub const DEFAULT_SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";
pub const DEFAULT_SUMMARY_YEAR: i32 = 1900;

/// Marker value of `FILE_DIRECTORY` that selects the S3 source.
const S3_SOURCE: &str = "S3";

/// Where the CSV comes from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceConfig {
    /// `S3` or a local directory
    pub file_directory: String,
    pub file_name: String,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
    pub s3_bucket_name: String,
    pub s3_region: String,
    pub s3_key: String,
}

impl SourceConfig {
    /// Resolve the configured source into a descriptor the loader understands.
    pub fn descriptor(&self) -> SourceDescriptor {
        if self.file_directory == S3_SOURCE {
            return SourceDescriptor::S3(S3Location {
                bucket: self.s3_bucket_name.clone(),
                key: self.s3_key.clone(),
                region: self.s3_region.clone(),
                access_key_id: self.s3_access_key_id.clone(),
                secret_access_key: self.s3_secret_access_key.clone(),
            });
        }

        let directory = if self.file_directory.is_empty() {
            DEFAULT_FILE_DIRECTORY
        } else {
            self.file_directory.as_str()
        };
        let file_name = if self.file_name.is_empty() {
            DEFAULT_FILE_NAME
        } else {
            self.file_name.as_str()
        };

        SourceDescriptor::Local(PathBuf::from(directory).join(file_name))
    }
}

/// SendGrid settings plus the two addresses involved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailConfig {
    pub api_key: String,
    pub template_id: String,
    pub api_url: String,
    pub from_email: String,
    pub to_email: String,
}

/// Relational store parameters.
///
/// The embedded SQLite backend only uses `name` (the database file, or
/// `:memory:`); host/port/user/password are carried for networked backends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: String,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Skip rows already stored for the account
    pub deduplicate: bool,
}

/// Profile used when the account has to be created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountProfile {
    pub name: String,
    pub paternal_surname: String,
    pub maternal_surname: String,
}

impl AccountProfile {
    /// "{name} {paternal_surname}", trimmed when either part is empty.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.name, self.paternal_surname)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub source: SourceConfig,
    pub mail: MailConfig,
    pub database: DatabaseConfig,
    pub account: AccountProfile,
    /// Year assumed for "M/D" dates
    pub summary_year: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            mail: MailConfig::default(),
            database: DatabaseConfig::default(),
            account: AccountProfile::default(),
            summary_year: DEFAULT_SUMMARY_YEAR,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FILE_DIRECTORY` (`S3` or a directory, default: summaries_information)
    /// - `SUMMARY_FILE_NAME` (default: summary_information.csv)
    /// - `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`, `S3_BUCKET_NAME`, `S3_REGION`, `S3_KEY`
    /// - `TO_EMAIL`, `FROM_EMAIL`
    /// - `SENDGRID_API_KEY`, `SENDGRID_SUMMARY_TEMPLATE_ID`, `SENDGRID_API_URL`
    /// - `DB_HOST`, `DB_PORT`, `DB_NAME` (default: summary_information.db), `DB_USER`, `DB_PASSWORD`
    /// - `PERSIST_DEDUPLICATE` (default: false)
    /// - `ACCOUNT_NAME`, `ACCOUNT_PATERNAL_SURNAME`, `ACCOUNT_MATERNAL_SURNAME`
    /// - `SUMMARY_YEAR` (default: 1900)
    pub fn from_env() -> Self {
        Self {
            source: SourceConfig {
                file_directory: var("FILE_DIRECTORY"),
                file_name: var("SUMMARY_FILE_NAME"),
                s3_access_key_id: var("S3_ACCESS_KEY_ID"),
                s3_secret_access_key: var("S3_SECRET_ACCESS_KEY"),
                s3_bucket_name: var("S3_BUCKET_NAME"),
                s3_region: var("S3_REGION"),
                s3_key: var("S3_KEY"),
            },
            mail: MailConfig {
                api_key: var("SENDGRID_API_KEY"),
                template_id: var("SENDGRID_SUMMARY_TEMPLATE_ID"),
                api_url: var_or("SENDGRID_API_URL", DEFAULT_SENDGRID_URL),
                from_email: var("FROM_EMAIL"),
                to_email: var("TO_EMAIL"),
            },
            database: DatabaseConfig {
                host: var("DB_HOST"),
                port: var("DB_PORT"),
                name: var_or("DB_NAME", DEFAULT_DB_NAME),
                user: var("DB_USER"),
                password: var("DB_PASSWORD"),
                deduplicate: env::var("PERSIST_DEDUPLICATE")
                    .ok()
                    .and_then(|s| s.trim().to_lowercase().parse().ok())
                    .unwrap_or(false),
            },
            account: AccountProfile {
                name: var("ACCOUNT_NAME"),
                paternal_surname: var("ACCOUNT_PATERNAL_SURNAME"),
                maternal_surname: var("ACCOUNT_MATERNAL_SURNAME"),
            },
            summary_year: env::var("SUMMARY_YEAR")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_SUMMARY_YEAR),
        }
    }
}

fn var(key: &str) -> String {
    env::var(key).unwrap_or_default()
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}
