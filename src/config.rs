use anyhow::{Context, Result, bail};
use std::env;
use std::path::PathBuf;

/// Server configuration, environment-driven. `.env` files are honored by the
/// binary entry point before this is read.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,

    pub user_base_path: String,
    pub default_subdirectories: Vec<String>,
    pub create_default_subdirs: bool,

    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,

    /// Advisory upper bound on a single upload; exceeding it is logged, not rejected.
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    /// Reserved; not enforced by the PDF-only rule.
    pub blocked_extensions: Vec<String>,
    /// Reserved.
    pub max_directory_depth: u32,

    pub host_key_path: PathBuf,
    pub log_enabled: bool,
    pub log_level: String,
    /// Reserved; logs go to stdout.
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let s3_bucket = match env::var("S3_BUCKET") {
            Ok(v) if !v.is_empty() => v,
            _ => bail!("S3_BUCKET must be set"),
        };

        let port = env_or("SERVER_PORT", "2222")
            .parse::<u16>()
            .context("SERVER_PORT must be a port number")?;
        let max_connections = env_or("MAX_CONNECTIONS", "100")
            .parse::<usize>()
            .context("MAX_CONNECTIONS must be an integer")?;
        let max_file_size = env_or("MAX_FILE_SIZE", "104857600")
            .parse::<u64>()
            .context("MAX_FILE_SIZE must be an integer")?;
        let max_directory_depth = env_or("MAX_DIRECTORY_DEPTH", "10")
            .parse::<u32>()
            .context("MAX_DIRECTORY_DEPTH must be an integer")?;

        Ok(Config {
            host: env_or("SERVER_HOST", "127.0.0.1"),
            port,
            max_connections,
            user_base_path: env_or("USER_BASE_PATH", "users"),
            default_subdirectories: split_list(&env_or(
                "DEFAULT_SUBDIRECTORIES",
                "invoices,ledgers",
            )),
            create_default_subdirs: env_or("CREATE_DEFAULT_SUBDIRS", "true") == "true",
            s3_bucket,
            s3_region: env_or("S3_REGION", "us-east-1"),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            max_file_size,
            allowed_extensions: split_list(&env_or("ALLOWED_EXTENSIONS", "")),
            blocked_extensions: split_list(&env_or("BLOCKED_EXTENSIONS", ".exe,.bat,.sh")),
            max_directory_depth,
            host_key_path: PathBuf::from(env_or("HOST_KEY_PATH", "./sftpgate_host_key")),
            log_enabled: env_or("LOG_ENABLED", "true") == "true",
            log_level: env_or("LOG_LEVEL", "info"),
            log_file: env::var("LOG_FILE").ok().filter(|v| !v.is_empty()).map(PathBuf::from),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(split_list("invoices, ledgers"), vec!["invoices", "ledgers"]);
        assert_eq!(split_list(""), Vec::<String>::new());
        assert_eq!(split_list(".exe,.bat,.sh"), vec![".exe", ".bat", ".sh"]);
    }
}
