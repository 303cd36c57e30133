//! Startup-only configuration: bind address, storage locations, upstream
//! credentials, operator token. Everything that can change between ticks
//! without a restart lives in `common::knobs` instead -- this struct is
//! only the handful of parameters a process needs once, at boot, matching
//! the teacher's `LocalConfig` split between CLI-parsed startup args and
//! env-overridable runtime knobs.

use std::fmt;

use clap::Parser;

#[derive(Parser, Clone)]
#[clap(author, version, about = "Tiered timeseries ingestion and query backend")]
pub struct BackendConfig {
    /// Host interface to bind the HTTP server to.
    #[clap(long, env = "BIND_INTERFACE", default_value = "0.0.0.0")]
    pub interface: std::net::Ipv4Addr,

    /// Port the HTTP server listens on.
    #[clap(long, env = "BIND_PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite file backing the hot tier and the coordination store.
    #[clap(long, env = "HOT_DB_PATH", default_value = "timeseries_backend.sqlite3")]
    pub hot_db_path: String,

    /// Where cold-tier chunks live: a local directory path, or
    /// `s3://bucket/prefix` for the S3 backend.
    #[clap(long, env = "COLD_STORAGE_ROOT", default_value = "timeseries_cold_storage")]
    pub cold_storage_root: String,

    /// Base URL of the upstream IoT API.
    #[clap(long, env = "UPSTREAM_BASE_URL")]
    pub upstream_base_url: String,

    /// Bearer token sent to the upstream IoT API.
    #[clap(long, env = "UPSTREAM_BEARER_TOKEN")]
    pub upstream_bearer_token: String,

    /// Bearer token operators must present to `POST /backfill/start`.
    #[clap(long, env = "OPERATOR_BEARER_TOKEN")]
    pub operator_bearer_token: String,

    /// Comma-separated list of sites this process runs the ETL
    /// synchronizer and archival compactor for on a schedule.
    #[clap(long, env = "MANAGED_SITES", value_delimiter = ',')]
    pub managed_sites: Vec<String>,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("interface", &self.interface)
            .field("port", &self.port)
            .field("hot_db_path", &self.hot_db_path)
            .field("cold_storage_root", &self.cold_storage_root)
            .field("upstream_base_url", &self.upstream_base_url)
            .field("managed_sites", &self.managed_sites)
            .finish_non_exhaustive()
    }
}

impl BackendConfig {
    pub fn bind_address(&self) -> std::net::SocketAddr {
        (self.interface, self.port).into()
    }

    pub fn is_s3_cold_storage(&self) -> bool {
        self.cold_storage_root.starts_with("s3://")
    }

    /// Parses `s3://bucket/prefix` into `(bucket, prefix)`. Panics if
    /// called when [`Self::is_s3_cold_storage`] is false -- callers must
    /// check first, same contract as the rest of this struct's parsed
    /// accessors.
    pub fn s3_bucket_and_prefix(&self) -> (String, String) {
        let rest = self.cold_storage_root.strip_prefix("s3://").expect("not an s3:// cold storage root");
        match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
            None => (rest.to_string(), String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> BackendConfig {
        BackendConfig::try_parse_from(args).unwrap()
    }

    #[test]
    fn managed_sites_splits_on_comma() {
        let cfg = parse(&[
            "local_backend",
            "--upstream-base-url",
            "https://api.example.com",
            "--upstream-bearer-token",
            "t",
            "--operator-bearer-token",
            "o",
            "--managed-sites",
            "site_a,site_b",
        ]);
        assert_eq!(cfg.managed_sites, vec!["site_a".to_string(), "site_b".to_string()]);
    }

    #[test]
    fn cold_storage_root_detects_s3_scheme() {
        let mut cfg = parse(&[
            "local_backend",
            "--upstream-base-url",
            "https://api.example.com",
            "--upstream-bearer-token",
            "t",
            "--operator-bearer-token",
            "o",
        ]);
        assert!(!cfg.is_s3_cold_storage());
        cfg.cold_storage_root = "s3://my-bucket/ts".to_string();
        assert!(cfg.is_s3_cold_storage());
        assert_eq!(cfg.s3_bucket_and_prefix(), ("my-bucket".to_string(), "ts".to_string()));
    }
}
