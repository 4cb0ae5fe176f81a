//! Command-line configuration.
//!
//! Every flag can also be supplied through an `HCPROXY_*` environment
//! variable. Flags win over the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum, builder::BoolishValueParser};
use thiserror::Error;

use crate::cache::memory::DEFAULT_MEMORY_CAPACITY;
use crate::cache::{CachePolicy, PolicyError, RedisSettings};
use crate::proxy::ProxyOptions;

/// Errors raised while turning the command line into runtime settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("upstream timeout must be at least one second")]
    ZeroTimeout,
}

/// Which cache store backs the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// A shared Redis server.
    Redis,
    /// An in-process map; entries are lost on restart.
    Memory,
}

/// Command-line arguments for the `hcproxy` binary.
#[derive(Debug, Parser)]
#[command(name = "hcproxy", version, about = "HTTP caching forward proxy")]
pub struct Cli {
    /// Debug logging, including request dumps and fingerprint inputs.
    #[arg(
        short,
        long,
        env = "HCPROXY_DEBUG",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::SetTrue
    )]
    pub debug: bool,

    /// Log every proxied exchange.
    #[arg(
        short,
        long,
        env = "HCPROXY_VERBOSE",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::SetTrue
    )]
    pub verbose: bool,

    /// Proxy listen address. `:PORT` listens on all interfaces.
    #[arg(
        long,
        visible_alias = "port",
        env = "HCPROXY_LISTEN",
        value_name = "ADDR",
        default_value = ":48080"
    )]
    pub listen: String,

    /// Cache store backend.
    #[arg(long, env = "HCPROXY_STORE", value_enum, default_value_t = StoreKind::Redis)]
    pub store: StoreKind,

    /// Entry bound for the in-memory store.
    #[arg(
        long,
        env = "HCPROXY_MEMORY_CAPACITY",
        value_name = "ENTRIES",
        default_value_t = DEFAULT_MEMORY_CAPACITY
    )]
    pub memory_capacity: u64,

    /// Redis host.
    #[arg(long, env = "HCPROXY_REDIS_HOST", value_name = "HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    /// Redis port.
    #[arg(long, env = "HCPROXY_REDIS_PORT", value_name = "PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Redis password.
    #[arg(long, env = "HCPROXY_REDIS_PASSWORD", value_name = "PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Redis database index.
    #[arg(long, env = "HCPROXY_REDIS_DB", value_name = "INDEX", default_value_t = 0)]
    pub redis_db: i64,

    /// TOML file overriding the caching allow-lists.
    #[arg(long, env = "HCPROXY_POLICY", value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Seconds allowed for connecting to and exchanging with an origin.
    #[arg(long, env = "HCPROXY_UPSTREAM_TIMEOUT", value_name = "SECONDS", default_value_t = 30)]
    pub upstream_timeout: u64,
}

impl Cli {
    /// The address to bind, with a bare `:PORT` or `PORT` expanded to all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        let listen = self.listen.trim();
        if let Some(port) = listen.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else if !listen.is_empty() && listen.bytes().all(|b| b.is_ascii_digit()) {
            format!("0.0.0.0:{listen}")
        } else {
            listen.to_owned()
        }
    }

    /// Returns the Redis connection settings named by the `--redis-*` flags.
    pub fn redis_settings(&self) -> RedisSettings {
        RedisSettings {
            host: self.redis_host.clone(),
            port: self.redis_port,
            password: self.redis_password.clone(),
            db: self.redis_db,
        }
    }

    /// Loads the policy file if one was given, otherwise the built-in policy.
    pub fn policy(&self) -> Result<CachePolicy, ConfigError> {
        match &self.policy {
            Some(path) => Ok(CachePolicy::from_file(path)?),
            None => Ok(CachePolicy::default()),
        }
    }

    /// Returns the proxy settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroTimeout`] when `--upstream-timeout` is 0.
    pub fn proxy_options(&self) -> Result<ProxyOptions, ConfigError> {
        if self.upstream_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(ProxyOptions {
            upstream_timeout: Duration::from_secs(self.upstream_timeout),
            verbose: self.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["hcproxy"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn listen_address_forms() {
        let cli = parse(&["--listen", ":9000"]);
        assert_eq!(cli.listen_addr(), "0.0.0.0:9000");

        let cli = parse(&["--port", "9001"]);
        assert_eq!(cli.listen_addr(), "0.0.0.0:9001");

        let cli = parse(&["--listen", "127.0.0.1:9002"]);
        assert_eq!(cli.listen_addr(), "127.0.0.1:9002");
    }

    #[test]
    fn short_flags() {
        let cli = parse(&["-d", "-v", "--store", "memory"]);
        assert!(cli.debug);
        assert!(cli.verbose);
        assert_eq!(cli.store, StoreKind::Memory);
        assert_eq!(cli.memory_capacity, DEFAULT_MEMORY_CAPACITY);

        let cli = parse(&["--store", "memory", "--memory-capacity", "500"]);
        assert_eq!(cli.memory_capacity, 500);
    }

    #[test]
    fn redis_flags_build_settings() {
        let cli = parse(&[
            "--redis-host",
            "cache.internal",
            "--redis-port",
            "6380",
            "--redis-password",
            "s3cret",
            "--redis-db",
            "2",
        ]);
        let settings = cli.redis_settings();
        assert_eq!(settings.host, "cache.internal");
        assert_eq!(settings.port, 6380);
        assert_eq!(settings.password.as_deref(), Some("s3cret"));
        assert_eq!(settings.db, 2);
    }

    #[test]
    fn rejects_unknown_store() {
        assert!(Cli::try_parse_from(["hcproxy", "--store", "sqlite"]).is_err());
    }

    #[test]
    fn policy_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cacheable_actions = [\"listUsers\"]").unwrap();

        let path = file.path().to_str().unwrap().to_owned();
        let cli = parse(&["--policy", &path]);
        let policy = cli.policy().unwrap();
        assert!(policy.is_cacheable_action("listUsers"));
        assert!(!policy.is_cacheable_action("getList"));
        assert_eq!(policy.action_header(), "Soapaction");
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let cli = parse(&["--policy", "/nonexistent/hcproxy-policy.toml"]);
        assert!(matches!(cli.policy(), Err(ConfigError::Policy(PolicyError::Read { .. }))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cli = parse(&["--upstream-timeout", "0"]);
        assert!(matches!(cli.proxy_options(), Err(ConfigError::ZeroTimeout)));

        let options = parse(&["-v"]).proxy_options().unwrap();
        assert_eq!(options.upstream_timeout, Duration::from_secs(30));
        assert!(options.verbose);
    }
}
