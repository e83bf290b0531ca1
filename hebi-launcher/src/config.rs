use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use url::Url;

const LAUNCHER_PORT: u16 = 8085;

const DEFAULT_NAMESPACE: &str = "hebi";
const DEFAULT_INGRESS_NAME: &str = "hebi-ingress";
const DEFAULT_INGRESS_HOST: &str = "hebi.diamond.ac.uk";
const DEFAULT_LDAP_URL: &str = "ldap://ldap.diamond.ac.uk";
const DEFAULT_CAS_SERVER: &str = "https://auth.diamond.ac.uk/cas";
const DEFAULT_SESSION_IMAGE: &str = "hebi-session:latest";
const DEFAULT_ACTIVITY_FILE: &str = "/persistent_data/all_sessions_activity.json";

// Fallback API server when running outside the cluster.
const OUT_OF_CLUSTER_API_URL: &str = "http://localhost:8090";

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 20;
const DEFAULT_REAP_INTERVAL_SECS: u64 = 120;
const DEFAULT_ACTIVITY_FLUSH_INTERVAL_SECS: u64 = 300;
const DEFAULT_POD_READY_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Production,
    Development,
}

#[derive(Debug, Clone)]
pub struct Conf {
    pub run_mode: RunMode,
    pub bind_addr: SocketAddr,
    pub jwt_key: String,
    pub in_cluster: bool,
    pub api_server_url: Url,
    pub namespace: String,
    pub ingress_name: String,
    pub ingress_host: String,
    pub ldap_url: String,
    pub cas_server: Url,
    pub session_image: String,
    pub heartbeat_interval: Duration,
    pub reap_interval: Duration,
    pub inactivity_threshold: Duration,
    pub activity_flush_interval: Duration,
    pub activity_file: Utf8PathBuf,
    pub pod_ready_timeout: Duration,
}

impl Conf {
    pub fn from_env() -> anyhow::Result<Self> {
        let run_mode = run_mode_from_env();

        // Production deployments sit behind the ingress and only need
        // loopback; anything else binds every interface for convenience.
        let bind_ip = match run_mode {
            RunMode::Production => IpAddr::V4(Ipv4Addr::LOCALHOST),
            RunMode::Development => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let inactivity_hrs: u64 = required_env("SESSION_INACTIVITY_PERIOD_HRS")?
            .parse()
            .context("SESSION_INACTIVITY_PERIOD_HRS must be an integer number of hours")?;
        let inactivity_days: u64 = required_env("SESSION_INACTIVITY_PERIOD_DAYS")?
            .parse()
            .context("SESSION_INACTIVITY_PERIOD_DAYS must be an integer number of days")?;

        Ok(Conf {
            run_mode,
            bind_addr: SocketAddr::new(bind_ip, LAUNCHER_PORT),
            jwt_key: required_env("JWT_KEY")?,
            in_cluster: env::var("IN_CLUSTER").is_ok_and(|value| value == "True"),
            api_server_url: OUT_OF_CLUSTER_API_URL
                .parse()
                .expect("hardcoded URL is valid"),
            namespace: env_or("HEBI_NAMESPACE", DEFAULT_NAMESPACE),
            ingress_name: env_or("HEBI_INGRESS_NAME", DEFAULT_INGRESS_NAME),
            ingress_host: env_or("HEBI_INGRESS_HOST", DEFAULT_INGRESS_HOST),
            ldap_url: env_or("LDAP_SERVER_URL", DEFAULT_LDAP_URL),
            cas_server: env_or("CAS_SERVER", DEFAULT_CAS_SERVER)
                .parse()
                .context("CAS_SERVER is not a valid URL")?,
            session_image: env_or("HEBI_SESSION_IMAGE", DEFAULT_SESSION_IMAGE),
            heartbeat_interval: interval_env(
                "ALL_SESSIONS_CHECK_INTERVAL",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )?,
            reap_interval: interval_env(
                "INACTIVE_SESSION_CHECK_INTERVAL",
                DEFAULT_REAP_INTERVAL_SECS,
            )?,
            inactivity_threshold: Duration::from_secs(
                inactivity_days * 60 * 60 * 24 + inactivity_hrs * 60 * 60,
            ),
            activity_flush_interval: interval_env(
                "WRITE_SESSION_ACTIVITY_INTERVAL",
                DEFAULT_ACTIVITY_FLUSH_INTERVAL_SECS,
            )?,
            activity_file: env_or("SESSION_ACTIVITY_FILE_PATH", DEFAULT_ACTIVITY_FILE).into(),
            pod_ready_timeout: interval_env(
                "SESSION_START_TIMEOUT",
                DEFAULT_POD_READY_TIMEOUT_SECS,
            )?,
        })
    }
}

fn run_mode_from_env() -> RunMode {
    // RUN_MODE is the documented variable; FLASK_MODE is accepted for
    // compatibility with manifests written for earlier deployments.
    let value = env::var("RUN_MODE").or_else(|_| env::var("FLASK_MODE"));

    match value.as_deref() {
        Ok("production") => RunMode::Production,
        _ => RunMode::Development,
    }
}

fn required_env(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} environment variable is required"))
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn interval_env(name: &str, default_secs: u64) -> anyhow::Result<Duration> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Duration::from_secs)
            .with_context(|| format!("{name} must be an integer number of seconds")),
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

/// Configuration handle, source of truth for current configuration state.
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<parking_lot::RwLock<Arc<Conf>>>,
}

impl ConfHandle {
    /// Initializes configuration for this instance.
    pub fn init() -> anyhow::Result<Self> {
        let conf = Conf::from_env().context("invalid environment configuration")?;

        Ok(Self {
            inner: Arc::new(parking_lot::RwLock::new(Arc::new(conf))),
        })
    }

    #[doc(hidden)]
    pub fn mock(conf: Conf) -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(Arc::new(conf))),
        }
    }

    /// Returns current configuration state (do not hold it forever as it may become outdated)
    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.read().clone()
    }
}
