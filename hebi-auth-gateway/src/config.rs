use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context as _;
use url::Url;

const GATEWAY_PORT: u16 = 8086;

const DEFAULT_CAS_SERVER: &str = "https://auth.diamond.ac.uk/cas";
const DEFAULT_SERVICE_URL: &str = "https://hebi.diamond.ac.uk/launcher/";

#[derive(Debug, Clone)]
pub struct Conf {
    pub bind_addr: SocketAddr,
    pub jwt_key: String,
    /// Base URL of the enterprise SSO server.
    pub cas_server: Url,
    /// Service URL registered with the SSO server; tickets are only valid
    /// for this exact value.
    pub service_url: Url,
}

impl Conf {
    pub fn from_env() -> anyhow::Result<Self> {
        let run_mode = env::var("RUN_MODE").or_else(|_| env::var("FLASK_MODE"));

        let bind_ip = match run_mode.as_deref() {
            Ok("production") => IpAddr::V4(Ipv4Addr::LOCALHOST),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        Ok(Conf {
            bind_addr: SocketAddr::new(bind_ip, GATEWAY_PORT),
            jwt_key: env::var("JWT_KEY").context("JWT_KEY environment variable is required")?,
            cas_server: env::var("CAS_SERVER")
                .unwrap_or_else(|_| DEFAULT_CAS_SERVER.to_owned())
                .parse()
                .context("CAS_SERVER is not a valid URL")?,
            service_url: env::var("HEBI_SERVICE_URL")
                .unwrap_or_else(|_| DEFAULT_SERVICE_URL.to_owned())
                .parse()
                .context("HEBI_SERVICE_URL is not a valid URL")?,
        })
    }
}

#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<Conf>,
}

impl ConfHandle {
    pub fn init() -> anyhow::Result<Self> {
        let conf = Conf::from_env().context("invalid environment configuration")?;
        Ok(Self { inner: Arc::new(conf) })
    }

    #[doc(hidden)]
    pub fn mock(conf: Conf) -> Self {
        Self { inner: Arc::new(conf) }
    }

    pub fn get_conf(&self) -> Arc<Conf> {
        Arc::clone(&self.inner)
    }
}
