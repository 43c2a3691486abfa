//! Blocking HTTP client for the Termoweb cloud API.
//!
//! - Blocking client using `ureq` (no async). Callers on an async runtime must dispatch
//!   through a worker thread (see `Coordinator`).
//! - [`HeaterClient`] is the contract the rest of the crate depends on; [`TermowebClient`]
//!   is the production implementation.
//!
//! Authentication
//! - OAuth2 password grant against the Termoweb token endpoint; the bearer token is cached
//!   and renewed shortly before it expires, or once after an API call is rejected with 401.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::termoweb::*;

pub const DEFAULT_BASE_URL: &str = "https://control.termoweb.net";
const TOKEN_PATH: &str = "/client/token";
// base64("52172dc84f63d6c759000005:bxv4Z3xUSe"), the client credentials of the vendor app.
const OAUTH_BASIC_AUTH: &str = "NTIxNzJkYzg0ZjYzZDZjNzU5MDAwMDA1OmJ4djRaM3hVU2U=";
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Failures other than rejected credentials.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected response at `{path}`: {message}")]
    Decode { path: String, message: String },
    #[error("heater {0} is not known to any gateway")]
    UnknownHeater(HeaterId),
    #[error("worker thread failed: {0}")]
    Worker(String),
}

/// The two error kinds a collaborator may raise.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Authentication(_))
    }
}

/// Blocking vendor API contract. Implementations must be usable from worker threads.
pub trait HeaterClient: Send + Sync {
    /// Authenticate and verify the account is reachable.
    fn connect(&self) -> Result<(), ClientError>;

    /// Fetch the state of every heater on the account.
    fn get_devices(&self) -> Result<HeaterMap, ClientError>;

    /// Apply a vendor mode and target temperature to one heater.
    fn set_heater(&self, id: HeaterId, mode: &str, target_temp: f64) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
struct AccessToken {
    access_token: String,
    expires_at: Instant,
}

pub struct TermowebClient {
    agent: ureq::Agent,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<AccessToken>>,
    /// Which gateway each heater was last seen on.
    routes: Mutex<HashMap<HeaterId, DevId>>,
}

impl fmt::Debug for TermowebClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermowebClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl TermowebClient {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        TermowebClient {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            token: Mutex::new(None),
            routes: Mutex::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn password_grant(&self) -> Result<AccessToken, ClientError> {
        #[derive(serde::Deserialize)]
        struct R {
            access_token: String,
            expires_in: u64,
        }

        let resp = self
            .agent
            .post(&self.url(TOKEN_PATH))
            .set("Accept", "application/json")
            .set("Authorization", &format!("Basic {}", OAUTH_BASIC_AUTH))
            .send_form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ]);
        match resp {
            Ok(r) => {
                let R {
                    access_token,
                    expires_in,
                } = decode(r)?;
                debug!("Obtained Termoweb access token (expires in {}s)", expires_in);
                Ok(AccessToken {
                    access_token,
                    expires_at: Instant::now() + Duration::from_secs(expires_in),
                })
            }
            Err(ureq::Error::Status(status @ (400 | 401 | 403), r)) => {
                let body = r.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(ClientError::Authentication(format!("http {}: {}", status, body)))
            }
            Err(e) => Err(transport_or_status(e).into()),
        }
    }

    fn bearer(&self, force_renew: bool) -> Result<String, ClientError> {
        let mut guard = self.token.lock().unwrap_or_else(|e| e.into_inner());
        let needs_renew = force_renew
            || match guard.as_ref() {
                None => true,
                Some(t) => Instant::now() + TOKEN_EXPIRY_SKEW >= t.expires_at,
            };
        if needs_renew {
            *guard = Some(self.password_grant()?);
        }
        match guard.as_ref() {
            Some(t) => Ok(t.access_token.clone()),
            None => Err(ClientError::Authentication("no access token".to_string())),
        }
    }

    /// Send an authenticated request, renewing the token and retrying once on 401.
    fn call<T, F>(&self, send: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> Result<ureq::Response, ureq::Error>,
    {
        let auth = format!("Bearer {}", self.bearer(false)?);
        match send(auth.as_str()) {
            Ok(res) => decode(res),
            Err(ureq::Error::Status(401, _)) => {
                debug!("Access token rejected; renewing and retrying once");
                let auth = format!("Bearer {}", self.bearer(true)?);
                match send(auth.as_str()) {
                    Ok(res) => decode(res),
                    Err(ureq::Error::Status(401, r)) => {
                        let body = r.into_string().unwrap_or_else(|_| String::from("<no body>"));
                        Err(ClientError::Authentication(format!("http 401: {}", body)))
                    }
                    Err(e) => Err(transport_or_status(e).into()),
                }
            }
            Err(e) => Err(transport_or_status(e).into()),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        self.call(|auth| {
            self.agent
                .get(&url)
                .set("Accept", "application/json")
                .set("Authorization", auth)
                .call()
        })
    }

    fn post_json(&self, path: &str, body: &impl serde::Serialize) -> Result<(), ClientError> {
        let url = self.url(path);
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode {
            path: ".".to_string(),
            message: e.to_string(),
        })?;
        let _: serde_json::Value = self.call(|auth| {
            self.agent
                .post(&url)
                .set("Accept", "application/json")
                .set("Authorization", auth)
                .send_json(body.clone())
        })?;
        Ok(())
    }

    pub fn get_devs(&self) -> Result<Vec<Dev>, ClientError> {
        let devs: DevsResponse = self.get_json("/api/v2/devs/")?;
        Ok(devs.devs)
    }

    pub fn get_nodes(&self, dev_id: &DevId) -> Result<Vec<Node>, ClientError> {
        let nodes: NodesResponse = self.get_json(&format!("/api/v2/devs/{}/mgr/nodes", dev_id.0))?;
        Ok(nodes.nodes)
    }

    pub fn get_heater_settings(&self, dev_id: &DevId, id: HeaterId) -> Result<HeaterSettings, ClientError> {
        self.get_json(&format!("/api/v2/devs/{}/htr/{}/settings", dev_id.0, id.0))
    }

    fn route(&self, id: HeaterId) -> Option<DevId> {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }
}

impl HeaterClient for TermowebClient {
    fn connect(&self) -> Result<(), ClientError> {
        self.bearer(true)?;
        let devs = self.get_devs()?;
        debug!("Connected to Termoweb; {} gateway(s) on account", devs.len());
        Ok(())
    }

    fn get_devices(&self) -> Result<HeaterMap, ClientError> {
        let mut heaters = HeaterMap::new();
        let mut routes = HashMap::new();

        for dev in self.get_devs()? {
            for node in self.get_nodes(&dev.dev_id)? {
                if !node.is_heater() {
                    continue;
                }
                if heaters.contains_key(&node.addr) {
                    warn!(
                        "Heater {} on gateway {} collides with an earlier gateway; ignoring it",
                        node.addr, dev.dev_id.0
                    );
                    continue;
                }
                let settings = self.get_heater_settings(&dev.dev_id, node.addr)?;
                heaters.insert(node.addr, settings.into_state(node.addr, node.name));
                routes.insert(node.addr, dev.dev_id.clone());
            }
        }

        *self.routes.lock().unwrap_or_else(|e| e.into_inner()) = routes;
        Ok(heaters)
    }

    fn set_heater(&self, id: HeaterId, mode: &str, target_temp: f64) -> Result<(), ClientError> {
        let dev_id = match self.route(id) {
            Some(d) => d,
            None => {
                self.get_devices()?;
                self.route(id).ok_or(ApiError::UnknownHeater(id))?
            }
        };
        let update = SettingsUpdate::celsius(mode, target_temp);
        debug!(
            "Setting heater {} on gateway {}: mode={} stemp={}",
            id, dev_id.0, update.mode, update.stemp
        );
        self.post_json(&format!("/api/v2/devs/{}/htr/{}/settings", dev_id.0, id.0), &update)
    }
}

fn decode<T: DeserializeOwned>(res: ureq::Response) -> Result<T, ClientError> {
    let body = res
        .into_string()
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    // Some write endpoints answer with an empty body.
    let body = if body.trim().is_empty() { "null" } else { body.as_str() };
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| {
        ClientError::Api(ApiError::Decode {
            path: e.path().to_string(),
            message: e.into_inner().to_string(),
        })
    })
}

fn transport_or_status(e: ureq::Error) -> ApiError {
    match e {
        ureq::Error::Transport(t) => ApiError::Transport(t.to_string()),
        ureq::Error::Status(status, res) => {
            let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
            ApiError::Http { status, message: body }
        }
    }
}
