//! Handshake `connect` parameters.
//!
//! [`ClientProfile`] is the static half of the handshake (who we are, what we
//! ask for). [`ConnectParams::build`] combines it with the endpoint
//! credentials and the signed challenge to produce the exact payload of the
//! `connect` request.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Protocol version this client speaks (sent as both min and max).
pub const PROTOCOL_VERSION: u32 = 3;

/// Client version reported in the handshake.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default locale.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Scopes an operator asks for unless configured otherwise.
pub const DEFAULT_OPERATOR_SCOPES: &[&str] = &["operator.admin"];

/// Connection role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human-driven control client
    #[default]
    Operator,
    /// Headless capability host
    Node,
}

impl Role {
    /// Wire value of `role` (and of `client.mode`, which always matches it).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Node => "node",
        }
    }

    /// Value of `client.id` for this role.
    pub fn client_id(self) -> &'static str {
        match self {
            Self::Operator => "cli",
            Self::Node => "headless-node",
        }
    }

    /// Value of `client.mode`: `"node"` iff the role is node.
    pub fn mode(self) -> &'static str {
        self.as_str()
    }

    /// Scopes requested by default.
    pub fn default_scopes(self) -> Vec<String> {
        match self {
            Self::Operator => DEFAULT_OPERATOR_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            Self::Node => Vec::new(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform the gateway is told we run on.
///
/// There is deliberately no browser-style catch-all: unknown hosts report
/// [`Platform::Linux`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux and anything unrecognized
    Linux,
    /// macOS
    Macos,
    /// Windows
    Windows,
    /// iOS
    Ios,
    /// Android
    Android,
}

impl Platform {
    /// All values accepted by the gateway.
    pub const ALL: [Self; 5] = [Self::Linux, Self::Macos, Self::Windows, Self::Ios, Self::Android];

    /// Map a `std::env::consts::OS` value.
    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" => Self::Macos,
            "windows" => Self::Windows,
            "ios" => Self::Ios,
            "android" => Self::Android,
            _ => Self::Linux,
        }
    }

    /// Platform of the running host.
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of this client, sent with every handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    /// Requested role
    pub role: Role,
    /// Client version (semver)
    pub version: String,
    /// Reported platform
    pub platform: Platform,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Advertised capabilities
    pub caps: Vec<String>,
    /// Advertised commands (nodes)
    pub commands: Vec<String>,
    /// Advertised permission grants
    pub permissions: BTreeMap<String, bool>,
    /// Locale
    pub locale: String,
    /// User agent
    pub user_agent: String,
}

impl ClientProfile {
    /// Defaults for `role` on the current host.
    pub fn for_role(role: Role) -> Self {
        let platform = Platform::current();
        Self {
            role,
            version: CLIENT_VERSION.to_string(),
            platform,
            scopes: role.default_scopes(),
            caps: Vec::new(),
            commands: Vec::new(),
            permissions: BTreeMap::new(),
            locale: DEFAULT_LOCALE.to_string(),
            user_agent: format!("clawlink/{CLIENT_VERSION} ({platform})"),
        }
    }
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self::for_role(Role::Operator)
    }
}

/// `client` block of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// `cli` or `headless-node`
    pub id: String,
    /// Client version
    pub version: String,
    /// Host platform
    pub platform: Platform,
    /// `operator` or `node`
    pub mode: String,
}

/// `auth` block of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    /// Bearer token without the `Bearer ` prefix
    pub token: String,
    /// Optional shared password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `device` block of the handshake: the signed challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProof {
    /// Device id
    pub id: String,
    /// Base64 public key
    pub public_key: String,
    /// Base64 signature over `"<nonce>:<signedAt>"`
    pub signature: String,
    /// Challenge `ts`, echoed verbatim
    pub signed_at: u64,
    /// Challenge `nonce`, echoed verbatim
    pub nonce: String,
}

/// Full `connect` request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol accepted
    pub min_protocol: u32,
    /// Highest protocol accepted
    pub max_protocol: u32,
    /// Client description
    pub client: ClientInfo,
    /// Requested role
    pub role: Role,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Capabilities
    pub caps: Vec<String>,
    /// Commands
    pub commands: Vec<String>,
    /// Permissions
    pub permissions: BTreeMap<String, bool>,
    /// Credentials
    pub auth: AuthParams,
    /// Locale
    pub locale: String,
    /// User agent
    pub user_agent: String,
    /// Signed challenge
    pub device: DeviceProof,
}

impl ConnectParams {
    /// Assemble the handshake payload.
    pub fn build(profile: &ClientProfile, auth: AuthParams, device: DeviceProof) -> Self {
        Self {
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: profile.role.client_id().to_string(),
                version: profile.version.clone(),
                platform: profile.platform,
                mode: profile.role.mode().to_string(),
            },
            role: profile.role,
            scopes: profile.scopes.clone(),
            caps: profile.caps.clone(),
            commands: profile.commands.clone(),
            permissions: profile.permissions.clone(),
            auth,
            locale: profile.locale.clone(),
            user_agent: profile.user_agent.clone(),
            device,
        }
    }
}
