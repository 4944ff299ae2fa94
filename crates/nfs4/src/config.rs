//! Client and callback listener settings, with fluent setters.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use oncrpc::AuthNone;
use oncrpc::AuthSys;
use oncrpc::ConnectionConfig;
use oncrpc::SecurityFlavor;

use crate::proto::consts::DEFAULT_CB_PROGRAM;
use crate::proto::consts::NFS4_PORT;

/// Credential flavor used on the fore channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    None,
    #[default]
    Sys,
}

/// Where the callback listener binds and what it tells the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackConfig {
    pub bind: String,
    pub program: u32,
    /// Address advertised in SETCLIENTID. Defaults to the local address of
    /// the fore channel.
    pub advertise: Option<IpAddr>,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:0".into(), program: DEFAULT_CB_PROGRAM, advertise: None }
    }
}

impl CallbackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn program(mut self, program: u32) -> Self {
        self.program = program;
        self
    }

    pub fn advertise(mut self, addr: IpAddr) -> Self {
        self.advertise = Some(addr);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host` or `host:port`; the NFS port is assumed when none is given.
    pub server: String,
    pub client_id: String,
    pub security: Security,
    pub uid: u32,
    pub gid: u32,
    pub machine_name: String,
    /// Path components of the directory `go_home` walks to.
    pub homedir: Vec<String>,
    pub minor_version: u32,
    pub callback: Option<CallbackConfig>,
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            client_id: format!("nfs4-client-{}", std::process::id()),
            security: Security::default(),
            uid: 0,
            gid: 0,
            machine_name: "localhost".into(),
            homedir: Vec::new(),
            minor_version: 0,
            callback: Some(CallbackConfig::default()),
            connection: ConnectionConfig::default(),
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    pub fn machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = machine_name.into();
        self
    }

    /// Sets the home directory from a `/`-separated path.
    pub fn homedir(mut self, path: &str) -> Self {
        self.homedir = split_path(path);
        self
    }

    pub fn minor_version(mut self, minor_version: u32) -> Self {
        self.minor_version = minor_version;
        self
    }

    pub fn callback(mut self, callback: Option<CallbackConfig>) -> Self {
        self.callback = callback;
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.connection.timeout = timeout;
        self
    }

    /// The server address with the default port filled in.
    pub fn server_addr(&self) -> String {
        let has_port = match self.server.rsplit_once(':') {
            Some((host, port)) => port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']')),
            None => false,
        };
        if has_port {
            self.server.clone()
        } else if self.server.contains(':') && !self.server.starts_with('[') {
            format!("[{}]:{}", self.server, NFS4_PORT)
        } else {
            format!("{}:{}", self.server, NFS4_PORT)
        }
    }

    pub fn security_flavor(&self) -> Arc<dyn SecurityFlavor> {
        match self.security {
            Security::None => Arc::new(AuthNone),
            Security::Sys => Arc::new(AuthSys::new(self.machine_name.clone(), self.uid, self.gid)),
        }
    }
}

/// Splits a path into components, dropping empty ones.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/').filter(|part| !part.is_empty()).map(String::from).collect()
}
