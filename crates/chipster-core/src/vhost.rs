//! Renders the lighttpd configuration for the located content.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{BootstrapError, Result};
use crate::paths::DerivedPaths;

/// Where the FastCGI worker listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastCgiTarget {
    Tcp { host: String, port: u16 },
    Socket(String),
}

impl FastCgiTarget {
    /// Parse `host:port` or an absolute unix socket path.
    pub fn parse(bind: &str) -> Result<Self> {
        if bind.starts_with('/') {
            return Ok(FastCgiTarget::Socket(bind.to_string()));
        }
        let (host, port) = bind.rsplit_once(':').ok_or_else(|| {
            BootstrapError::ConfigRenderFailure(format!("invalid FastCGI bind address {:?}", bind))
        })?;
        let port = port.parse::<u16>().map_err(|e| {
            let message = format!("invalid FastCGI port in {:?}: {}", bind, e);
            BootstrapError::ConfigRenderFailure(message)
        })?;
        Ok(FastCgiTarget::Tcp {
            host: host.to_string(),
            port,
        })
    }

    /// The argument passed to `php-cgi -b`
    pub fn bind_arg(&self) -> String {
        match self {
            FastCgiTarget::Tcp { host, port } => format!("{}:{}", host, port),
            FastCgiTarget::Socket(path) => path.clone(),
        }
    }
}

/// Everything the lifecycle needs to bring the HTTP service up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub root_directory: String,
    pub rendered_config: String,
    pub virtual_hosts: BTreeMap<String, String>,
    pub stop_in_background: bool,
    pub fastcgi: Option<FastCgiTarget>,
}

impl ServiceConfig {
    pub fn origin(&self) -> String {
        format!("http://{}:{}", self.listen_host, self.listen_port)
    }
}

pub struct ConfigBuilder {
    listen_host: String,
    listen_port: u16,
    default_folders: Vec<String>,
    fastcgi: Option<FastCgiTarget>,
    access_log: bool,
    stop_in_background: bool,
}

impl ConfigBuilder {
    pub fn new(listen_host: impl Into<String>, listen_port: u16) -> Self {
        Self {
            listen_host: listen_host.into(),
            listen_port,
            default_folders: Vec::new(),
            fastcgi: None,
            access_log: false,
            stop_in_background: false,
        }
    }

    /// Folders always treated as top-level web folders
    pub fn default_folders<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_folders = folders.into_iter().map(Into::into).collect();
        self
    }

    pub fn fastcgi(mut self, target: Option<FastCgiTarget>) -> Self {
        self.fastcgi = target;
        self
    }

    /// Write an access log into the derived logs directory
    pub fn access_log(mut self, enabled: bool) -> Self {
        self.access_log = enabled;
        self
    }

    pub fn stop_in_background(mut self, enabled: bool) -> Self {
        self.stop_in_background = enabled;
        self
    }

    pub fn build(&self, paths: &DerivedPaths, discovered: &[String]) -> Result<ServiceConfig> {
        for (name, path) in paths.entries() {
            ensure_quotable(name, path)?;
        }
        if let Some(FastCgiTarget::Socket(path)) = &self.fastcgi {
            ensure_quotable("FastCGI socket", path)?;
        }
        if let Some(FastCgiTarget::Tcp { host, .. }) = &self.fastcgi {
            ensure_quotable("FastCGI host", host)?;
        }

        let folders = merge_folders(&self.default_folders, discovered);
        let virtual_hosts = paths.virtual_hosts();
        let rendered_config = self.render(paths, &folders, &virtual_hosts);

        Ok(ServiceConfig {
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            root_directory: paths.content_root.clone(),
            rendered_config,
            virtual_hosts,
            stop_in_background: self.stop_in_background,
            fastcgi: self.fastcgi.clone(),
        })
    }

    fn render(
        &self,
        paths: &DerivedPaths,
        folders: &[String],
        virtual_hosts: &BTreeMap<String, String>,
    ) -> String {
        let mut out = format!(
            r#"server.modules += ("mod_simple_vhost", "mod_rewrite")
simple-vhost.server-root = "{web_content}"
simple-vhost.default-host = "default"
server.errorfile-prefix = "{error_pages}/status-"
"#,
            web_content = paths.web_content,
            error_pages = paths.error_pages,
        );

        if self.access_log {
            out.push_str(&format!(
                r#"server.modules += ("mod_accesslog")
accesslog.filename = "{}/access.log"
"#,
                paths.logs
            ));
        }

        out.push_str(&format!(
            r#"
# Paths outside the top-level web folders go to the front controller
url.rewrite-if-not-file = (
    "^/(?!(?:{})/)[^?]*(\?.*)?$" => "/index.php$1"
)
"#,
            folder_alternation(folders)
        ));

        for (host, root) in virtual_hosts {
            out.push_str(&format!(
                r#"
# Virtual host for {host}
$HTTP["host"] == "{host}" {{
    server.document-root = "{root}"
}}
"#
            ));
        }

        if let Some(target) = &self.fastcgi {
            let backend = match target {
                FastCgiTarget::Tcp { host, port } => {
                    format!(r#""host" => "{}", "port" => {}"#, host, port)
                }
                FastCgiTarget::Socket(path) => format!(r#""socket" => "{}""#, path),
            };
            out.push_str(&format!(
                r#"
server.modules += ("mod_fastcgi")
index-file.names += ("index.php")
fastcgi.server = ( ".php" => (( {}, "check-local" => "enable" )) )
"#,
                backend
            ));
        }

        out
    }
}

/// Defaults first, then discovered folders; duplicates keep their first
/// position. Names that cannot be quoted are dropped.
pub fn merge_folders(defaults: &[String], discovered: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(defaults.len() + discovered.len());
    for name in defaults.iter().chain(discovered) {
        if name.is_empty() || merged.contains(name) {
            continue;
        }
        if name.contains(['"', '\n', '\r', '/']) {
            warn!("ignoring web folder with unsupported name {:?}", name);
            continue;
        }
        merged.push(name.clone());
    }
    merged
}

/// `a|b|c` with each name regex-escaped
pub fn folder_alternation(folders: &[String]) -> String {
    folders
        .iter()
        .map(|f| regex::escape(f))
        .collect::<Vec<_>>()
        .join("|")
}

fn ensure_quotable(name: &str, value: &str) -> Result<()> {
    if value.contains(['"', '\n', '\r']) {
        return Err(BootstrapError::ConfigRenderFailure(format!(
            "{} path {:?} cannot be quoted in the server config",
            name, value
        )));
    }
    Ok(())
}
