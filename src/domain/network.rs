//! Firewall exposure and reverse-proxy route.

use std::fmt::Write as _;

use serde::Serialize;

use super::merge::MergedConfig;
use crate::domain::ConfigurationError;

/// Ports to open in the host firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub tcp_ports: Vec<u16>,
}

/// Reverse-proxy mapping from an external URL to the web listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRoute {
    pub domain: String,
    pub path_prefix: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub websockets: bool,
}

impl ProxyRoute {
    pub fn backend_url(&self) -> String {
        if self.backend_host.contains(':') {
            format!("http://[{}]:{}", self.backend_host, self.backend_port)
        } else {
            format!("http://{}:{}", self.backend_host, self.backend_port)
        }
    }

    /// Render as an nginx server block.
    pub fn render_nginx(&self) -> String {
        let mut conf = String::new();
        let _ = writeln!(conf, "server {{");
        let _ = writeln!(conf, "    listen 80;");
        let _ = writeln!(conf, "    listen [::]:80;");
        let _ = writeln!(conf, "    server_name {};", self.domain);
        let _ = writeln!(conf);
        let _ = writeln!(conf, "    location {} {{", self.path_prefix);
        let _ = writeln!(conf, "        proxy_pass {};", self.backend_url());
        let _ = writeln!(conf, "        proxy_set_header Host $host;");
        let _ = writeln!(conf, "        proxy_set_header X-Real-IP $remote_addr;");
        let _ = writeln!(conf, "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;");
        let _ = writeln!(conf, "        proxy_set_header X-Forwarded-Proto $scheme;");
        if self.websockets {
            let _ = writeln!(conf, "        proxy_http_version 1.1;");
            let _ = writeln!(conf, "        proxy_set_header Upgrade $http_upgrade;");
            let _ = writeln!(conf, "        proxy_set_header Connection \"upgrade\";");
        }
        let _ = writeln!(conf, "    }}");
        let _ = writeln!(conf, "}}");
        conf
    }
}

/// Exposure switches from the module options.
#[derive(Debug, Clone, Default)]
pub struct ExposureOptions {
    pub open_firewall: bool,
    pub proxy_enable: bool,
    pub proxy_domain: Option<String>,
}

/// Derived network exposure. Either part may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkPlan {
    pub firewall: Option<FirewallRule>,
    pub proxy: Option<ProxyRoute>,
}

/// Derive the firewall rule and proxy route from merged settings.
pub fn build(merged: &MergedConfig, options: &ExposureOptions) -> Result<NetworkPlan, ConfigurationError> {
    let firewall = if options.open_firewall {
        let port = required_port(merged, "soulseek.listen_port")?;
        Some(FirewallRule { tcp_ports: vec![port] })
    } else {
        None
    };

    let proxy = if options.proxy_enable {
        let domain = options
            .proxy_domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(ConfigurationError::MissingProxyDomain)?;
        Some(ProxyRoute {
            domain: domain.to_string(),
            path_prefix: merged.get_str("web.url_base").unwrap_or("/").to_string(),
            backend_host: backend_host(merged.get_str("web.ip_address")),
            backend_port: required_port(merged, "web.port")?,
            websockets: true,
        })
    } else {
        None
    };

    Ok(NetworkPlan { firewall, proxy })
}

fn required_port(merged: &MergedConfig, path: &str) -> Result<u16, ConfigurationError> {
    merged
        .get_port(path)
        .ok_or_else(|| ConfigurationError::MissingOption { path: path.to_string() })
}

/// The proxy reaches the listener over loopback unless it is bound to a
/// specific address.
fn backend_host(bind: Option<&str>) -> String {
    match bind.map(str::trim) {
        None | Some("") | Some("0.0.0.0") | Some("*") => "127.0.0.1".to_string(),
        Some("::") | Some("[::]") => "::1".to_string(),
        Some(addr) => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::merge::{ConfigMerger, Overlay};
    use crate::domain::options::slskd_schema;
    use serde_json::{json, Value};

    fn merged(settings: Value) -> MergedConfig {
        let schema = slskd_schema();
        ConfigMerger::new(&schema).merge(&settings, &Overlay::new()).unwrap()
    }

    fn base() -> MergedConfig {
        merged(json!({"soulseek": {"username": "alice", "listen_port": 50300}, "web": {"port": 5030}}))
    }

    #[test]
    fn test_firewall_gating() {
        let plan = build(&base(), &ExposureOptions::default()).unwrap();
        assert_eq!(plan.firewall, None);

        let options = ExposureOptions {
            open_firewall: true,
            ..Default::default()
        };
        let plan = build(&base(), &options).unwrap();
        assert_eq!(plan.firewall, Some(FirewallRule { tcp_ports: vec![50300] }));
    }

    #[test]
    fn test_proxy_gating() {
        let disabled = ExposureOptions {
            proxy_enable: false,
            proxy_domain: Some("music.example.org".to_string()),
            ..Default::default()
        };
        assert_eq!(build(&base(), &disabled).unwrap().proxy, None);

        let enabled = ExposureOptions {
            proxy_enable: true,
            ..disabled
        };
        let route = build(&base(), &enabled).unwrap().proxy.unwrap();
        assert_eq!(route.domain, "music.example.org");
        assert_eq!(route.path_prefix, "/");
        assert_eq!(route.backend_url(), "http://127.0.0.1:5030");
        assert!(route.websockets);
    }

    #[test]
    fn test_proxy_without_domain() {
        let options = ExposureOptions {
            proxy_enable: true,
            proxy_domain: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            build(&base(), &options).unwrap_err(),
            ConfigurationError::MissingProxyDomain
        );
    }

    #[test]
    fn test_proxy_follows_bind_address_and_url_base() {
        let m = merged(json!({
            "soulseek": {"username": "alice"},
            "web": {"ip_address": "10.0.0.5", "url_base": "/slskd"},
        }));
        let options = ExposureOptions {
            proxy_enable: true,
            proxy_domain: Some("example.org".to_string()),
            ..Default::default()
        };
        let route = build(&m, &options).unwrap().proxy.unwrap();
        assert_eq!(route.backend_url(), "http://10.0.0.5:5001");

        let conf = route.render_nginx();
        assert!(conf.contains("server_name example.org;"));
        assert!(conf.contains("location /slskd {"));
        assert!(conf.contains("proxy_pass http://10.0.0.5:5001;"));
        assert!(conf.contains("proxy_set_header Upgrade $http_upgrade;"));
    }

    #[test]
    fn test_relative_url_base_never_reaches_the_route() {
        let schema = slskd_schema();
        let merger = ConfigMerger::new(&schema);
        let settings = json!({"soulseek": {"username": "alice"}, "web": {"url_base": "slskd"}});
        assert!(matches!(
            merger.merge(&settings, &Overlay::new()),
            Err(crate::domain::SchemaError::InvalidValue { .. })
        ));

        let overlay = Overlay::from([("web.url_base".to_string(), json!("slskd"))]);
        assert!(merger
            .merge(&json!({"soulseek": {"username": "alice"}}), &overlay)
            .is_err());
    }

    #[test]
    fn test_backend_host_wildcards() {
        assert_eq!(backend_host(None), "127.0.0.1");
        assert_eq!(backend_host(Some("0.0.0.0")), "127.0.0.1");
        assert_eq!(backend_host(Some("::")), "::1");
        assert_eq!(backend_host(Some("192.168.1.2")), "192.168.1.2");
    }
}
