//! The slskd option tree.

use serde_json::json;

use super::schema::{OptionKind, OptionNode, Schema};

/// Dotted path the secret injector fills in.
pub const SECRET_PATH: &str = "soulseek.password";

pub const DEFAULT_LISTEN_PORT: u16 = 50000;
pub const DEFAULT_WEB_PORT: u16 = 5001;

fn list(kind: OptionKind) -> OptionKind {
    OptionKind::List(Box::new(kind))
}

fn transfer_limits(name: &'static str, description: &'static str) -> OptionNode {
    OptionNode::group(
        name,
        description,
        vec![
            OptionNode::optional("slots", OptionKind::Integer, "Concurrent transfer slots"),
            OptionNode::optional("speed_limit", OptionKind::Integer, "Speed limit in KiB/s"),
        ],
    )
}

/// Build the schema for slskd's settings file.
pub fn slskd_schema() -> Schema {
    Schema::new(
        vec![
            OptionNode::leaf(
                "remote_configuration",
                OptionKind::Boolean,
                json!(false),
                "Allow editing the configuration from the web UI",
            ),
            OptionNode::leaf(
                "remote_file_management",
                OptionKind::Boolean,
                json!(false),
                "Allow deleting downloaded files from the web UI",
            ),
            OptionNode::group(
                "flags",
                "Runtime flags",
                vec![
                    OptionNode::leaf(
                        "force_share_scan",
                        OptionKind::Boolean,
                        json!(false),
                        "Rescan shares on every start",
                    ),
                    OptionNode::leaf(
                        "no_version_check",
                        OptionKind::Boolean,
                        json!(true),
                        "Skip the upstream version check; the package is managed externally",
                    ),
                ],
            ),
            OptionNode::group(
                "directories",
                "Transfer directories",
                vec![
                    OptionNode::optional("incomplete", OptionKind::Path, "Directory for partial downloads"),
                    OptionNode::optional("downloads", OptionKind::Path, "Directory for completed downloads"),
                ],
            ),
            OptionNode::group(
                "shares",
                "Shared content",
                vec![
                    OptionNode::leaf(
                        "directories",
                        list(OptionKind::ShareDir),
                        json!([]),
                        "Shared directories; `[alias]` renames, a leading `!` excludes",
                    ),
                    OptionNode::leaf(
                        "filters",
                        list(OptionKind::Regex),
                        json!([]),
                        "Regular expressions of files to leave out of shares",
                    ),
                    OptionNode::group(
                        "cache",
                        "Share cache",
                        vec![OptionNode::optional(
                            "storage_mode",
                            OptionKind::Enum(&["memory", "disk"]),
                            "Where the share index is kept",
                        )],
                    ),
                ],
            ),
            OptionNode::leaf("rooms", list(OptionKind::String), json!([]), "Chat rooms to join"),
            OptionNode::group(
                "global",
                "Global transfer limits",
                vec![
                    transfer_limits("upload", "Upload limits"),
                    transfer_limits("download", "Download limits"),
                ],
            ),
            OptionNode::group(
                "soulseek",
                "Soulseek network identity",
                vec![
                    OptionNode::optional("address", OptionKind::String, "Server address"),
                    OptionNode::optional("port", OptionKind::Port, "Server port"),
                    OptionNode::required("username", OptionKind::String, "Account name"),
                    OptionNode::optional("description", OptionKind::String, "Profile description"),
                    OptionNode::leaf(
                        "listen_port",
                        OptionKind::Port,
                        json!(DEFAULT_LISTEN_PORT),
                        "Port for incoming peer connections",
                    ),
                    OptionNode::optional(
                        "diagnostic_level",
                        OptionKind::Enum(&["None", "Warning", "Info", "Debug"]),
                        "Soulseek client diagnostic level",
                    ),
                ],
            ),
            OptionNode::group(
                "web",
                "HTTP listener",
                vec![
                    OptionNode::optional("ip_address", OptionKind::String, "Bind address"),
                    OptionNode::leaf("port", OptionKind::Port, json!(DEFAULT_WEB_PORT), "HTTP port"),
                    OptionNode::leaf("url_base", OptionKind::UrlPath, json!("/"), "Base path of the web UI"),
                    OptionNode::leaf("logging", OptionKind::Boolean, json!(false), "Log HTTP requests"),
                    OptionNode::group(
                        "authentication",
                        "Web UI authentication",
                        vec![
                            OptionNode::leaf(
                                "disabled",
                                OptionKind::Boolean,
                                json!(false),
                                "Disable authentication",
                            ),
                            OptionNode::optional("username", OptionKind::String, "Web UI user"),
                        ],
                    ),
                ],
            ),
            OptionNode::group(
                "logger",
                "Service logging",
                vec![OptionNode::leaf(
                    "disk",
                    OptionKind::Boolean,
                    json!(false),
                    "Write logs below the app directory",
                )],
            ),
            OptionNode::group(
                "retention",
                "Retention in minutes",
                vec![
                    OptionNode::optional("logs", OptionKind::Integer, "Log retention"),
                    OptionNode::group(
                        "files",
                        "File retention",
                        vec![
                            OptionNode::optional("complete", OptionKind::Integer, "Completed files"),
                            OptionNode::optional("incomplete", OptionKind::Integer, "Incomplete files"),
                        ],
                    ),
                ],
            ),
        ],
        SECRET_PATH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_defaults() {
        let defaults = slskd_schema().defaults();
        assert_eq!(defaults["soulseek"]["listen_port"], json!(50000));
        assert_eq!(defaults["web"]["port"], json!(5001));
        assert_eq!(defaults["web"]["url_base"], json!("/"));
    }

    #[test]
    fn test_secret_path_is_not_declared() {
        let schema = slskd_schema();
        assert!(schema.find(SECRET_PATH).is_none());
        assert!(schema.find("soulseek.username").unwrap().required);
    }
}
