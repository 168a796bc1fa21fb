//! Application probe: WordPress introspection through wp-cli.
//!
//! `wp core version` reads files only, so it failing means the application
//! cannot be introspected at all. The remaining queries need the database
//! and degrade to empty fields when it is down.

use serde::{Deserialize, Serialize};
use tracing::debug;

use wpfleet_core::ProbeKind;
use wpfleet_remote::{Connection, TransportError, quote};

use crate::error::ProbeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationReport {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_url: Option<String>,
    pub database_reachable: bool,
    pub cache_enabled: bool,
    pub debug_mode: bool,
    pub plugin_count: usize,
    pub plugins: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PluginEntry {
    name: String,
}

/// `docker exec '<container>' wp --allow-root <args>`.
pub fn wp_command(container: &str, args: &str) -> String {
    format!("docker exec {} wp --allow-root {args}", quote(container))
}

pub async fn probe_application(
    conn: &dyn Connection,
    container: &str,
) -> Result<ApplicationReport, ProbeError> {
    let wp = |args: &str| wp_command(container, args);

    let version = conn
        .execute(&wp("core version"))
        .await
        .map_err(|e| ProbeError::new(ProbeKind::Application, format!("wp-cli unavailable: {e}")))?
        .stdout_trimmed()
        .to_string();

    // Only a non-zero exit says anything about the database.
    let database_reachable = match conn.execute(&wp("db check --quiet")).await {
        Ok(_) => true,
        Err(TransportError::CommandFailed { .. }) => false,
        Err(e) => {
            return Err(ProbeError::new(
                ProbeKind::Application,
                format!("db check not evaluated: {e}"),
            ));
        }
    };
    let site_url = optional(conn, &wp("option get siteurl")).await;
    let home_url = optional(conn, &wp("option get home")).await;
    let cache_enabled = optional(conn, &wp("config get WP_CACHE"))
        .await
        .is_some_and(|v| truthy(&v));
    let debug_mode = optional(conn, &wp("config get WP_DEBUG"))
        .await
        .is_some_and(|v| truthy(&v));
    let plugins = match optional(conn, &wp("plugin list --status=active --format=json")).await {
        Some(json) => match serde_json::from_str::<Vec<PluginEntry>>(&json) {
            Ok(entries) => entries.into_iter().map(|p| p.name).collect(),
            Err(e) => {
                debug!(host = %conn.host(), error = %e, "plugin list is not json, ignoring");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    debug!(host = %conn.host(), %container, %version, database_reachable, "application probe");
    Ok(ApplicationReport {
        version,
        site_url,
        home_url,
        database_reachable,
        cache_enabled,
        debug_mode,
        plugin_count: plugins.len(),
        plugins,
    })
}

async fn optional(conn: &dyn Connection, command: &str) -> Option<String> {
    conn.execute(command)
        .await
        .ok()
        .map(|out| out.stdout_trimmed().to_string())
        .filter(|s| !s.is_empty())
}

/// wp-cli prints PHP constants as `1`, `true`, or an empty string.
fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use wpfleet_core::HostTarget;
    use wpfleet_remote::memory::{MemoryHost, Response};
    use wpfleet_remote::{BoxFuture, CommandOutput};

    use crate::verdict::{HealthStatus, reduce};

    use super::*;

    fn healthy_site() -> MemoryHost {
        let host = MemoryHost::new("wp01");
        host.on(&wp_command("wordpress", "core version"), Response::ok("6.4.3\n"));
        host.on(&wp_command("wordpress", "db check"), Response::ok("Success: Database checked.\n"));
        host.on(&wp_command("wordpress", "option get siteurl"), Response::ok("https://wp01.example.com\n"));
        host.on(&wp_command("wordpress", "option get home"), Response::ok("https://wp01.example.com\n"));
        host.on(&wp_command("wordpress", "config get WP_CACHE"), Response::ok("1\n"));
        host.on(&wp_command("wordpress", "config get WP_DEBUG"), Response::ok("\n"));
        host.on(
            &wp_command("wordpress", "plugin list"),
            Response::ok(r#"[{"name":"akismet","status":"active"},{"name":"redis-cache","status":"active"}]"#),
        );
        host
    }

    #[tokio::test]
    async fn healthy_site_reports_everything() {
        let host = healthy_site();
        let report = probe_application(&host, "wordpress").await.unwrap();
        assert_eq!(report.version, "6.4.3");
        assert!(report.database_reachable);
        assert_eq!(report.site_url.as_deref(), Some("https://wp01.example.com"));
        assert!(report.cache_enabled);
        assert!(!report.debug_mode);
        assert_eq!(report.plugin_count, 2);
        assert_eq!(report.plugins, vec!["akismet", "redis-cache"]);
    }

    #[tokio::test]
    async fn database_down_is_reported_not_raised() {
        let host = healthy_site();
        host.on(
            &wp_command("wordpress", "db check"),
            Response::fail(1, "Error establishing a database connection"),
        );
        host.on(&wp_command("wordpress", "option get"), Response::fail(1, "db down"));
        host.on(&wp_command("wordpress", "plugin list"), Response::fail(1, "db down"));

        let report = probe_application(&host, "wordpress").await.unwrap();
        assert!(!report.database_reachable);
        assert_eq!(report.site_url, None);
        assert_eq!(report.plugin_count, 0);
    }

    /// Answers `db check` with a timeout and everything else from `inner`.
    struct StalledDbCheck(MemoryHost);

    impl Connection for StalledDbCheck {
        fn host(&self) -> &str {
            self.0.host()
        }

        fn execute<'a>(
            &'a self,
            command: &'a str,
        ) -> BoxFuture<'a, Result<CommandOutput, TransportError>> {
            if command.contains("db check") {
                Box::pin(async { Err(TransportError::Timeout(Duration::from_secs(5))) })
            } else {
                self.0.execute(command)
            }
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            self.0.close()
        }
    }

    #[tokio::test]
    async fn db_check_timeout_is_not_evaluable() {
        let conn = StalledDbCheck(healthy_site());
        let err = probe_application(&conn, "wordpress").await.unwrap_err();
        assert_eq!(err.kind, ProbeKind::Application);
        assert!(err.cause.contains("timed out"));

        let per_probe = BTreeMap::from([(ProbeKind::Application, Err(err))]);
        let verdict = reduce(HostTarget::new("wp01"), per_probe);
        assert_eq!(verdict.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn malformed_plugin_list_counts_no_plugins() {
        let host = healthy_site();
        host.on(&wp_command("wordpress", "plugin list"), Response::ok("Warning: something\n"));
        let report = probe_application(&host, "wordpress").await.unwrap();
        assert!(report.database_reachable);
        assert_eq!(report.plugin_count, 0);
    }

    #[tokio::test]
    async fn missing_wp_cli_is_an_error() {
        let host = MemoryHost::new("wp01");
        host.on("docker exec", Response::fail(127, "wp: executable file not found"));
        let err = probe_application(&host, "wordpress").await.unwrap_err();
        assert_eq!(err.kind, ProbeKind::Application);
    }

    #[test]
    fn container_name_is_quoted() {
        assert_eq!(
            wp_command("my site", "core version"),
            "docker exec 'my site' wp --allow-root core version"
        );
    }
}
