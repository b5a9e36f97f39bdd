//! Property-based tests for connection-string synthesis using proptest

use percent_encoding::percent_decode_str;
use proptest::prelude::*;
use rust_db_bootstrap::core::config::parse_duration;
use rust_db_bootstrap::core::connection_string::{self, path_escape, query_param, sanitize};
use rust_db_bootstrap::core::host_port::{
    parse_mssql_host_port, parse_postgres_host_port, split_host_port,
};
use rust_db_bootstrap::prelude::*;
use rust_db_bootstrap::DriverSupport;
use std::time::Duration;

fn hostname() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9.-]{0,20}"
}

// ============================================================================
// Host/port splitting
// ============================================================================

proptest! {
    #[test]
    fn test_postgres_host_port_splits_last_colon(host in hostname(), port in 1u16..) {
        let (h, p) = parse_postgres_host_port(&format!("{}:{}", host, port));
        prop_assert_eq!(h, host);
        prop_assert_eq!(p, port.to_string());
    }

    #[test]
    fn test_postgres_bare_host_gets_default_port(host in hostname()) {
        let (h, p) = parse_postgres_host_port(&host);
        prop_assert_eq!(h, host);
        prop_assert_eq!(p, "5432");
    }

    /// A non-empty mssql host is never rewritten
    #[test]
    fn test_mssql_host_kept_verbatim(host in hostname(), port in 1u16.., comma in any::<bool>()) {
        let sep = if comma { "," } else { ":" };
        let info = format!("{}{}{}", host, sep, port);
        let (h, p) = parse_mssql_host_port(&info);
        prop_assert_eq!(h, info);
        prop_assert_eq!(p, port.to_string());
    }

    #[test]
    fn test_split_host_port(host in hostname(), port in 1u16..) {
        let addr = format!("{}:{}", host, port);
        let port_str = port.to_string();
        prop_assert_eq!(split_host_port(&addr), (host.as_str(), Some(port_str.as_str())));

        let v6 = format!("[::{}]:{}", port, port);
        let (h, p) = split_host_port(&v6);
        prop_assert_eq!(h, format!("::{}", port));
        prop_assert_eq!(p, Some(port_str.as_str()));
    }
}

// ============================================================================
// Connection strings
// ============================================================================

proptest! {
    /// Escaped credentials decode back to the original text
    #[test]
    fn test_path_escape_reversible(value in "\\PC{0,24}") {
        let escaped = path_escape(&value);
        prop_assert!(!escaped.contains('/'));
        prop_assert!(!escaped.contains('?'));
        prop_assert!(!escaped.contains('#'));
        let decoded = percent_decode_str(&escaped).decode_utf8().unwrap();
        prop_assert_eq!(decoded, value);
    }

    /// The query separator is chosen so that exactly one `?` appears
    #[test]
    fn test_single_query_separator(
        name in "[a-z]{1,12}",
        extra in proptest::option::of("[a-z]{1,8}=[a-z0-9]{1,8}"),
        driver in prop_oneof![Just(Driver::Mysql), Just(Driver::Postgres)],
    ) {
        let name = match extra {
            Some(param) => format!("{}?{}", name, param),
            None => name,
        };
        let config = Config::new(driver).with_host("db:1234").with_name(name);
        let conn = connection_string::build(&config, &DriverSupport::none()).unwrap();
        prop_assert_eq!(conn.matches('?').count(), 1);
    }

    /// A leading `/` selects the unix socket transport, anything else tcp
    #[test]
    fn test_mysql_transport_follows_host(
        host in prop_oneof![
            "/[a-z0-9/._-]{1,30}",
            "[a-z0-9][a-z0-9.-]{0,20}(:[0-9]{1,5})?",
        ],
        ssl_mode in prop_oneof![
            Just("disable".to_string()),
            Just("true".to_string()),
            Just("skip-verify".to_string()),
            Just("preferred".to_string()),
        ],
    ) {
        let config = Config::new(Driver::Mysql)
            .with_credentials("root", "pw")
            .with_host(host.clone())
            .with_name("app")
            .with_ssl_mode(ssl_mode.clone());
        let conn = connection_string::build(&config, &DriverSupport::none()).unwrap();

        let transport = if host.starts_with('/') { "unix" } else { "tcp" };
        let expected_prefix = format!("root:pw@{}({})/app?", transport, host);
        prop_assert!(conn.starts_with(&expected_prefix));

        let tls = if ssl_mode == "disable" { "false" } else { ssl_mode.as_str() };
        let expected_suffix = format!("&tls={}", tls);
        prop_assert!(conn.ends_with(&expected_suffix));
        prop_assert!(!conn.contains("tls=disable"));
    }

    #[test]
    fn test_sanitize_hides_postgres_password(
        user in "[a-z]{1,12}",
        password in "[A-Z]{4,16}",
        host in hostname(),
    ) {
        let conn = connection_string::postgres(&host, &user, &password, "app", "?", "disable");
        let masked = sanitize(&conn);
        prop_assert!(!masked.contains(&password));
        prop_assert!(masked.contains(&user));
        prop_assert!(masked.contains("***"));
    }

    #[test]
    fn test_sanitize_hides_mssql_password(password in "[A-Z]{4,16}") {
        let config = Config::new(Driver::Mssql).with_credentials("sa", password.clone());
        let conn = connection_string::build(&config, &DriverSupport::none()).unwrap();
        prop_assert!(!sanitize(&conn).contains(&password));
    }

    #[test]
    fn test_sqlite_busy_timeout_param(timeout in 0u64..1_000_000) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Driver::Sqlite3)
            .with_path(dir.path().join("app.db"))
            .with_timeout(timeout);
        let support = DriverSupport::none().with(Driver::Sqlite3, true);
        let conn = connection_string::build(&config, &support).unwrap();
        let timeout_str = timeout.to_string();
        prop_assert_eq!(query_param(&conn, "_busy_timeout"), Some(timeout_str.as_str()));
        prop_assert_eq!(query_param(&conn, "_txlock"), Some("immediate"));
    }
}

// ============================================================================
// Durations
// ============================================================================

proptest! {
    #[test]
    fn test_duration_units(h in 0u64..48, m in 0u64..60, s in 0u64..60) {
        let text = format!("{}h{}m{}s", h, m, s);
        prop_assert_eq!(
            parse_duration(&text),
            Some(Duration::from_secs(h * 3600 + m * 60 + s))
        );
    }

    #[test]
    fn test_bare_seconds(secs in any::<u32>()) {
        prop_assert_eq!(parse_duration(&secs.to_string()), Some(Duration::from_secs(secs as u64)));
    }
}
