//! Host/port splitting for the postgres and mssql host grammars

/// Default postgres host
pub const POSTGRES_DEFAULT_HOST: &str = "127.0.0.1";
/// Default postgres port
pub const POSTGRES_DEFAULT_PORT: &str = "5432";
/// Default mssql host
pub const MSSQL_DEFAULT_HOST: &str = "127.0.0.1";
/// Default mssql port
pub const MSSQL_DEFAULT_PORT: &str = "1433";

/// Split a postgres host string into `(host, port)`
///
/// Accepts the forms described in the libpq connection-string documentation:
/// `host:port` splits at the last colon, a value ending in `]` (bare IPv6
/// literal) is taken whole as the host, and an empty value yields
/// `127.0.0.1:5432`.
pub fn parse_postgres_host_port(info: &str) -> (String, String) {
    if info.contains(':') && !info.ends_with(']') {
        // contains(':') guarantees rfind succeeds
        let idx = info.rfind(':').unwrap_or(info.len());
        return (info[..idx].to_string(), info[idx + 1..].to_string());
    }
    if info.is_empty() {
        return (
            POSTGRES_DEFAULT_HOST.to_string(),
            POSTGRES_DEFAULT_PORT.to_string(),
        );
    }
    (info.to_string(), POSTGRES_DEFAULT_PORT.to_string())
}

/// Split an mssql host string into `(host, port)`
///
/// The split on `,` (preferred) or `:` only serves to extract the port: a
/// non-empty input is always returned verbatim as the host, separator and
/// port included. An empty input yields `127.0.0.1:1433`.
pub fn parse_mssql_host_port(info: &str) -> (String, String) {
    let mut port = MSSQL_DEFAULT_PORT.to_string();

    if info.contains(',') {
        if let Some(p) = info.split(',').nth(1) {
            port = p.trim().to_string();
        }
    } else if info.contains(':') {
        if let Some(p) = info.split(':').nth(1) {
            port = p.to_string();
        }
    }

    if info.is_empty() {
        return (MSSQL_DEFAULT_HOST.to_string(), port);
    }
    (info.to_string(), port)
}

/// Split a network address into host and optional port
///
/// Bracketed IPv6 literals (`[::1]:3306`) keep their brackets off the host.
pub fn split_host_port(addr: &str) -> (&str, Option<&str>) {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => (addr, None),
        };
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host, Some(port)),
        _ => (addr, None),
    }
}
