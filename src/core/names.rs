//! Identifier mapping between Rust-side names and table/column names
//!
//! Table descriptors name tables and columns in object style (`UserSSLKey`,
//! `CreatedUnix`). The engine's [`NameMapper`] turns those into database
//! identifiers (`user_ssl_key`, `created_unix`) and back.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Acronyms kept upper-case when mapping table names back to object names
const DEFAULT_INITIALISMS: &[&str] = &[
    "API", "ASCII", "CPU", "CSS", "DNS", "EOF", "GUID", "HTML", "HTTP", "HTTPS", "ID", "IP",
    "JSON", "LHS", "QPS", "RAM", "RHS", "RPC", "SLA", "SMTP", "SSH", "TLS", "TTL", "UI", "UUID",
    "URI", "URL", "UTF8", "VM", "XML", "XSRF", "XSS",
];

/// Acronyms registered by [`global_init`]
const BOOTSTRAP_INITIALISMS: &[&str] = &["SSL", "UID"];

static INITIALISMS: LazyLock<RwLock<BTreeSet<String>>> = LazyLock::new(|| {
    RwLock::new(
        DEFAULT_INITIALISMS
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
});

/// Register acronyms with the process-wide initialism set
///
/// Registration is idempotent.
pub fn register_initialisms<I, S>(names: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = INITIALISMS.write();
    for name in names {
        set.insert(name.as_ref().to_uppercase());
    }
}

/// Check whether an acronym is registered
pub fn is_initialism(name: &str) -> bool {
    INITIALISMS.read().contains(&name.to_uppercase())
}

/// Apply the naming customizations the bootstrapper relies on
///
/// Safe to call any number of times.
pub fn global_init() {
    register_initialisms(BOOTSTRAP_INITIALISMS.iter().copied());
}

/// Maps object-style names to database identifiers and back
pub trait NameMapper: Send + Sync {
    /// `AccessToken` -> `access_token`
    fn obj_to_table(&self, name: &str) -> String;
    /// `access_token` -> `AccessToken`
    fn table_to_obj(&self, name: &str) -> String;
}

/// Underscore before every upper-case letter (`UserID` -> `user_i_d`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeMapper;

impl NameMapper for SnakeMapper {
    fn obj_to_table(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len() + 4);
        for (idx, chr) in name.chars().enumerate() {
            if chr.is_ascii_uppercase() && idx > 0 {
                out.push('_');
            }
            out.push(chr.to_ascii_lowercase());
        }
        out
    }

    fn table_to_obj(&self, name: &str) -> String {
        capitalize_parts(name, |_| false)
    }
}

/// Acronym-aware mapping (`UserSSLKey` <-> `user_ssl_key`)
///
/// Runs of upper-case letters stay together; a run followed by a lower-case
/// letter gives its last letter to the next word.
#[derive(Debug, Clone, Copy, Default)]
pub struct GonicMapper;

impl NameMapper for GonicMapper {
    fn obj_to_table(&self, name: &str) -> String {
        let mut out: Vec<char> = Vec::with_capacity(name.len() + 4);
        for (idx, chr) in name.chars().enumerate() {
            if chr.is_ascii_uppercase() && idx > 0 {
                if let Some(last) = out.last() {
                    if !last.is_ascii_uppercase() {
                        out.push('_');
                    }
                }
            }
            if !chr.is_ascii_uppercase() && idx > 1 {
                let len = out.len();
                if len >= 2 && out[len - 1].is_ascii_uppercase() && out[len - 2].is_ascii_uppercase()
                {
                    let moved = out[len - 1];
                    out[len - 1] = '_';
                    out.push(moved);
                }
            }
            out.push(chr);
        }
        out.into_iter().collect::<String>().to_lowercase()
    }

    fn table_to_obj(&self, name: &str) -> String {
        let set = INITIALISMS.read();
        capitalize_parts(name, |part| set.contains(&part.to_uppercase()))
    }
}

fn capitalize_parts(name: &str, is_initialism: impl Fn(&str) -> bool) -> String {
    let lower = name.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    for part in lower.split('_') {
        if is_initialism(part) {
            out.push_str(&part.to_uppercase());
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gonic_obj_to_table() {
        let mapper = GonicMapper;
        assert_eq!(mapper.obj_to_table("UserSSLKey"), "user_ssl_key");
        assert_eq!(mapper.obj_to_table("AccessToken"), "access_token");
        assert_eq!(mapper.obj_to_table("UserID"), "user_id");
        assert_eq!(mapper.obj_to_table("HTTPServer"), "http_server");
        assert_eq!(mapper.obj_to_table("ID"), "id");
        assert_eq!(mapper.obj_to_table("name"), "name");
    }

    #[test]
    fn test_gonic_table_to_obj_uses_initialisms() {
        global_init();
        let mapper = GonicMapper;
        assert_eq!(mapper.table_to_obj("user_ssl_key"), "UserSSLKey");
        assert_eq!(mapper.table_to_obj("owner_uid"), "OwnerUID");
        assert_eq!(mapper.table_to_obj("user_id"), "UserID");
        assert_eq!(mapper.table_to_obj("access_token"), "AccessToken");
    }

    #[test]
    fn test_global_init_is_idempotent() {
        global_init();
        global_init();
        assert!(is_initialism("ssl"));
        assert!(is_initialism("UID"));
        assert!(!is_initialism("WIDGET"));
    }

    #[test]
    fn test_snake_mapper() {
        let mapper = SnakeMapper;
        assert_eq!(mapper.obj_to_table("UserID"), "user_i_d");
        assert_eq!(mapper.obj_to_table("AccessToken"), "access_token");
        assert_eq!(mapper.table_to_obj("access_token"), "AccessToken");
    }
}
