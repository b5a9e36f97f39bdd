//! MySQL backend
//!
//! Reads the `user:pass@tcp(host)/db?params` DSN produced by connection-string
//! synthesis and maps it onto a mysql_async pool.

use crate::core::{
    database::{Connection, ConnectionPool, PoolLimits, PoolStatus},
    database_types::Driver,
    error::{DatabaseError, Result},
    host_port::split_host_port,
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{
    Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row, SslOpts, Value,
};
use tracing::{debug, warn};

const DEFAULT_ADDR: &str = "127.0.0.1:3306";
const DEFAULT_PORT: u16 = 3306;
const DEFAULT_MAX_OPEN: usize = 100;

/// Character set id marking binary column data
const BINARY_CHARSET: u16 = 63;

/// Parts of a `[user[:password]@][net[(addr)]]/dbname[?params]` DSN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlDsn {
    pub user: String,
    pub password: String,
    pub net: String,
    pub addr: String,
    pub db_name: String,
    pub params: Vec<(String, String)>,
}

impl MysqlDsn {
    /// Parse a DSN
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::ConnectionString`] when the slash before the
    /// database name is missing or the address is not closed by `)`.
    pub fn parse(dsn: &str) -> Result<Self> {
        let slash = dsn.rfind('/').ok_or_else(|| {
            DatabaseError::ConnectionString(
                "missing the slash separating the database name".to_string(),
            )
        })?;
        let (prefix, rest) = (&dsn[..slash], &dsn[slash + 1..]);

        let (credentials, endpoint) = match prefix.rfind('@') {
            Some(at) => (&prefix[..at], &prefix[at + 1..]),
            None => ("", prefix),
        };
        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));

        let (net, addr) = match endpoint.find('(') {
            Some(open) => {
                let addr = endpoint[open + 1..].strip_suffix(')').ok_or_else(|| {
                    DatabaseError::ConnectionString("invalid DSN: network address not terminated".to_string())
                })?;
                (&endpoint[..open], addr)
            }
            None => (endpoint, ""),
        };

        let (db_name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (k.to_string(), v.to_string())
            })
            .collect();

        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            net: if net.is_empty() { "tcp" } else { net }.to_string(),
            addr: if addr.is_empty() && net != "unix" {
                DEFAULT_ADDR
            } else {
                addr
            }
            .to_string(),
            db_name: db_name.to_string(),
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Map the DSN onto mysql_async options
    pub fn to_opts(&self) -> Result<OptsBuilder> {
        let mut builder = OptsBuilder::default()
            .user(Some(self.user.clone()))
            .pass((!self.password.is_empty()).then(|| self.password.clone()))
            .db_name((!self.db_name.is_empty()).then(|| self.db_name.clone()));

        builder = match self.net.as_str() {
            "unix" => builder.socket(Some(self.addr.clone())),
            "tcp" => {
                let (host, port) = split_host_port(&self.addr);
                let port = match port {
                    Some(p) => p.parse::<u16>().map_err(|_| {
                        DatabaseError::ConnectionString(format!("invalid port in {}", self.addr))
                    })?,
                    None => DEFAULT_PORT,
                };
                builder.ip_or_hostname(host).tcp_port(port)
            }
            other => {
                return Err(DatabaseError::ConnectionString(format!(
                    "unsupported network type: {}",
                    other
                )))
            }
        };

        for (key, value) in &self.params {
            match key.as_str() {
                "charset" => builder = builder.init(vec![format!("SET NAMES {}", value)]),
                "tls" => {
                    builder = match value.as_str() {
                        "false" | "" => builder.ssl_opts(None::<SslOpts>),
                        "skip-verify" | "preferred" => builder.ssl_opts(Some(
                            SslOpts::default().with_danger_accept_invalid_certs(true),
                        )),
                        _ => builder.ssl_opts(Some(SslOpts::default())),
                    }
                }
                "parseTime" => {}
                other => debug!(param = other, "Ignoring MySQL DSN parameter"),
            }
        }

        Ok(builder)
    }
}

/// Pooled MySQL database
pub struct MysqlPool {
    pool: Pool,
    limits: PoolLimits,
}

impl MysqlPool {
    /// Create a pool from a DSN
    ///
    /// Idle connections above the idle limit are closed by the pool's own
    /// recycler. Must be called inside a tokio runtime.
    pub fn open(dsn: &str, limits: PoolLimits) -> Result<Self> {
        let dsn = MysqlDsn::parse(dsn)?;

        let max = if limits.max_open > 0 {
            limits.max_open as usize
        } else {
            DEFAULT_MAX_OPEN
        };
        let min = (limits.effective_max_idle() as usize).min(max);
        let constraints = PoolConstraints::new(min, max)
            .ok_or_else(|| DatabaseError::pool(format!("invalid pool bounds {}..{}", min, max)))?;
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            .with_abs_conn_ttl(limits.max_lifetime);

        let opts: Opts = dsn.to_opts()?.pool_opts(pool_opts).into();
        debug!(max_open = max, max_idle = min, "Created MySQL pool");

        Ok(Self {
            pool: Pool::new(opts),
            limits,
        })
    }
}

#[async_trait]
impl ConnectionPool for MysqlPool {
    fn driver(&self) -> Driver {
        Driver::Mysql
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.get_conn().await?;
        Ok(Box::new(MysqlConnection { conn: Some(conn) }))
    }

    fn status(&self) -> PoolStatus {
        // mysql_async does not expose pool occupancy
        PoolStatus::default()
    }

    fn limits(&self) -> PoolLimits {
        self.limits
    }
}

/// A connection checked out of a [`MysqlPool`]
pub struct MysqlConnection {
    conn: Option<Conn>,
}

impl MysqlConnection {
    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| DatabaseError::pool("connection already released"))
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let conn = self.conn()?;
        if params.is_empty() {
            conn.query_drop(sql).await?;
        } else {
            conn.exec_drop(sql, to_params(params)).await?;
        }
        Ok(conn.affected_rows())
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let conn = self.conn()?;
        let rows: Vec<Row> = if params.is_empty() {
            conn.query(sql).await?
        } else {
            conn.exec(sql, to_params(params)).await?
        };
        Ok(rows.iter().map(row_to_database_row).collect())
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        Ok(self.conn()?.query_drop(sql).await?)
    }

    fn discard(mut self: Box<Self>) {
        if let Some(conn) = self.conn.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = conn.disconnect().await {
                            warn!(error = %e, "Failed to close MySQL connection");
                        }
                    });
                }
                Err(_) => drop(conn),
            }
        }
    }
}

fn to_params(params: &[DatabaseValue]) -> Params {
    Params::Positional(params.iter().map(value_to_param).collect())
}

fn value_to_param(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::NULL,
        DatabaseValue::Bool(v) => Value::Int(i64::from(*v)),
        DatabaseValue::Int(v) => Value::Int(i64::from(*v)),
        DatabaseValue::Long(v) => Value::Int(*v),
        DatabaseValue::Double(v) => Value::Double(*v),
        DatabaseValue::String(v) => Value::Bytes(v.clone().into_bytes()),
        DatabaseValue::Bytes(v) => Value::Bytes(v.clone()),
    }
}

fn row_to_database_row(row: &Row) -> DatabaseRow {
    let mut db_row = DatabaseRow::new();

    for (idx, column) in row.columns_ref().iter().enumerate() {
        let value = match row.as_ref(idx) {
            None | Some(Value::NULL) => DatabaseValue::Null,
            Some(Value::Int(v)) => DatabaseValue::Long(*v),
            Some(Value::UInt(v)) => DatabaseValue::Long(*v as i64),
            Some(Value::Float(v)) => DatabaseValue::Double(f64::from(*v)),
            Some(Value::Double(v)) => DatabaseValue::Double(*v),
            Some(Value::Bytes(v)) if column.character_set() == BINARY_CHARSET => {
                DatabaseValue::Bytes(v.clone())
            }
            Some(Value::Bytes(v)) => DatabaseValue::String(String::from_utf8_lossy(v).into_owned()),
            Some(Value::Date(y, mo, d, h, mi, s, us)) => DatabaseValue::String(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                y, mo, d, h, mi, s, us
            )),
            Some(Value::Time(neg, days, h, mi, s, us)) => DatabaseValue::String(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                if *neg { "-" } else { "" },
                u32::from(*h) + *days * 24,
                mi,
                s,
                us
            )),
        };
        db_row.insert(column.name_str().into_owned(), value);
    }

    db_row
}
