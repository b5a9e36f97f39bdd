//! SQL Server backend
//!
//! Tiberius clients pooled with bb8. The `server=..; port=..;` key/value string
//! produced by connection-string synthesis is parsed here into a tiberius
//! [`Config`].

use crate::core::{
    database::{Connection, ConnectionPool, PoolLimits, PoolStatus},
    database_types::Driver,
    error::{DatabaseError, Result},
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use std::borrow::Cow;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

const DEFAULT_PORT: u16 = 1433;
const DEFAULT_MAX_OPEN: u32 = 10;

/// Connection settings read from an ADO-style `key=value;` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MssqlSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// `encrypt` key: `disable`, `true`, or unset
    pub encrypt: Option<String>,
}

impl MssqlSettings {
    /// Parse a `server=h; port=p; database=d; user id=u; password=pw;` string
    ///
    /// A `server` value of `host:port` or `host,port` contributes only its
    /// host part; the port comes from the `port` key when present.
    pub fn parse(conn_str: &str) -> Result<Self> {
        let mut settings = Self {
            host: String::new(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            encrypt: None,
        };
        let mut server_port = None;
        let mut explicit_port = false;

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                DatabaseError::ConnectionString(format!("malformed mssql option '{}'", part))
            })?;
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "server" | "data source" | "address" => {
                    let (host, port) = match value.split_once([',', ':']) {
                        Some((host, port)) => (host, Some(port.trim())),
                        None => (value, None),
                    };
                    settings.host = host.to_string();
                    server_port = port.map(str::to_string);
                }
                "port" => {
                    settings.port = parse_port(value)?;
                    explicit_port = true;
                }
                "database" | "initial catalog" => settings.database = value.to_string(),
                "user id" | "uid" | "user" => settings.user = value.to_string(),
                "password" | "pwd" => settings.password = value.to_string(),
                "encrypt" => settings.encrypt = Some(value.to_lowercase()),
                other => debug!(option = other, "Ignoring MSSQL connection option"),
            }
        }

        if let (false, Some(port)) = (explicit_port, server_port) {
            settings.port = parse_port(&port)?;
        }
        if settings.host.is_empty() {
            return Err(DatabaseError::ConnectionString(
                "mssql connection string has no server".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Build the tiberius configuration
    pub fn to_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        if !self.database.is_empty() {
            config.database(&self.database);
        }
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));

        match self.encrypt.as_deref() {
            Some("disable") => config.encryption(EncryptionLevel::NotSupported),
            Some("true") => {
                config.trust_cert();
                config.encryption(EncryptionLevel::Required);
            }
            _ => {
                config.trust_cert();
                config.encryption(EncryptionLevel::Off);
            }
        }

        config
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| DatabaseError::ConnectionString(format!("invalid mssql port '{}'", value)))
}

/// Pooled tiberius client
pub struct MssqlClient {
    client: Client<Compat<TcpStream>>,
    broken: bool,
}

/// bb8 manager opening tiberius clients over TCP
#[derive(Clone)]
pub struct MssqlManager {
    settings: MssqlSettings,
}

#[async_trait]
impl bb8::ManageConnection for MssqlManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.settings.to_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(MssqlClient {
            client,
            broken: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken
    }
}

/// Pooled SQL Server database
///
/// bb8 has no idle-count limit; idle connections are closed after its idle
/// timeout instead.
pub struct MssqlPool {
    pool: Pool<MssqlManager>,
    limits: PoolLimits,
}

impl MssqlPool {
    /// Create a pool without opening any connection
    pub fn open(conn_str: &str, limits: PoolLimits) -> Result<Self> {
        let settings = MssqlSettings::parse(conn_str)?;
        let max_size = if limits.max_open > 0 {
            limits.max_open
        } else {
            DEFAULT_MAX_OPEN
        };

        debug!(
            host = %settings.host,
            port = settings.port,
            max_open = max_size,
            "Created MSSQL pool"
        );

        let pool = Pool::builder()
            .max_size(max_size)
            .max_lifetime(limits.max_lifetime)
            .build_unchecked(MssqlManager { settings });

        Ok(Self { pool, limits })
    }
}

#[async_trait]
impl ConnectionPool for MssqlPool {
    fn driver(&self) -> Driver {
        Driver::Mssql
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.get_owned().await.map_err(|e| match e {
            RunError::User(e) => DatabaseError::from(e),
            RunError::TimedOut => DatabaseError::pool("timed out acquiring connection"),
        })?;
        Ok(Box::new(MssqlConnection { conn }))
    }

    fn status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            size: state.connections as usize,
            available: state.idle_connections as usize,
            waiting: 0,
        }
    }

    fn limits(&self) -> PoolLimits {
        self.limits
    }
}

/// A connection checked out of an [`MssqlPool`]
pub struct MssqlConnection {
    conn: PooledConnection<'static, MssqlManager>,
}

#[async_trait]
impl Connection for MssqlConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let params: Vec<MssqlParam> = params.iter().map(MssqlParam::from).collect();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let result = self.conn.client.execute(sql, &param_refs).await?;
        Ok(result.total())
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let params: Vec<MssqlParam> = params.iter().map(MssqlParam::from).collect();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let rows = self
            .conn
            .client
            .query(sql, &param_refs)
            .await?
            .into_first_result()
            .await?;
        Ok(rows.into_iter().map(row_to_database_row).collect())
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    fn discard(mut self: Box<Self>) {
        // bb8 drops broken connections instead of returning them
        self.conn.broken = true;
    }
}

/// Owned statement parameter
enum MssqlParam {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl From<&DatabaseValue> for MssqlParam {
    fn from(value: &DatabaseValue) -> Self {
        match value {
            DatabaseValue::Null => MssqlParam::Null,
            DatabaseValue::Bool(v) => MssqlParam::Bool(*v),
            DatabaseValue::Int(v) => MssqlParam::Int(*v),
            DatabaseValue::Long(v) => MssqlParam::Long(*v),
            DatabaseValue::Double(v) => MssqlParam::Double(*v),
            DatabaseValue::String(v) => MssqlParam::Text(v.clone()),
            DatabaseValue::Bytes(v) => MssqlParam::Binary(v.clone()),
        }
    }
}

impl ToSql for MssqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            MssqlParam::Null => ColumnData::I32(None),
            MssqlParam::Bool(v) => ColumnData::Bit(Some(*v)),
            MssqlParam::Int(v) => ColumnData::I32(Some(*v)),
            MssqlParam::Long(v) => ColumnData::I64(Some(*v)),
            MssqlParam::Double(v) => ColumnData::F64(Some(*v)),
            MssqlParam::Text(v) => ColumnData::String(Some(Cow::Borrowed(v.as_str()))),
            MssqlParam::Binary(v) => ColumnData::Binary(Some(Cow::Borrowed(v.as_slice()))),
        }
    }
}

fn row_to_database_row(row: Row) -> DatabaseRow {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| {
            let value = match data {
                ColumnData::U8(Some(v)) => DatabaseValue::Int(i32::from(v)),
                ColumnData::I16(Some(v)) => DatabaseValue::Int(i32::from(v)),
                ColumnData::I32(Some(v)) => DatabaseValue::Int(v),
                ColumnData::I64(Some(v)) => DatabaseValue::Long(v),
                ColumnData::F32(Some(v)) => DatabaseValue::Double(f64::from(v)),
                ColumnData::F64(Some(v)) => DatabaseValue::Double(v),
                ColumnData::Bit(Some(v)) => DatabaseValue::Bool(v),
                ColumnData::String(Some(v)) => DatabaseValue::String(v.into_owned()),
                ColumnData::Binary(Some(v)) => DatabaseValue::Bytes(v.into_owned()),
                ColumnData::Guid(Some(v)) => DatabaseValue::String(v.to_string()),
                ColumnData::Numeric(Some(v)) => DatabaseValue::String(v.to_string()),
                _ => DatabaseValue::Null,
            };
            (name, value)
        })
        .collect()
}
