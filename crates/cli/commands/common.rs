use std::env;

use rustls::ClientConfig as RustlsClientConfig;
use tokio_postgres::{config::SslMode, Config};
use tokio_postgres::{Client, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;

use minerva::error::{ConfigurationError, Error, RuntimeError};

pub type CmdResult = Result<(), Error>;

static ENV_DB_CONN: &str = "MINERVA_DB_CONN";

/// Defines the interface for CLI commands
pub trait Cmd {
    fn run(&self) -> CmdResult;
}

/// Run `future` to completion on a fresh multi-threaded runtime.
pub fn block_on<F: std::future::Future<Output = CmdResult>>(future: F) -> CmdResult {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| RuntimeError::from_msg(format!("Could not start async runtime: {e}")))?
        .block_on(future)
}

pub fn show_db_config(config: &Config) -> String {
    let host = match config.get_hosts().first() {
        Some(tokio_postgres::config::Host::Tcp(tcp_host)) => tcp_host.clone(),
        Some(tokio_postgres::config::Host::Unix(socket_path)) => {
            socket_path.to_string_lossy().to_string()
        }
        None => String::new(),
    };

    let port = config.get_ports().first().copied().unwrap_or(5432);

    let dbname = config.get_dbname().unwrap_or("");

    let sslmode = match config.get_ssl_mode() {
        SslMode::Prefer => "prefer".to_string(),
        SslMode::Disable => "disable".to_string(),
        SslMode::Require => "require".to_string(),
        _ => "<UNSUPPORTED MODE>".to_string(),
    };

    let user_at_host = match config.get_user() {
        Some(user) => {
            format!("{user}@{host}")
        }
        None => host.to_string(),
    };

    format!("postgresql://{user_at_host}:{port}/{dbname}?sslmode={sslmode}")
}

fn parse_sslmode(value: &str) -> Result<SslMode, Error> {
    match value.to_lowercase().as_str() {
        "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        _ => Err(Error::Configuration(ConfigurationError {
            msg: format!("Unsupported SSL mode '{value}'"),
        })),
    }
}

pub fn get_db_config() -> Result<Config, Error> {
    let config = match env::var(ENV_DB_CONN) {
        Ok(value) => value.parse::<Config>().map_err(|e| {
            ConfigurationError::from_msg(format!("Invalid value for {ENV_DB_CONN}: {e}"))
        })?,
        Err(_) => {
            // No single environment variable set, let's check for psql settings
            let env_port = env::var("PGPORT").unwrap_or("5432".into());
            let port: u16 = env_port.parse().map_err(|e| {
                ConfigurationError::from_msg(format!("Invalid PGPORT value '{env_port}': {e}"))
            })?;

            let sslmode = parse_sslmode(&env::var("PGSSLMODE").unwrap_or("prefer".into()))?;

            let default_user_name = env::var("USER").unwrap_or("postgres".into());

            let mut config = Config::new();

            config
                .host(env::var("PGHOST").unwrap_or("/var/run/postgresql".into()))
                .port(port)
                .user(env::var("PGUSER").unwrap_or(default_user_name))
                .dbname(env::var("PGDATABASE").unwrap_or("postgres".into()))
                .ssl_mode(sslmode);

            if let Ok(password) = env::var("PGPASSWORD") {
                config.password(password);
            }

            config
        }
    };

    Ok(config)
}

pub async fn connect_db() -> Result<Client, Error> {
    connect_to_db(&get_db_config()?).await
}

pub async fn connect_to_db(config: &Config) -> Result<Client, Error> {
    log::debug!("Connecting to {}", show_db_config(config));

    let client = if config.get_ssl_mode() == SslMode::Disable {
        let (client, connection) = config.connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {e}");
            }
        });

        client
    } else {
        let mut roots = rustls::RootCertStore::empty();

        let native_certs = rustls_native_certs::load_native_certs();

        for e in &native_certs.errors {
            log::warn!("Could not load platform certificate: {e}");
        }

        for cert in native_certs.certs {
            roots.add(cert).map_err(|e| {
                Error::Runtime(RuntimeError::from_msg(format!(
                    "Could not add certificate to certificate store: {e}"
                )))
            })?;
        }

        let tls_config = RustlsClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let tls = MakeRustlsConnect::new(tls_config);

        let (client, connection) = config.connect(tls).await.map_err(|e| {
            ConfigurationError::from_msg(format!(
                "Could not setup TLS database connection to {}: {}",
                show_db_config(config),
                e
            ))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {e}");
            }
        });

        client
    };

    Ok(client)
}
