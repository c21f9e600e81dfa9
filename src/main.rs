mod settings;

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use httptunnel::{dial, Config};
use settings::Settings;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser, Debug)]
#[clap(version = env!("HTTPTUNNEL_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    /// Tunnel proxy, e.g. http://127.0.0.1:8080
    #[clap(long, short = 'p')]
    proxy: Option<Url>,

    /// listen on this network address
    #[clap(long, short = 'b')]
    bind: Option<String>,

    /// host:port reached through the tunnel
    #[clap(long, short = 'd')]
    dest: Option<String>,

    /// Buffer writes into larger requests
    #[clap(long)]
    buffer: bool,

    #[clap(long)]
    flush_timeout_ms: Option<u64>,

    #[clap(long)]
    idle_timeout_ms: Option<u64>,

    /// Configuration file (defaults to the per-user config location)
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,
}

impl Opts {
    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(proxy) = self.proxy {
            settings.proxy_url = proxy.to_string();
        }
        if let Some(bind) = self.bind {
            settings.bind = bind;
        }
        if self.dest.is_some() {
            settings.dest = self.dest;
        }
        if self.buffer {
            settings.buffer_requests = true;
        }
        if let Some(ms) = self.flush_timeout_ms {
            settings.flush_timeout_ms = ms;
        }
        if let Some(ms) = self.idle_timeout_ms {
            settings.idle_timeout_ms = ms;
        }
        settings
    }
}

async fn forward(socket: TcpStream, dest: &str, config: Config) -> Result<(u64, u64), BoxError> {
    let conn = dial(dest, config).await?;
    let (mut client_read, mut client_write) = socket.into_split();

    let upstream = async {
        let mut buf = vec![0u8; 32 * 1024];
        let mut total = 0u64;
        loop {
            let n = client_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                written += conn.write(&buf[written..n]).await?;
            }
            total += n as u64;
        }
        conn.flush().await?;
        Ok::<_, BoxError>(total)
    };

    let downstream = async {
        let mut buf = vec![0u8; 32 * 1024];
        let mut total = 0u64;
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            client_write.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        client_write.shutdown().await?;
        Ok::<_, BoxError>(total)
    };

    let res = futures::future::try_join(upstream, downstream).await;
    conn.close().await?;
    res
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    let settings = Settings::load(opts.config.as_deref())?;
    let settings = opts.apply(settings);

    let dest = settings
        .dest
        .clone()
        .ok_or("no destination configured, use --dest host:port")?;
    let config = settings.tunnel_config()?;

    match rlimit::increase_nofile_limit(u64::MAX) {
        Ok(limit) => info!("File descriptor limit set to {}", limit),
        Err(e) => warn!("Unable to raise file descriptor limit: {}", e),
    }

    let listener = TcpListener::bind(&settings.bind).await?;
    info!(
        "Listening on {}, tunneling to {} via {}",
        settings.bind, dest, settings.proxy_url
    );

    loop {
        let (socket, peer) = listener.accept().await?;
        let config = config.clone();
        let dest = dest.clone();
        tokio::spawn(async move {
            match forward(socket, &dest, config).await {
                Ok((to, from)) => info!("{} -> {}: to={} from={}", peer, dest, to, from),
                Err(e) => error!("{} -> {} failed: {}", peer, dest, e),
            }
        });
    }
}
