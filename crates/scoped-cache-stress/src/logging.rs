use std::future::Future;
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::pin::Pin;

use anyhow::{Context, Result};
use scoped_cache::config::{Config as CacheConfig, LogFormat, Logging};
use scoped_cache::logging::{init_logging, init_logging_with_writer};
use scoped_cache::metrics;

#[derive(Debug, Default)]
pub struct Config {
    pub tracing: bool,
    pub metrics: bool,
}

#[derive(Default)]
pub struct Guard {
    pub udp_sink: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

pub fn init(config: Config, settings: &CacheConfig) -> Result<Guard> {
    let mut guard = Guard::default();

    if config.tracing {
        // this should mimic the settings used in production:
        let logging = Logging {
            level: "info".into(),
            format: LogFormat::Json,
        };
        // we want all the tracing machinery to be active, but not spam the console,
        // so redirect everything into the void:
        init_logging_with_writer(&logging, || NoopWriter);
    } else {
        init_logging(&settings.logging);
    }

    if config.metrics {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = UdpSocket::bind(addr).context("failed to bind metrics sink")?;
        listener.set_nonblocking(true)?;
        let socket = listener.local_addr()?;

        guard.udp_sink = Some(Box::pin(async move {
            let listener = match tokio::net::UdpSocket::from_std(listener) {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(error = &err as &dyn std::error::Error, "metrics sink failed");
                    return;
                }
            };
            let mut buf = Vec::with_capacity(1024);
            loop {
                buf.clear();
                if listener.recv_buf(&mut buf).await.is_err() {
                    return;
                }
            }
        }));

        let host = format!("127.0.0.1:{}", socket.port());

        // have some default tags, just to be closer to the real world config
        let mut tags = settings.metrics.custom_tags.clone();
        tags.insert("host".into(), "stresstest".into());
        tags.insert("env".into(), "stresstest".into());

        metrics::configure_statsd(&settings.metrics.prefix, host, tags)
            .context("failed to configure metrics")?;
    } else if let Some(statsd) = &settings.metrics.statsd {
        metrics::configure_statsd(
            &settings.metrics.prefix,
            statsd.as_str(),
            settings.metrics.custom_tags.clone(),
        )
        .context("failed to configure metrics")?;
    }

    Ok(guard)
}

struct NoopWriter;
impl Write for NoopWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // try to prevent the compiler from optimizing away all the formatting code:
        let buf = std::hint::black_box(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
