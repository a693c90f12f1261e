use std::future::Future;
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::pin::Pin;

use cadence::{StatsdClient, UdpMetricSink};
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;

#[derive(Debug, Default)]
pub struct Config {
    pub tracing: bool,
    pub metrics: bool,
}

#[derive(Default)]
pub struct Guard {
    pub statsd: Option<StatsdClient>,
    pub udp_sink: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

pub fn init(config: Config) -> Guard {
    let mut guard = Guard::default();

    if config.tracing {
        let rust_log = "INFO";
        let subscriber = fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_env_filter(rust_log);

        // we want all the tracing machinery to be active, but not spam the console,
        // so redirect everything into the void:
        let subscriber = subscriber.with_writer(|| NoopWriter);

        // this should mimic the settings used in production:
        subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    if config.metrics {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = UdpSocket::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        guard.udp_sink = Some(Box::pin(async move {
            let listener = tokio::net::UdpSocket::from_std(listener).unwrap();
            let mut buf = Vec::with_capacity(1024);
            loop {
                buf.clear();
                let _len = listener.recv_buf(&mut buf).await.unwrap();
            }
        }));

        tracing::info!("Reporting metrics to statsd at {socket}");

        let sender = UdpSocket::bind("0.0.0.0:0").unwrap();
        sender.set_nonblocking(true).unwrap();
        let sink = UdpMetricSink::from(socket, sender).unwrap();
        guard.statsd = Some(StatsdClient::from_sink("kakku", sink));
    }

    guard
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
