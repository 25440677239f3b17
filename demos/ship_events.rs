//! logship end-to-end example
//!
//! Runs a tiny collector on localhost that checks the `mac` of every upload,
//! then queues a few events and waits for them to land in `Sent`.

use logship::config::ShipperConfig;
use logship::queue::{EventShipper, Stage};
use logship::upload::signing;
use logship::types::{Event, LogLevel};
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};

const KEY: &str = "demo secret";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting logship example");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Err(e) = collect(stream).await {
                    eprintln!("Collector error: {}", e);
                }
            });
        }
    });

    let base = tempfile::tempdir()?;
    let mut config = ShipperConfig::default();
    config.storage.base_directory = base.path().to_path_buf();
    config.endpoint.url = format!("http://{}/log.cgi", addr);
    config.endpoint.signing_key = Some(KEY.to_string());
    config.logging.min_level = LogLevel::Info;

    let shipper = EventShipper::builder(config).start().await?;
    let logger = shipper.logger().with_target("checkout");

    logger.info("Application started")?;

    let mut fields = HashMap::new();
    fields.insert("order_id".to_string(), "A-1001".to_string());
    logger.log_with_fields(LogLevel::Warning, "Payment retried", fields)?;

    let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "provider did not answer");
    logger.log_error(LogLevel::Error, "Payment failed", &err)?;

    // Simulate some activity
    for _ in 0..20 {
        let sent = shipper.layout().list(Stage::Sent)?;
        if sent.len() == 3 {
            for path in sent {
                let event: Event = serde_json::from_slice(&std::fs::read(&path)?)?;
                println!("Delivered {}", event.to_human_readable());
            }
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    shipper.shutdown().await;
    println!("Shipper stopped");
    Ok(())
}

/// Accept one PUT, verify its mac and answer 200 or 403
async fn collect(stream: TcpStream) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await?;

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let url = reqwest::Url::parse(&format!("http://collector{}", target))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mac = url
        .query_pairs()
        .find(|(name, _)| name == "mac")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();

    let status = if signing::verify(&body, &mac, KEY.as_bytes()) {
        println!("Collector accepted {} bytes", body.len());
        "200 OK"
    } else {
        println!("Collector rejected an unsigned or tampered upload");
        "403 Forbidden"
    };

    let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
    reader.into_inner().write_all(response.as_bytes()).await
}
