use std::path::Path;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use layer8_tunnel::transcode::{FormFields, TypedValue};
use layer8_tunnel::TunnelClient;

#[derive(Parser)]
#[command(name = "tunnel-cli")]
#[command(about = "Talk to a backend through a layer8 tunnel", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Client identity; a random UUID when omitted.
    #[arg(long)]
    client_uuid: Option<String>,

    /// Auth token sent with the handshake.
    #[arg(short, long, default_value = "")]
    token: String,

    #[arg(long, default_value = "x-tunnel")]
    tunnel_header: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Perform an ECDH handshake and print the server key
    Handshake,
    /// Handshake, then send one request through the tunnel
    Send {
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        #[arg(default_value = "/")]
        path: String,

        /// JSON request body
        #[arg(short, long, conflicts_with = "form")]
        data: Option<String>,

        /// Form field, `name=value` or `name=@file`; repeatable
        #[arg(short = 'F', long)]
        form: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let http = reqwest::Client::new();

    let client_uuid = cli
        .client_uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut tunnel = TunnelClient::new(client_uuid, cli.token.clone()).with_tunnel_header(cli.tunnel_header.clone());

    handshake(&http, &cli.url, &mut tunnel).await?;

    match cli.command {
        Commands::Handshake => {
            println!("client uuid: {}", tunnel.client_uuid());
            println!("session established");
        }
        Commands::Send {
            method,
            path,
            data,
            form,
        } => {
            let envelope = if !form.is_empty() {
                tunnel.seal_form(&method, &parse_fields(&form)?)?
            } else {
                let body: Value = match data {
                    Some(raw) => serde_json::from_str(&raw)?,
                    None => Value::Object(Default::default()),
                };
                tunnel.seal_json(&method, &body)?
            };

            let res = http
                .post(format!("{}{}", cli.url, path))
                .headers(to_header_map(tunnel.tunnel_headers())?)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(envelope)
                .send()
                .await?;

            let status = res.status();
            let bytes = res.bytes().await?;
            match tunnel.open_response(&bytes) {
                Ok(inner) => {
                    println!("{} {}", inner.status, inner.status_text);
                    for (name, value) in &inner.headers {
                        println!("{name}: {value}");
                    }
                    println!();
                    print_body(&inner.body)?;
                }
                Err(e) => {
                    eprintln!("Error: tunnel returned status {status} ({e})");
                    eprintln!("Response: {}", String::from_utf8_lossy(&bytes));
                }
            }
        }
    }

    Ok(())
}

async fn handshake(
    http: &reqwest::Client,
    url: &str,
    tunnel: &mut TunnelClient,
) -> Result<(), Box<dyn std::error::Error>> {
    let res = http
        .get(format!("{url}/"))
        .headers(to_header_map(tunnel.handshake_headers())?)
        .send()
        .await?;

    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        return Err(format!("handshake failed with status {status}: {text}").into());
    }
    tunnel.complete_handshake(text.trim())?;
    Ok(())
}

fn to_header_map(pairs: Vec<(String, String)>) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(&value)?);
    }
    Ok(headers)
}

fn parse_fields(raw: &[String]) -> Result<FormFields, Box<dyn std::error::Error>> {
    let mut fields = FormFields::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("form field '{entry}' is not name=value"))?;

        let value = match value.strip_prefix('@') {
            Some(path) => {
                let path = Path::new(path);
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                TypedValue::file(file_name, "application/octet-stream", std::fs::read(path)?)
            }
            None => TypedValue::string(value),
        };
        fields.entry(name.to_string()).or_default().push(value);
    }
    Ok(fields)
}

fn print_body(body: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", String::from_utf8_lossy(body)),
    }
    Ok(())
}
