//! Fetch command: one request through the interception layer

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use colored::Colorize;
use serde_json::json;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::{Error, Result};
use crate::interceptor::{Intercepted, Source};
use crate::network::{NetResponse, OutboundRequest};
use crate::queue::LogNotifier;

/// Parse a curl-style `Name: value` header
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| Error::Other(format!("Header must look like 'Name: value': {}", raw)))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Other(format!("Header name is empty: {}", raw)));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn build_request(
    url: &str,
    method: &str,
    body: Option<String>,
    headers: &[String],
) -> Result<OutboundRequest> {
    let mut request = OutboundRequest::new(method, url);
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(&name, &value);
    }
    if let Some(body) = body {
        request = request.with_body(body);
    }
    Ok(request)
}

fn body_json(response: &NetResponse) -> serde_json::Value {
    match std::str::from_utf8(&response.body) {
        Ok(text) => json!({ "text": text }),
        Err(_) => json!({ "base64": STANDARD.encode(&response.body) }),
    }
}

fn colored_source(source: Source) -> String {
    let text = source.to_string();
    match source {
        Source::Network => text.green().to_string(),
        Source::Cache => text.cyan().to_string(),
        Source::Stale => text.yellow().to_string(),
        Source::Fallback => text.magenta().to_string(),
    }
}

/// Run one request and print what the page layer would receive
pub async fn run(
    ctx: &CommandContext,
    url: &str,
    method: &str,
    body: Option<String>,
    headers: &[String],
    identity: Option<&str>,
) -> Result<()> {
    let request = build_request(url, method, body, headers)?;

    let queue = Arc::new(ctx.queue(ctx.open_store()?, Arc::new(LogNotifier))?);
    let interceptor = ctx.interceptor(queue, identity)?;

    let outcome = interceptor.handle(&request).await;
    // Revalidations started by a stale hit must land before the process exits
    interceptor.flush_background().await;

    match outcome? {
        Intercepted::Response { response, source } => {
            if ctx.format == OutputFormat::Json {
                return crate::output::print_json(&json!({
                    "status": response.status,
                    "source": source,
                    "headers": response.headers,
                    "body": body_json(&response),
                }));
            }

            let status = if response.is_success() {
                response.status.to_string().green()
            } else {
                response.status.to_string().red()
            };
            eprintln!("{} {} ({})", status, request.url, colored_source(source));
            println!("{}", String::from_utf8_lossy(&response.body));
        }
        Intercepted::Queued { item_id } => {
            if ctx.format == OutputFormat::Json {
                return crate::output::print_json(&json!({ "queued": item_id }));
            }

            println!(
                "{} Offline: {} {} queued as {}",
                "⚠".yellow(),
                request.method,
                request.url,
                item_id.cyan()
            );
            println!("  → Deliver later with 'portal-offline queue drain'");
        }
    }

    Ok(())
}
