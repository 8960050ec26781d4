//! Request loop: JSON lines in on stdin, responses and events out on stdout.
//!
//! Every request runs on its own task, so a call waiting on the host (for a
//! signature, say) does not block the line that answers it.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use xmtp_bridge::{Bridge, Error, EventName, HostEvent, Result};

use crate::signer::LocalSigner;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    args: Value,
}

/// Serve until stdin closes.
pub async fn serve(
    bridge: Arc<Bridge>,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    signer: Option<LocalSigner>,
) -> Result<()> {
    let (out, lines_out) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(write_lines(lines_out));

    let forward = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        let out = out.clone();
        async move {
            while let Some(event) = events.recv().await {
                if let Some(signer) = &signer
                    && event.name == EventName::Sign
                    && auto_sign(&bridge, signer, &event.payload)
                {
                    continue;
                }
                match serde_json::to_value(&event) {
                    Ok(line) => {
                        let _ = out.send(line);
                    }
                    Err(e) => tracing::warn!(event = %event.name, error = %e, "event not encodable"),
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let _ = out.send(json!({ "id": Value::Null, "error": Error::decode(&e).to_json() }));
                continue;
            }
        };
        let bridge = Arc::clone(&bridge);
        let out = out.clone();
        tokio::spawn(async move {
            let reply = match bridge.call(&request.method, request.args).await {
                Ok(ok) => json!({ "id": request.id, "ok": ok }),
                Err(e) => json!({ "id": request.id, "error": e.to_json() }),
            };
            let _ = out.send(reply);
        });
    }

    tracing::info!("stdin closed, shutting down");
    bridge.shutdown().await;
    forward.abort();
    drop(out);
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(Error::Io(std::io::Error::other(e))),
    }
}

/// Answer a `sign` event with the local key. Returns whether it was handled;
/// events for other addresses go to the host.
fn auto_sign(bridge: &Bridge, signer: &LocalSigner, payload: &Value) -> bool {
    let (Some(id), Some(address), Some(message)) = (
        payload["id"].as_str(),
        payload["address"].as_str(),
        payload["message"].as_str(),
    ) else {
        return false;
    };
    if !address.eq_ignore_ascii_case(signer.address()) {
        return false;
    }
    match signer
        .sign(message)
        .and_then(|sig| bridge.receive_signature(id, &hex::encode(sig)))
    {
        Ok(resolved) => {
            tracing::debug!(request_id = id, resolved, "auto-signed");
            true
        }
        Err(e) => {
            tracing::warn!(request_id = id, error = %e, "auto-sign failed");
            false
        }
    }
}

async fn write_lines(mut lines: mpsc::UnboundedReceiver<Value>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = lines.recv().await {
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}
