use chrono::Utc;
use futures::{SinkExt, StreamExt};
use screener_engine::{bridge::BroadcastBridge, context::Shutdown};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Accept push connections until shutdown, serving each on its own task.
pub async fn serve(listener: TcpListener, bridge: Arc<BroadcastBridge>, shutdown: Shutdown) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "push endpoint listening"),
        Err(error) => warn!(%error, "push endpoint listening on unknown address"),
    }

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted push connection");
                    tokio::spawn(handle_client(stream, peer, Arc::clone(&bridge), shutdown.clone()));
                }
                Err(error) => warn!(%error, "failed to accept push connection"),
            }
        }
    }

    info!("push endpoint stopped");
}

/// Upgrade `stream`, greet the client, then forward its bridge queue as text frames.
///
/// Inbound frames are only read to notice a close. The connection is removed from the bridge
/// on every exit path.
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    bridge: Arc<BroadcastBridge>,
    shutdown: Shutdown,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            warn!(%peer, %error, "WebSocket handshake failed");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws.split();

    let welcome = serde_json::json!({
        "type": "welcome",
        "message": "Connected to screener price feed",
        "timestamp": Utc::now(),
    });
    if ws_sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let (id, mut rx) = bridge.register();
    info!(%peer, %id, connections = bridge.len(), "push client connected");

    let mut ping = tokio::time::interval(bridge.config().ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            message = rx.recv() => {
                // None: the bridge dropped this connection
                let Some(message) = message else { break };
                if ws_sender.send(Message::Text(message.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(%peer, %error, "push connection read failed");
                    break;
                }
            }
        }
    }

    bridge.remove(id);
    info!(%peer, %id, connections = bridge.len(), "push client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_engine::context::shutdown_channel;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_client_receives_welcome_then_broadcasts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bridge = Arc::new(BroadcastBridge::default());

        let (trigger, shutdown) = shutdown_channel();
        let server = tokio::spawn(serve(listener, Arc::clone(&bridge), shutdown));

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let timeout = Duration::from_secs(2);

        let welcome = tokio::time::timeout(timeout, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let welcome = serde_json::from_str::<serde_json::Value>(welcome.to_text().unwrap()).unwrap();
        assert_eq!(welcome["type"], "welcome");

        tokio::time::timeout(timeout, async {
            while bridge.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(bridge.broadcast("{\"s\":\"BTC/USDT\"}").delivered, 1);
        let relayed = tokio::time::timeout(timeout, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(relayed.to_text().unwrap(), "{\"s\":\"BTC/USDT\"}");

        // Client close removes the connection from the bridge
        client.close(None).await.unwrap();
        tokio::time::timeout(timeout, async {
            while !bridge.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        trigger.trigger();
        server.await.unwrap();
    }
}
