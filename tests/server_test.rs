//! Integration tests for the tracker HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use beacon_tracker::command::ChannelDispatcher;
    use beacon_tracker::server::{run, ServerConfig};
    use beacon_tracker::AnchorRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    fn layout() -> AnchorRegistry {
        AnchorRegistry::from_points([("A1", 0.0, 0.0), ("A2", 10.0, 0.0), ("A3", 5.0, 10.0)])
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        // Create server config with random port
        let config = ServerConfig::new(0, layout());

        // Start server
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["anchors_count"], 3);
        assert_eq!(body["ws_clients"], 0);
        assert_eq!(body["cooldown"], "open");

        // Shutdown server
        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_health_degraded_without_anchors() {
        let config = ServerConfig::new(0, AnchorRegistry::default());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["status"], "degraded");
        assert_eq!(body["anchors_count"], 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ingest_endpoint() {
        let config = ServerConfig::new(0, layout());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/api/reading/ble", addr))
            .json(&serde_json::json!({ "tagId": "TAG01", "anchorId": "A1", "rssi": -67 }))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["buffered"], true);

        // Unknown anchors and a missing tag id are accepted as well.
        let response = client
            .post(format!("http://{}/api/reading/ble", addr))
            .json(&serde_json::json!({ "anchorId": "NOT-IN-LAYOUT", "rssi": -90 }))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let health: serde_json::Value = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        assert_eq!(health["buffered_readings"], 2);
        assert_eq!(health["stats"]["readings_accepted"], 2);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ingest_rejects_malformed_body() {
        let config = ServerConfig::new(0, layout());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/api/reading/ble", addr))
            .json(&serde_json::json!({ "anchorId": "A1", "rssi": "strong" }))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_client_error());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_anchors_endpoint() {
        let config = ServerConfig::new(0, layout());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let body: serde_json::Value = reqwest::get(format!("http://{}/api/anchors", addr))
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        assert_eq!(body["anchors"]["A2"]["x"], 10.0);
        assert_eq!(body["initial_pos"]["x"], 5.0);
        assert_eq!(body["initial_pos"]["y"], 5.0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_alarm_endpoint_dispatches_command() {
        let (dispatcher, mut commands) = ChannelDispatcher::new();
        let config = ServerConfig::new(0, layout()).with_dispatcher(Arc::new(dispatcher));
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/api/tags/TAG01/alarm", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["tag_id"], "TAG01");

        let command = commands.try_recv().expect("command was not dispatched");
        assert_eq!(command.topic(), "tags/TAG01/command");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_alarm_endpoint_reports_dispatch_failure() {
        let (dispatcher, commands) = ChannelDispatcher::new();
        drop(commands);
        let config = ServerConfig::new(0, layout()).with_dispatcher(Arc::new(dispatcher));
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/api/tags/TAG01/alarm", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "DISPATCH_ERROR");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_position_stream_over_websocket() {
        use beacon_tracker::PipelineConfig;
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let pipeline = PipelineConfig {
            tick_interval: Duration::from_millis(200),
            ..PipelineConfig::default()
        };
        let config = ServerConfig::new(0, layout()).with_pipeline(pipeline);
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/position", addr))
            .await
            .expect("Failed to connect WebSocket");

        async fn next_json(
            ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
                      + Unpin),
        ) -> serde_json::Value {
            loop {
                let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                    .await
                    .expect("Timed out waiting for a frame")
                    .expect("Stream ended")
                    .expect("WebSocket error");
                if let Message::Text(text) = frame {
                    return serde_json::from_str(&text).expect("Failed to parse frame");
                }
            }
        }

        // The layout arrives before anything else.
        let first = next_json(&mut ws).await;
        assert_eq!(first["type"], "initial_setup");
        assert_eq!(first["payload"]["initial_pos"]["x"], 5.0);
        assert_eq!(first["payload"]["initial_pos"]["y"], 5.0);
        assert_eq!(first["payload"]["anchors"].as_object().unwrap().len(), 3);

        let client = reqwest::Client::new();
        for (anchor, rssi) in [("A1", -78), ("A2", -78), ("A3", -72)] {
            for _ in 0..5 {
                let response = client
                    .post(format!("http://{}/api/reading/ble", addr))
                    .json(&serde_json::json!({ "anchorId": anchor, "rssi": rssi }))
                    .send()
                    .await
                    .expect("Failed to send request");
                assert!(response.status().is_success());
            }
        }

        let update = next_json(&mut ws).await;
        assert_eq!(update["type"], "position_update");
        assert_eq!(update["payload"]["id"], "TAG01");
        assert_eq!(update["payload"]["kind"], "tag");
        assert!(update["payload"]["pos"]["x"].as_f64().unwrap().is_finite());

        ws.close(None).await.expect("Failed to close WebSocket");
        drop(ws);

        // The handler unsubscribes once it sees the close.
        let mut ws_clients = None;
        for _ in 0..50 {
            let health: serde_json::Value = client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .expect("Failed to send request")
                .json()
                .await
                .expect("Failed to parse JSON");
            ws_clients = health["ws_clients"].as_u64();
            if ws_clients == Some(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(ws_clients, Some(0));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let config = ServerConfig::new(0, layout());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(
                reqwest::Method::OPTIONS,
                format!("http://{}/api/reading/ble", addr),
            )
            .header("Origin", "http://localhost:19006")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
