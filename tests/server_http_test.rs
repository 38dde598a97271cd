//! End-to-end tests of the HTTP transport over a real listener.

mod common;

use common::TestServer;
use metrix_lib::agent::{HttpTransport, Transport};
use metrix_lib::core::crypto::{self, HASH_HEADER};
use metrix_lib::core::{AgentConfig, Metric, MetricValue};
use metrix_lib::server::Security;
use reqwest::StatusCode;
use std::net::{IpAddr, Ipv4Addr};

#[tokio::test]
async fn test_tampered_body_is_rejected_without_mutation() {
    let server = TestServer::start(Security {
        key: Some(b"secret".to_vec()),
        ..Default::default()
    })
    .await;

    let signed = br#"[{"id":"hits","type":"counter","delta":1}]"#;
    let tampered = br#"[{"id":"hits","type":"counter","delta":9}]"#;
    let response = reqwest::Client::new()
        .post(server.url("/updates/"))
        .header(HASH_HEADER, crypto::sign(b"secret", signed).unwrap())
        .body(tampered.to_vec())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.storage.get_all().await.unwrap().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_absent_metric_is_not_found() {
    let server = TestServer::start(Security::default()).await;

    let response = reqwest::get(server.url("/value/counter/doesNotExist"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    server.stop().await;
}

#[tokio::test]
async fn test_gzip_json_update_is_echoed() {
    let server = TestServer::start(Security::default()).await;
    let client = reqwest::Client::new();

    for delta in [2, 3] {
        let body = format!(r#"{{"id":"PollCount","type":"counter","delta":{delta}}}"#);
        let response = client
            .post(server.url("/update/"))
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "gzip")
            .body(common::gzip(body.as_bytes()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        if delta == 3 {
            let echoed: Metric = response.json().await.unwrap();
            assert_eq!(echoed, Metric::counter("PollCount", 5));
        }
    }
    server.stop().await;
}

#[tokio::test]
async fn test_compressed_response_when_accepted() {
    let server = TestServer::start(Security::default()).await;
    let client = reqwest::Client::new();

    let batch: Vec<Metric> = (0..50)
        .map(|i| Metric::gauge(format!("metric-{i}"), f64::from(i)))
        .collect();
    client
        .post(server.url("/updates/"))
        .body(serde_json::to_vec(&batch).unwrap())
        .send()
        .await
        .unwrap();

    let response = client
        .get(server.url("/"))
        .header("Accept-Encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-encoding").unwrap(),
        "gzip"
    );
    server.stop().await;
}

#[tokio::test]
async fn test_agent_transport_with_signature_and_encryption() {
    let mut rng = rand::thread_rng();
    let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = rsa::RsaPublicKey::from(&private_key);

    let dir = tempfile::tempdir().unwrap();
    let public_path = dir.path().join("public.pem");
    {
        use rsa::pkcs1::{EncodeRsaPublicKey, LineEnding};
        std::fs::write(&public_path, public_key.to_pkcs1_pem(LineEnding::LF).unwrap()).unwrap();
    }

    let server = TestServer::start(Security {
        key: Some(b"secret".to_vec()),
        private_key: Some(private_key),
        trusted_subnet: Some("127.0.0.0/8".parse().unwrap()),
    })
    .await;

    let config = AgentConfig {
        server_address: server.http_addr.to_string(),
        key: Some("secret".into()),
        public_key_path: Some(public_path),
        ..Default::default()
    };
    let transport = HttpTransport::new(&config, IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();

    let batch: Vec<Metric> = (0..20)
        .map(|i| Metric::gauge(format!("gauge-{i}"), f64::from(i) * 1.5))
        .chain(std::iter::once(Metric::counter("PollCount", 4)))
        .collect();
    transport.send(&batch).await.unwrap();

    let stored = server.storage.get_value("counter", "PollCount").await.unwrap().unwrap();
    assert_eq!(stored.value, MetricValue::Counter(4));
    assert_eq!(server.storage.get_all().await.unwrap().len(), 21);
    server.stop().await;
}

#[tokio::test]
async fn test_untrusted_agent_is_forbidden() {
    let server = TestServer::start(Security {
        trusted_subnet: Some("10.0.0.0/8".parse().unwrap()),
        ..Default::default()
    })
    .await;

    let config = AgentConfig {
        server_address: server.http_addr.to_string(),
        ..Default::default()
    };
    let transport = HttpTransport::new(&config, IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();

    let err = transport.send(&[Metric::gauge("Alloc", 1.0)]).await.unwrap_err();
    assert!(err.to_string().contains("403"));
    server.stop().await;
}
