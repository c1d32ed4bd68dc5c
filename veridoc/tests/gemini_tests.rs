//! Gemini clients against a local HTTP server.

use std::io;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use veridoc::RagError;
use veridoc::embedding::EmbeddingProvider;
use veridoc::gemini::{GeminiEmbeddingProvider, GeminiGenerator};
use veridoc::generation::Generator;

const LEAKY_ERROR: &str = r#"{"error": {"code": 400, "message": "Invalid value in request from juan@empresa.com.pe"}}"#;

type Handler = Box<dyn Fn(&Value) -> (u16, String) + Send + Sync>;

/// Serves one request per connection, recording every JSON body it receives.
async fn spawn_server(handler: Handler) -> (String, Arc<Mutex<Vec<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&bodies);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let body = read_body(&mut stream).await;
            let request: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let (status, payload) = handler(&request);
            seen.lock().unwrap().push(request);

            let reason = if status == 200 { "OK" } else { "Bad Request" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                payload.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{addr}"), bodies)
}

async fn read_body(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return String::new();
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let start = head_end + 4;
        if buf.len() >= start + length {
            return String::from_utf8_lossy(&buf[start..start + length]).into_owned();
        }
    }
}

/// Answers `batchEmbedContents` with `[n]` for a request whose text is `fragmento n`.
fn embed_by_number(request: &Value) -> (u16, String) {
    let embeddings: Vec<Value> = request["requests"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|r| {
            let text = r["content"]["parts"][0]["text"].as_str().unwrap_or_default();
            let n: f32 = text.trim_start_matches("fragmento ").parse().unwrap_or(-1.0);
            json!({ "values": [n] })
        })
        .collect();
    (200, json!({ "embeddings": embeddings }).to_string())
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn large_corpus_is_embedded_in_ordered_batches() {
    let (base, bodies) = spawn_server(Box::new(embed_by_number)).await;
    let provider = GeminiEmbeddingProvider::new("test-key", "text-embedding-004")
        .unwrap()
        .with_base_url(base);

    let texts: Vec<String> = (0..250).map(|i| format!("fragmento {i}")).collect();
    let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
    let embeddings = provider.embed_documents(&texts).await.unwrap();

    let sizes: Vec<usize> = bodies
        .lock()
        .unwrap()
        .iter()
        .map(|body| body["requests"].as_array().map_or(0, Vec::len))
        .collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(embeddings.len(), 250);
    for (i, embedding) in embeddings.iter().enumerate() {
        assert_eq!(embedding, &vec![i as f32]);
    }
}

#[tokio::test]
async fn short_embedding_reply_is_an_error() {
    let (base, _) = spawn_server(Box::new(|_: &Value| {
        (200, json!({ "embeddings": [{ "values": [1.0] }] }).to_string())
    }))
    .await;
    let provider = GeminiEmbeddingProvider::new("test-key", "text-embedding-004")
        .unwrap()
        .with_base_url(base);

    let err = provider.embed_documents(&["uno", "dos"]).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingError { .. }));
}

#[tokio::test]
async fn embedding_api_error_is_returned_but_not_logged() {
    let (base, _) = spawn_server(Box::new(|_: &Value| (400, LEAKY_ERROR.to_string()))).await;
    let provider = GeminiEmbeddingProvider::new("test-key", "text-embedding-004")
        .unwrap()
        .with_base_url(base);
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let err = provider.embed_query("¿Cuál es el plazo?").await.unwrap_err();

    match err {
        RagError::EmbeddingError { message, .. } => {
            assert!(message.contains("400"));
            assert!(message.contains("juan@empresa.com.pe"));
        }
        other => panic!("expected EmbeddingError, got {other:?}"),
    }
    let logged = logs.contents();
    assert!(logged.contains("embedding API error"));
    assert!(logged.contains("400"));
    assert!(!logged.contains("juan@empresa.com.pe"));
}

#[tokio::test]
async fn generation_api_error_is_returned_but_not_logged() {
    let (base, _) = spawn_server(Box::new(|_: &Value| (400, LEAKY_ERROR.to_string()))).await;
    let generator =
        GeminiGenerator::new("test-key", "gemini-2.0-flash").unwrap().with_base_url(base);
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let err = generator.generate("¿Cuál es el plazo?", &[], 256).await.unwrap_err();

    assert!(matches!(
        &err,
        RagError::GenerationError { message, .. } if message.contains("juan@empresa.com.pe")
    ));
    let logged = logs.contents();
    assert!(logged.contains("generation API error"));
    assert!(!logged.contains("juan@empresa.com.pe"));
}

#[tokio::test]
async fn generated_text_is_parsed() {
    let (base, bodies) = spawn_server(Box::new(|_: &Value| {
        let text = r#"{"answer": "Quince días hábiles.", "citations": [], "confidence": 0.8, "refusal": false}"#;
        (200, json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] }).to_string())
    }))
    .await;
    let generator =
        GeminiGenerator::new("test-key", "gemini-2.0-flash").unwrap().with_base_url(base);

    let output = generator.generate("¿Cuál es el plazo?", &[], 256).await.unwrap();

    assert_eq!(output.answer().answer, "Quince días hábiles.");
    let body = &bodies.lock().unwrap()[0];
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
}
