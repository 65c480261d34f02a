//! Prediction Client
//!
//! Fetches the request schema of a model from a running server and sends
//! prediction requests with jittered history values.
//!
//! Usage: predict-client [BASE_URL] [MODEL] [COUNT] [JITTER] [DELAY_MS]

use anyhow::{bail, Context};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HISTORY_PREFIX: &str = "DL_hist_";

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    model_tag: String,
    window_size: usize,
    example_request: ExampleRequest,
}

#[derive(Debug, Deserialize)]
struct ExampleRequest {
    features: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    prediction: f64,
    model_tag: String,
}

/// Multiply every history value by a random factor in `1 ± jitter`.
fn jitter_history(features: &BTreeMap<String, f64>, jitter: f64, rng: &mut impl Rng) -> Value {
    let jittered: serde_json::Map<String, Value> = features
        .iter()
        .map(|(name, &value)| {
            let value = if name.starts_with(HISTORY_PREFIX) && jitter > 0.0 {
                value * rng.gen_range((1.0 - jitter)..(1.0 + jitter))
            } else {
                value
            };
            (name.clone(), json!(value))
        })
        .collect();
    Value::Object(jittered)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("predict_client=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let base_url = args
        .get(1)
        .map(|s| s.trim_end_matches('/'))
        .unwrap_or("http://localhost:8000");
    let model = args.get(2).map(|s| s.as_str()).filter(|s| !s.is_empty());
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10);
    let jitter: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.05_f64)
        .clamp(0.0, 0.9);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        base_url = %base_url,
        model = ?model,
        count = count,
        jitter = jitter,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    // Fetch the example request for the model
    let mut schema_request = client.get(format!("{}/api/schema", base_url));
    if let Some(model) = model {
        schema_request = schema_request.query(&[("model", model)]);
    }
    let response = schema_request
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", base_url))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("Schema request failed ({}): {}", status, body);
    }
    let schema: SchemaResponse = response.json().await.context("Invalid schema response")?;

    info!(
        model_tag = %schema.model_tag,
        window_size = schema.window_size,
        n_features = schema.example_request.features.len(),
        "Schema fetched"
    );

    let mut rng = rand::thread_rng();
    let mut succeeded = 0u64;
    let mut failed = 0u64;
    let mut predictions = Vec::with_capacity(count as usize);
    let started = Instant::now();

    for i in 0..count {
        let body = json!({
            "model": schema.model_tag,
            "features": jitter_history(&schema.example_request.features, jitter, &mut rng),
        });

        let sent = Instant::now();
        match client
            .post(format!("{}/api/predict", base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let result: PredictResponse = resp.json().await?;
                succeeded += 1;
                predictions.push(result.prediction);
                info!(
                    request = i + 1,
                    model_tag = %result.model_tag,
                    prediction = result.prediction,
                    latency_ms = sent.elapsed().as_millis() as u64,
                    "Prediction"
                );
            }
            Ok(resp) => {
                failed += 1;
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(request = i + 1, status = %status, body = %body, "Prediction rejected");
            }
            Err(e) => {
                failed += 1;
                warn!(request = i + 1, error = %e, "Request failed");
            }
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let mean = if predictions.is_empty() {
        0.0
    } else {
        predictions.iter().sum::<f64>() / predictions.len() as f64
    };
    info!(
        succeeded,
        failed,
        mean_prediction = mean,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Completed"
    );

    Ok(())
}
