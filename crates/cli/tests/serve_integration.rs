//! Integration tests for the `agritrace serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port with a
//! simulated chain and a fresh store file, makes HTTP requests, and
//! verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tempfile::TempDir;

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so parallel `cargo test --workspace` runs
/// (which spawn separate test binaries) don't collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

const FARMER: &str = "0x2222222222222222222222222222222222222222";

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Helper: start `agritrace serve --simulate` on the given port.
///
/// Runs in a temporary directory so no `.env` file is picked up; the store
/// file lives there too. Keep the returned `TempDir` alive for the test.
fn start_server(port: u16, env: &[(&str, &str)]) -> (Child, TempDir) {
    let dir = TempDir::new().expect("temp dir");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_agritrace"));
    cmd.current_dir(dir.path());
    cmd.arg("serve")
        .arg("--simulate")
        .arg("--port")
        .arg(port.to_string())
        .arg("--store")
        .arg(dir.path().join("data.json"));
    for var in [
        "AGRITRACE_API_KEY",
        "AGRITRACE_RATE_LIMIT",
        "AGRITRACE_RPC_URL",
        "AGRITRACE_PRIVATE_KEY",
        "AGRITRACE_CONTRACT_ADDRESS",
        "AGRITRACE_CHAIN_ID",
        "AGRITRACE_EXPLORER_URL",
    ] {
        cmd.env_remove(var);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start agritrace serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            return (child, dir);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    (child, dir)
}

fn stop(mut child: Child) {
    child.kill().ok();
    child.wait().ok();
}

/// Helper: send a raw HTTP/1.1 request and return (status, body).
fn http_request(port: u16, method: &str, path: &str, headers: &[(&str, &str)], body: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let request = match body {
        Some(body) => format!(
            "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            method, path, port, header_lines, body.len(), body
        ),
        None => format!(
            "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Connection: close\r\n\r\n",
            method, path, port, header_lines
        ),
    };
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

fn http_get(port: u16, path: &str) -> (u16, String) {
    http_request(port, "GET", path, &[], None)
}

fn http_post(port: u16, path: &str, body: &str) -> (u16, String) {
    http_request(port, "POST", path, &[], Some(body))
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON ({}): {}", e, body))
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status_line = headers.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    // Handle chunked transfer encoding
    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };

    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size_str = &remaining[..line_end];
        let size = match usize::from_str_radix(size_str.trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            // Partial chunk, take what we have
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        // Skip past chunk data + \r\n
        remaining = if chunk_end + 2 <= remaining.len() {
            &remaining[chunk_end + 2..]
        } else {
            ""
        };
    }

    result
}

fn batch_body(batch_id: &str) -> String {
    serde_json::json!({
        "batchId": batch_id,
        "farmerAddr": FARMER,
        "cropType": "Wheat",
        "harvestDate": "2024-06-01",
        "location": "Nashik",
        "priceEth": "0.5",
    })
    .to_string()
}

fn product_body(product_id: &str) -> String {
    serde_json::json!({
        "product_id": product_id,
        "product_name": "Organic Basmati",
        "farmer_name": "Asha Patil",
        "farmer_location": "Nashik, Maharashtra",
        "crop_type": "Rice",
        "harvest_date": "2024-06-01",
    })
    .to_string()
}

fn assert_tx_hash(value: &serde_json::Value) {
    let hash = value.as_str().expect("tx hash string");
    assert!(hash.starts_with("0x"), "hash should be 0x-prefixed: {}", hash);
    assert_eq!(hash.len(), 66, "hash should be 32 bytes: {}", hash);
}

#[test]
fn health_reports_chain_and_store() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (status, body) = http_get(port, "/health");
    stop(child);

    assert_eq!(status, 200);
    let json = json(&body);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["chainId"], 1337);
    assert!(json["store"].as_str().unwrap().ends_with("data.json"));
}

#[test]
fn batch_lifecycle_records_four_proofs() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (add_status, add_body) = http_post(port, "/api/batch", &batch_body("B1"));
    let (event_status, event_body) = http_post(
        port,
        "/api/event",
        r#"{"batchId":"B1","event":{"type":"sorted","grade":"A"}}"#,
    );
    let (delivery_status, _) = http_post(port, "/api/delivery", r#"{"batchId":"B1"}"#);
    let (pay_status, pay_body) = http_post(port, "/api/pay", r#"{"batchId":"B1"}"#);
    let (get_status, get_body) = http_get(port, "/api/batch/B1");
    let (list_status, list_body) = http_get(port, "/api/batches");
    let pay_hash = json(&pay_body)["txHash"].as_str().unwrap_or_default().to_string();
    let (verify_status, verify_body) = http_get(port, &format!("/api/verify/{}", pay_hash));
    stop(child);

    assert_eq!(add_status, 200, "add: {}", add_body);
    let add = json(&add_body);
    assert_eq!(add["ok"], true);
    assert_tx_hash(&add["txHash"]);
    assert_eq!(add["batch"]["batchId"], "B1");

    assert_eq!(event_status, 200, "event: {}", event_body);
    assert_tx_hash(&json(&event_body)["txHash"]);
    assert_eq!(delivery_status, 200);
    assert_eq!(pay_status, 200, "pay: {}", pay_body);

    assert_eq!(get_status, 200);
    let batch = json(&get_body);
    let actions: Vec<&str> = batch["chainProofs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, ["addBatch", "addEvent", "confirmDelivery", "payFarmer"]);
    assert_eq!(batch["meta"]["delivered"], true);
    assert_eq!(batch["meta"]["paid"], true);
    assert_eq!(batch["meta"]["paymentTx"], pay_hash.as_str());
    assert_eq!(batch["events"][0]["grade"], "A");
    assert!(batch["pendingProofs"].as_array().map_or(true, |p| p.is_empty()));

    assert_eq!(list_status, 200);
    assert_eq!(json(&list_body)["batches"].as_array().unwrap().len(), 1);

    assert_eq!(verify_status, 200, "verify: {}", verify_body);
    let verify = json(&verify_body);
    assert_eq!(verify["success"], true);
    assert_eq!(verify["verification"]["transactionHash"], pay_hash.as_str());
    assert_eq!(verify["verification"]["status"], "Success");
    assert_eq!(
        verify["verification"]["contractAddress"].as_str().unwrap().to_lowercase(),
        FARMER
    );
}

#[test]
fn batch_errors_map_to_status_codes() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (first, _) = http_post(port, "/api/batch", &batch_body("B1"));
    let (duplicate, duplicate_body) = http_post(port, "/api/batch", &batch_body("B1"));
    let (missing_farmer, missing_body) = http_post(port, "/api/batch", r#"{"batchId":"B2"}"#);
    let (bad_json, bad_json_body) = http_post(port, "/api/batch", "{not json");
    let (unknown, unknown_body) = http_get(port, "/api/batch/NOPE");
    let (no_event, _) = http_post(port, "/api/event", r#"{"batchId":"B1"}"#);
    let (event_unknown, _) = http_post(port, "/api/event", r#"{"batchId":"NOPE","event":{"t":1}}"#);
    let (pay_once, _) = http_post(port, "/api/pay", r#"{"batchId":"B1","priceEth":0.25}"#);
    let (pay_twice, pay_twice_body) = http_post(port, "/api/pay", r#"{"batchId":"B1","priceEth":0.25}"#);
    let (bad_price, _) = http_post(port, "/api/pay", r#"{"batchId":"B1","priceEth":"lots"}"#);
    stop(child);

    assert_eq!(first, 200);
    assert_eq!(duplicate, 409);
    assert!(json(&duplicate_body)["error"].as_str().unwrap().contains("B1"));
    assert_eq!(missing_farmer, 400);
    assert!(json(&missing_body)["error"].as_str().unwrap().contains("farmerAddr"));
    assert_eq!(bad_json, 400);
    assert!(json(&bad_json_body)["error"].is_string());
    assert_eq!(unknown, 404);
    assert!(json(&unknown_body)["error"].is_string());
    assert_eq!(no_event, 400);
    assert_eq!(event_unknown, 404);
    assert_eq!(pay_once, 200);
    assert_eq!(pay_twice, 409);
    assert!(json(&pay_twice_body)["error"].as_str().unwrap().contains("already paid"));
    assert_eq!(bad_price, 400);
}

#[test]
fn retry_with_nothing_pending_is_ok() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    http_post(port, "/api/batch", &batch_body("B1"));
    let (status, body) = http_post(port, "/api/retry", r#"{"batchId":"B1"}"#);
    let (unknown, _) = http_post(port, "/api/retry", r#"{"batchId":"NOPE"}"#);
    stop(child);

    assert_eq!(status, 200);
    let json = json(&body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["confirmed"].as_array().unwrap().len(), 0);
    assert_eq!(json["stillPending"].as_array().unwrap().len(), 0);
    assert_eq!(unknown, 404);
}

#[test]
fn settled_batches_and_products_have_nothing_to_recover() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    http_post(port, "/api/batch", &batch_body("B1"));
    let (resolve, resolve_body) = http_post(port, "/api/pay/resolve", r#"{"batchId":"B1"}"#);
    http_post(port, "/api/products", &product_body("P1"));
    let (retry, retry_body) = http_post(port, "/api/products/P1/retry", "");
    let (retry_unknown, _) = http_post(port, "/api/products/NOPE/retry", "");
    stop(child);

    assert_eq!(resolve, 404);
    assert!(json(&resolve_body)["error"]
        .as_str()
        .unwrap()
        .contains("no unconfirmed payment"));

    assert_eq!(retry, 200);
    let report = json(&retry_body);
    assert_eq!(report["success"], true);
    assert_eq!(report["registered"], true);
    assert_eq!(report["confirmedStages"].as_array().unwrap().len(), 0);
    assert_eq!(report["product"]["chain"]["state"], "confirmed");
    assert_eq!(retry_unknown, 404);
}

#[test]
fn product_stages_readable_locally_and_on_chain() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (add_status, add_body) = http_post(port, "/api/products", &product_body("P1"));
    let (stage1_status, stage1_body) = http_post(
        port,
        "/api/products/P1/stages",
        r#"{"stage_name":"Harvested","location":"Nashik","notes":"Moisture 12%"}"#,
    );
    let (stage2_status, _) = http_post(
        port,
        "/api/products/P1/stages",
        r#"{"stage_name":"Transport","location":"NH-60","status":"In Transit"}"#,
    );
    let (local_status, local_body) = http_get(port, "/api/products/P1");
    let (chain_status, chain_body) = http_get(port, "/api/products/P1/chain");
    stop(child);

    assert_eq!(add_status, 200, "add: {}", add_body);
    let add = json(&add_body);
    assert_eq!(add["success"], true);
    assert_eq!(add["product"]["productId"], "P1");
    assert_tx_hash(&add["blockchain"]["transactionHash"]);
    assert!(add["blockchain"]["blockNumber"].as_u64().unwrap() > 0);

    assert_eq!(stage1_status, 200, "stage: {}", stage1_body);
    let stage1 = json(&stage1_body);
    assert_eq!(stage1["stage"]["status"], "Completed");
    assert!(stage1["stage"]["completedAt"].is_string());
    assert_eq!(stage2_status, 200);

    assert_eq!(local_status, 200);
    let local = json(&local_body);
    assert_eq!(local["chain"]["state"], "confirmed");
    assert_eq!(local["stages"].as_array().unwrap().len(), 2);
    assert_eq!(local["stages"][1]["chain"]["state"], "confirmed");
    assert!(local["stages"][1].get("completedAt").is_none());

    assert_eq!(chain_status, 200, "chain: {}", chain_body);
    let chain = json(&chain_body);
    assert_eq!(chain["source"], "blockchain");
    assert_eq!(chain["product"]["productName"], "Organic Basmati");
    assert_eq!(chain["product"]["harvestDate"], "2024-06-01T00:00:00Z");
    assert_eq!(chain["product"]["stageCount"], 2);
    assert_eq!(chain["product"]["stages"][0]["notes"], "Moisture 12%");
    assert_eq!(chain["product"]["stages"][1]["status"], "In Transit");
}

#[test]
fn product_errors_map_to_status_codes() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (missing, missing_body) = http_post(port, "/api/products", r#"{"product_id":"P1"}"#);
    let (bad_date, _) = http_post(
        port,
        "/api/products",
        &product_body("P2").replace("2024-06-01", "June 1st"),
    );
    let (first, _) = http_post(port, "/api/products", &product_body("P1"));
    let (duplicate, _) = http_post(port, "/api/products", &product_body("P1"));
    let (stage_unknown, _) = http_post(
        port,
        "/api/products/NOPE/stages",
        r#"{"stage_name":"Harvested","location":"Nashik"}"#,
    );
    let (stage_missing, _) = http_post(port, "/api/products/P1/stages", r#"{"stage_name":"Harvested"}"#);
    let (local_unknown, _) = http_get(port, "/api/products/NOPE");
    let (chain_unknown, _) = http_get(port, "/api/products/NOPE/chain");
    stop(child);

    assert_eq!(missing, 400);
    assert!(json(&missing_body)["error"].as_str().unwrap().contains("product_name"));
    assert_eq!(bad_date, 400);
    assert_eq!(first, 200);
    assert_eq!(duplicate, 409);
    assert_eq!(stage_unknown, 404);
    assert_eq!(stage_missing, 400);
    assert_eq!(local_unknown, 404);
    assert_eq!(chain_unknown, 404);
}

#[test]
fn verify_rejects_malformed_and_unknown_hashes() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (malformed, malformed_body) = http_get(port, "/api/verify/0x1234");
    let unknown_hash = format!("0x{}", "ab".repeat(32));
    let (unknown, _) = http_get(port, &format!("/api/verify/{}", unknown_hash));
    stop(child);

    assert_eq!(malformed, 400);
    assert!(json(&malformed_body)["error"].is_string());
    assert_eq!(unknown, 404);
}

#[test]
fn not_found_returns_404() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[]);

    let (status, body) = http_get(port, "/nonexistent");
    stop(child);

    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "not found");
}

#[test]
fn api_key_required_except_health() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[("AGRITRACE_API_KEY", "s3cret")]);

    let (health, _) = http_get(port, "/health");
    let (anonymous, _) = http_get(port, "/api/batches");
    let (wrong, _) = http_request(port, "GET", "/api/batches", &[("X-API-Key", "nope")], None);
    let (header_key, _) = http_request(port, "GET", "/api/batches", &[("X-API-Key", "s3cret")], None);
    let (bearer, _) = http_request(
        port,
        "GET",
        "/api/batches",
        &[("Authorization", "Bearer s3cret")],
        None,
    );
    stop(child);

    assert_eq!(health, 200);
    assert_eq!(anonymous, 401);
    assert_eq!(wrong, 403);
    assert_eq!(header_key, 200);
    assert_eq!(bearer, 200);
}

#[test]
fn rate_limit_returns_429() {
    let port = next_port();
    let (child, _dir) = start_server(port, &[("AGRITRACE_RATE_LIMIT", "3")]);

    let statuses: Vec<u16> = (0..5).map(|_| http_get(port, "/health").0).collect();
    stop(child);

    assert_eq!(&statuses[..3], &[200, 200, 200]);
    assert_eq!(statuses[3], 429);
    assert_eq!(statuses[4], 429);
}
