//! One-shot client for the coordinator

use crate::catalog::total_sales;
use crate::common::{with_timeout, KeyValue, LineStream, Result};
use std::collections::BTreeMap;
use std::time::Duration;

/// Fold a multi-line payload (e.g. a pretty-printed store document) onto
/// one line. JSON tolerates the whitespace this leaves between tokens.
pub fn normalize_payload(payload: &str) -> String {
    payload
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Send `command` / `payload` and return the coordinator's one-line reply.
///
/// The connect is bounded by `timeout`; the reply is not, since aggregations
/// wait as long as the cluster needs.
pub async fn send_command(
    coordinator: &str,
    command: &str,
    payload: &str,
    timeout: Duration,
) -> Result<String> {
    let mut conn = LineStream::connect(coordinator, timeout).await?;
    let payload = normalize_payload(payload);
    with_timeout(timeout, "request write", conn.write_lines(&[command, payload.as_str()])).await?;
    conn.expect_line().await
}

/// Best-effort pretty rendering of a reply for terminal output.
pub fn render_reply(command: &str, reply: &str) -> String {
    if let Ok(pairs) = serde_json::from_str::<Vec<KeyValue>>(reply) {
        return pairs
            .iter()
            .map(|kv| format!("{}: {}", kv.key, kv.value))
            .collect::<Vec<_>>()
            .join("\n");
    }
    if let Ok(merged) = serde_json::from_str::<BTreeMap<String, String>>(reply) {
        let mut out: Vec<String> = merged
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        if command.eq_ignore_ascii_case("AGGREGATE_SALES_BY_PRODUCT_NAME") {
            out.push(format!("Total: {}", total_sales(&merged)));
        }
        return out.join("\n");
    }
    reply.to_string()
}

/// Parse a merged aggregation reply back into its key/value map.
pub fn parse_merged(reply: &str) -> Result<BTreeMap<String, String>> {
    Ok(serde_json::from_str(reply)?)
}

/// Parse a directed-command reply into its pairs.
pub fn parse_pairs(reply: &str) -> Result<Vec<KeyValue>> {
    Ok(serde_json::from_str(reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_payload() {
        let doc = "{\n  \"StoreName\": \"A\",\n\n  \"Stars\": 3\n}\n";
        let line = normalize_payload(doc);
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["StoreName"], "A");
        assert_eq!(normalize_payload("PizzaWorld|Pepperoni|3"), "PizzaWorld|Pepperoni|3");
    }

    #[test]
    fn test_render_sales_total() {
        let reply = r#"{"A":"A: Pepperoni = 3","B":"B: Pepperoni = 4"}"#;
        let rendered = render_reply("AGGREGATE_SALES_BY_PRODUCT_NAME", reply);
        assert!(rendered.ends_with("Total: 7"), "{}", rendered);
    }

    #[test]
    fn test_render_pairs_and_raw() {
        let reply = r#"[{"key":"PizzaWorld","value":"Store PizzaWorld added."}]"#;
        assert_eq!(
            render_reply("ADD_STORE", reply),
            "PizzaWorld: Store PizzaWorld added."
        );
        assert_eq!(render_reply("X", "plain"), "plain");
    }
}
