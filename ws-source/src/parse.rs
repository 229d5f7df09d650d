//! Wire message parsing, kept free of any socket handling so it can be
//! tested directly.

use core_types::types::Sample;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, PartialEq)]
pub enum ParsedMessage {
    Batch(Vec<Sample>),
    Finished,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    finished: Option<bool>,
    #[serde(default)]
    input_data: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    label: Option<Vec<Value>>,
}

/// Parse one text frame into a batch or the end-of-stream marker.
///
/// Labels arrive either as scalars or as per-row vectors depending on the
/// shape of the server's label array; both are accepted.
pub fn parse_message(text: &str) -> Result<ParsedMessage, String> {
    let message: WireMessage =
        serde_json::from_str(text).map_err(|err| format!("invalid json: {err}"))?;
    if message.finished == Some(true) {
        return Ok(ParsedMessage::Finished);
    }
    let input = message
        .input_data
        .ok_or_else(|| "missing input_data".to_string())?;
    let labels = message.label.ok_or_else(|| "missing label".to_string())?;
    if input.len() != labels.len() {
        return Err(format!(
            "input/label row count mismatch: {} vs {}",
            input.len(),
            labels.len()
        ));
    }
    let samples = input
        .into_iter()
        .zip(labels.iter())
        .map(|(row, label)| Ok(Sample::new(row, label_row(label)?)))
        .collect::<Result<Vec<_>, String>>()?;
    Ok(ParsedMessage::Batch(samples))
}

fn label_row(value: &Value) -> Result<Vec<f64>, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|v| vec![v])
            .ok_or_else(|| format!("non-finite label: {n}")),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| format!("non-numeric label element: {item}"))
            })
            .collect(),
        other => Err(format!("unsupported label value: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_with_scalar_labels() {
        let text = r#"{"input_data": [[1.0, 2.0], [3.0, 4.0]], "label": [0, 1]}"#;
        let parsed = parse_message(text).unwrap();
        assert_eq!(
            parsed,
            ParsedMessage::Batch(vec![
                Sample::new(vec![1.0, 2.0], vec![0.0]),
                Sample::new(vec![3.0, 4.0], vec![1.0]),
            ])
        );
    }

    #[test]
    fn parses_batch_with_vector_labels() {
        let text = r#"{"input_data": [[1.0]], "label": [[0.0, 1.0]]}"#;
        let parsed = parse_message(text).unwrap();
        assert_eq!(
            parsed,
            ParsedMessage::Batch(vec![Sample::new(vec![1.0], vec![0.0, 1.0])])
        );
    }

    #[test]
    fn parses_finished_marker() {
        assert_eq!(
            parse_message(r#"{"finished": true}"#).unwrap(),
            ParsedMessage::Finished
        );
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(parse_message("not json").is_err());
    }

    #[test]
    fn rejects_row_count_mismatch() {
        let text = r#"{"input_data": [[1.0], [2.0]], "label": [0]}"#;
        let err = parse_message(text).unwrap_err();
        assert!(err.contains("mismatch"));
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(parse_message(r#"{"input_data": [[1.0]]}"#).is_err());
        assert!(parse_message(r#"{"label": [0]}"#).is_err());
    }

    #[test]
    fn rejects_non_numeric_labels() {
        let text = r#"{"input_data": [[1.0]], "label": ["bad"]}"#;
        assert!(parse_message(text).is_err());
    }
}
