//! Template-based description generation.

use async_trait::async_trait;
use serde_json::Value;

use crate::collab::DescriptionGenerator;

/// Renders detector and classifier output as sentences. Objects it does not
/// recognize are passed through as raw JSON.
#[derive(Debug, Clone, Default)]
pub struct TemplateDescriber;

impl TemplateDescriber {
    pub fn new() -> Self {
        Self
    }

    fn describe_one(detection: &Value) -> String {
        let confidence = detection.get("confidence").and_then(Value::as_f64);

        if let Some(class) = detection.get("predicted_class").and_then(Value::as_str) {
            let mut text = format!(
                "The model predicts {class} with {:.2}% confidence.",
                confidence.unwrap_or(0.0) * 100.0
            );
            if let Some(probs) = detection.get("class_probabilities").and_then(Value::as_object)
                && !probs.is_empty()
            {
                text.push_str("\n\nClass probabilities:");
                for (name, p) in probs {
                    let p = p.as_f64().unwrap_or(0.0) * 100.0;
                    text.push_str(&format!("\n- {name}: {p:.2}%"));
                }
            }
            return text;
        }

        let class = ["class", "label", "name"]
            .iter()
            .find_map(|k| detection.get(*k).and_then(Value::as_str));
        match (class, confidence) {
            (Some(class), Some(c)) => format!("{class} detected with {:.2}% confidence", c * 100.0),
            (Some(class), None) => format!("{class} detected"),
            _ => detection.to_string(),
        }
    }
}

#[async_trait]
impl DescriptionGenerator for TemplateDescriber {
    async fn describe(&self, detections: &[Value]) -> Vec<String> {
        detections.iter().map(Self::describe_one).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn detections_become_sentences() {
        let out = TemplateDescriber::new()
            .describe(&[
                json!({"class": "cat", "bounding_box": [50, 50, 100, 100], "confidence": 0.95}),
                json!({"class": "dog", "confidence": 0.88}),
            ])
            .await;
        assert_eq!(
            out,
            vec![
                "cat detected with 95.00% confidence",
                "dog detected with 88.00% confidence"
            ]
        );
    }

    #[tokio::test]
    async fn classifier_output_lists_probabilities() {
        let out = TemplateDescriber::new()
            .describe(&[json!({
                "predicted_class": "benign",
                "confidence": 0.9,
                "class_probabilities": {"benign": 0.9, "malignant": 0.1}
            })])
            .await;
        assert_eq!(
            out[0],
            "The model predicts benign with 90.00% confidence.\n\nClass probabilities:\n- benign: 90.00%\n- malignant: 10.00%"
        );
    }

    #[tokio::test]
    async fn unknown_shapes_pass_through() {
        let out = TemplateDescriber::new()
            .describe(&[json!({"score": 3}), json!("plain")])
            .await;
        assert_eq!(out, vec![r#"{"score":3}"#, r#""plain""#]);
    }
}
