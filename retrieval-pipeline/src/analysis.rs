use serde_json::Value;

use crate::llm::truncate_chars;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are a legal document analysis expert specializing \
    in contract review, legal risk assessment, and compliance analysis.";

/// Normalized analysis slots. Models return these fields in inconsistent
/// shapes; [`normalize_analysis`] flattens whatever arrives into plain
/// lists so storage and API responses stay uniform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAnalysis {
    pub summary: String,
    pub entities: Vec<String>,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn analysis_user_prompt(document_text: &str, max_chars: usize) -> String {
    let truncated = truncate_chars(document_text, max_chars);
    format!(
        "Analyze the following legal document and provide:\n\
         1. A brief summary of the document\n\
         2. Key entities mentioned (people, organizations, dates, etc.)\n\
         3. Potential legal risks or issues\n\
         4. Legal recommendations\n\n\
         Document:\n\
         {truncated}\n\n\
         Format your response as a structured JSON object with the following keys:\n\
         \"summary\", \"entities\", \"risks\", \"recommendations\""
    )
}

/// Flatten a model-produced field into a list of strings. Accepts either a
/// plain array or a category map whose values are items or item lists;
/// map entries are rendered as `category: item`.
fn flatten_field(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
        Some(Value::Object(map)) => {
            let mut flattened = Vec::new();
            for (category, items) in map {
                match items {
                    Value::Array(inner) => {
                        flattened.extend(inner.iter().map(value_to_string));
                    }
                    other => flattened.push(format!("{category}: {}", value_to_string(other))),
                }
            }
            flattened
        }
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn normalize_analysis(raw: &Value) -> DocumentAnalysis {
    let summary = raw
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    DocumentAnalysis {
        summary,
        entities: flatten_field(raw, "entities"),
        risk_factors: flatten_field(raw, "risks"),
        recommendations: flatten_field(raw, "recommendations"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_plain_lists() {
        let raw = json!({
            "summary": "A mutual NDA.",
            "entities": ["Acme Corp", "Beta LLC"],
            "risks": ["Broad confidentiality definition"],
            "recommendations": ["Add a term limit"]
        });

        let analysis = normalize_analysis(&raw);
        assert_eq!(analysis.summary, "A mutual NDA.");
        assert_eq!(analysis.entities, vec!["Acme Corp", "Beta LLC"]);
        assert_eq!(analysis.risk_factors, vec!["Broad confidentiality definition"]);
        assert_eq!(analysis.recommendations, vec!["Add a term limit"]);
    }

    #[test]
    fn flattens_category_maps() {
        let raw = json!({
            "summary": "Lease agreement.",
            "entities": {
                "organizations": ["Landlord Inc"],
                "dates": ["January 1, 2030"]
            },
            "risks": {
                "financial": "Uncapped liability"
            },
            "recommendations": []
        });

        let analysis = normalize_analysis(&raw);
        assert!(analysis.entities.contains(&"Landlord Inc".to_string()));
        assert!(analysis.entities.contains(&"January 1, 2030".to_string()));
        assert_eq!(analysis.risk_factors, vec!["financial: Uncapped liability"]);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn tolerates_missing_and_odd_shapes() {
        let raw = json!({
            "summary": 42,
            "entities": "just one entity",
            "risks": [1, 2]
        });

        let analysis = normalize_analysis(&raw);
        assert!(analysis.summary.is_empty(), "non-string summary reads as empty");
        assert_eq!(analysis.entities, vec!["just one entity"]);
        assert_eq!(analysis.risk_factors, vec!["1", "2"]);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn analysis_prompt_truncates_long_documents() {
        let text = "clause ".repeat(10_000);
        let prompt = analysis_user_prompt(&text, 100);
        assert!(prompt.contains("...[truncated]"));
        assert!(prompt.contains("\"summary\""));
    }
}
