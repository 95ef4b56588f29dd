use loro::{LoroDoc, ToJson};
use serde_json::Value;

const MAX_DEPTH: usize = 100; // Prevent stack overflow

/// Plain-text projection of a document: every string leaf of the deep value,
/// in container order, one per line. Empty strings are skipped.
pub fn plain_text(loro_doc: &LoroDoc) -> String {
    let json = loro_doc.get_deep_value().to_json_value();
    let mut lines = Vec::new();
    collect_text(&json, &mut lines, 0);
    lines.join("\n")
}

fn collect_text(value: &Value, lines: &mut Vec<String>, depth: usize) {
    if depth >= MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) if !s.is_empty() => lines.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_text(item, lines, depth + 1);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_text(item, lines, depth + 1);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_text_and_nested_strings() {
        let doc = LoroDoc::new();
        doc.get_text("body").insert(0, "Hello world").unwrap();
        let meta = doc.get_map("meta");
        meta.insert("title", "Draft").unwrap();
        meta.insert("pages", 3).unwrap();
        doc.commit();

        let text = plain_text(&doc);
        assert!(text.contains("Hello world"));
        assert!(text.contains("Draft"));
        assert!(!text.contains('3'));
    }

    #[test]
    fn empty_document_projects_to_empty_string() {
        assert_eq!(plain_text(&LoroDoc::new()), "");
    }
}
