//! Pull a structured JSON payload out of free-form model output.
//!
//! Models wrap JSON in prose or code fences. These helpers return the first
//! balanced `[...]` or `{...}` substring, skipping brackets that appear inside
//! string literals.

/// First balanced JSON array in `text`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, '[', ']')
}

/// First balanced JSON object in `text`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, '{', '}')
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(open) {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..], open, close) {
            return Some(&text[start..start + end]);
        }
        search_from = start + open.len_utf8();
    }
    None
}

/// Byte length of the balanced region starting at `text[0] == open`.
fn balanced_end(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(idx + ch.len_utf8());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_array_from_fenced_prose() {
        let text = "Here is the plan:\n```json\n[{\"id\": \"step_1\"}]\n```\nGood luck.";
        assert_eq!(extract_json_array(text), Some("[{\"id\": \"step_1\"}]"));
    }

    #[test]
    fn test_ignores_brackets_inside_strings() {
        let text = r#"{"passed": false, "feedback": "missing } brace"} trailing {"x": 1}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"passed": false, "feedback": "missing } brace"}"#)
        );
    }

    #[test]
    fn test_nested_array() {
        let text = r#"noise [ {"dependencies": ["a", "b"]} ] more ]"#;
        assert_eq!(
            extract_json_array(text),
            Some(r#"[ {"dependencies": ["a", "b"]} ]"#)
        );
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(extract_json_object("{\"passed\": true"), None);
        assert_eq!(extract_json_array("no payload here"), None);
    }
}
