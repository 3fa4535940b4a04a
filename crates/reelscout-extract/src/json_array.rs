//! Recovering a JSON array from free-form model output.

use serde_json::Value as JsonValue;

/// Drop markdown fence lines (```` ``` ```` / ```` ```json ````) wherever they appear.
pub fn strip_code_fences(response: &str) -> String {
    response
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Candidate array slices, earliest `[` first and, for each, the widest closing `]` first.
///
/// Model replies often echo bracketed fragment labels (`[3]`) before the real array, so the
/// first-open-to-last-close slice alone is not enough.
pub fn array_regions(text: &str) -> impl Iterator<Item = &str> + '_ {
    let opens = text.match_indices('[').map(|(i, _)| i).collect::<Vec<_>>();
    let closes = text.match_indices(']').map(|(i, _)| i).collect::<Vec<_>>();
    opens.into_iter().flat_map(move |start| {
        closes
            .clone()
            .into_iter()
            .rev()
            .filter(move |&end| end > start)
            .map(move |end| &text[start..=end])
    })
}

/// Remove commas directly preceding `]` or `}`, leaving string contents untouched.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Fence stripping, array-region detection and trailing-comma repair, then parse.
/// `None` when nothing parses or the parsed value is not an array.
pub fn extract_json_array(response: &str) -> Option<Vec<JsonValue>> {
    let unfenced = strip_code_fences(response);
    let found = array_regions(&unfenced).find_map(|region| {
        match serde_json::from_str::<JsonValue>(&strip_trailing_commas(region)) {
            Ok(JsonValue::Array(items)) => Some(items),
            _ => None,
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_removed() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("[]"), "[]");
        assert_eq!(strip_code_fences("Sure!\n```json\n[2]\n```\nDone"), "Sure!\n[2]\nDone");
    }

    #[test]
    fn widest_region_is_tried_first() {
        let mut regions = array_regions("Here you go: [{\"a\": [1]}] hope it helps");
        assert_eq!(regions.next(), Some("[{\"a\": [1]}]"));
        assert_eq!(array_regions("no array here").next(), None);
        assert_eq!(array_regions("] backwards [").next(), None);
    }

    #[test]
    fn fragment_labels_before_the_array_are_skipped() {
        let items = extract_json_array(
            "Fragment [3] mentions: [{\"title\": \"Heat\", \"fragment\": 3}]",
        )
        .expect("array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Heat");

        let items = extract_json_array("[{\"title\": \"Dark\"},] from fragment [2]").expect("array");
        assert_eq!(items[0]["title"], "Dark");
    }

    #[test]
    fn trailing_commas_are_repaired_outside_strings() {
        assert_eq!(strip_trailing_commas("[{\"title\":\"X\",}]"), "[{\"title\":\"X\"}]");
        assert_eq!(strip_trailing_commas("[1, 2,\n ]"), "[1, 2\n ]");
        assert_eq!(
            strip_trailing_commas("[\"Crouching Tiger, ]\",]"),
            "[\"Crouching Tiger, ]\"]"
        );
        assert_eq!(strip_trailing_commas("[\"a\\\",}\"]"), "[\"a\\\",}\"]");
    }

    #[test]
    fn fenced_array_with_trailing_comma_parses() {
        let items = extract_json_array("```json\n[{\"title\":\"X\",}]\n```").expect("array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "X");
    }

    #[test]
    fn non_array_and_garbage_yield_none() {
        assert!(extract_json_array("{\"title\": \"X\"}").is_none());
        assert!(extract_json_array("I could not find any titles.").is_none());
        assert!(extract_json_array("[not json at all]").is_none());
    }

    #[test]
    fn empty_array_is_some_and_empty() {
        assert_eq!(extract_json_array("[]"), Some(vec![]));
    }
}
