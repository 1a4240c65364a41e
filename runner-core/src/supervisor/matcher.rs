//! Line matching and message template rendering.

use regex::Captures;
use std::collections::HashMap;

/// Resolves `{match}`, `{g1..gn}`, and named capture groups against a
/// regex match. `names` is the compiled pattern's `capture_names()`,
/// positionally aligned with `caps`. On any unresolvable placeholder the
/// raw template is returned unchanged — the rendering contract never
/// partially expands.
pub fn render_template(
    template: &str,
    full_match: &str,
    caps: &Captures,
    names: &[Option<&str>],
) -> String {
    let groups: Vec<Option<&str>> = (1..caps.len())
        .filter(|&i| names.get(i).copied().flatten().is_none())
        .map(|i| caps.get(i).map(|m| m.as_str()))
        .collect();
    let mut named: HashMap<&str, &str> = HashMap::new();
    for name in names.iter().flatten() {
        if let Some(m) = caps.name(name) {
            named.insert(name, m.as_str());
        }
    }

    let lookup = |key: &str| -> Option<String> {
        if key == "match" {
            return Some(full_match.to_string());
        }
        if let Some(rest) = key.strip_prefix('g') {
            if let Ok(idx) = rest.parse::<usize>() {
                if idx >= 1 {
                    return groups.get(idx - 1).copied().flatten().map(str::to_string);
                }
            }
        }
        named.get(key).map(|s| s.to_string())
    };

    render_with(template, lookup)
}

fn render_with(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find('{') {
            None => {
                out.push_str(rest);
                return out;
            }
            Some(start) => {
                let before = &rest[..start];
                let after_open = &rest[start + 1..];
                match after_open.find('}') {
                    None => return template.to_string(),
                    Some(end) => {
                        let key = &after_open[..end];
                        match lookup(key) {
                            Some(value) => {
                                out.push_str(before);
                                out.push_str(&value);
                                rest = &after_open[end + 1..];
                            }
                            None => return template.to_string(),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn renders_numbered_groups_and_names() {
        let re = Regex::new(r"(?P<name>\w+)-(\w+)").unwrap();
        let caps = re.captures("a-b").unwrap();
        let names: Vec<Option<&str>> = re.capture_names().collect();
        let rendered = render_template("{g1}/{name}", "a-b", &caps, &names);
        assert_eq!(rendered, "b/a");
    }

    #[test]
    fn falls_back_to_raw_template_on_missing_group() {
        let re = Regex::new(r"(\w+)").unwrap();
        let caps = re.captures("a").unwrap();
        let names: Vec<Option<&str>> = re.capture_names().collect();
        let rendered = render_template("{g2} missing", "a", &caps, &names);
        assert_eq!(rendered, "{g2} missing");
    }

    #[test]
    fn match_placeholder_is_full_match() {
        let re = Regex::new(r"OK").unwrap();
        let caps = re.captures("OK").unwrap();
        let names: Vec<Option<&str>> = re.capture_names().collect();
        let rendered = render_template("up: {match}", "OK", &caps, &names);
        assert_eq!(rendered, "up: OK");
    }
}
