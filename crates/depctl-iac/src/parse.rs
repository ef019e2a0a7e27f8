use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub add: u32,
    pub change: u32,
    pub destroy: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    pub identifier: Option<String>,
}

fn add_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) to add").unwrap())
}
fn change_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) to change").unwrap())
}
fn destroy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) to destroy").unwrap())
}

/// First match of each of `(\d+) to add/change/destroy`; missing counts are 0.
pub fn parse_change_counts(text: &str) -> ChangeCounts {
    let count = |re: &Regex| {
        re.captures(text).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
    };
    ChangeCounts { add: count(add_re()), change: count(change_re()), destroy: count(destroy_re()) }
}

fn plan_created_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"will be created[\s\S]*?(\w+)_(\w+)\.(\w+)").unwrap())
}

/// `will be created[\s\S]*?<provider>_(\w+)\.(\w+)`, in order of first
/// occurrence, de-duplicated by `{type,name}`.
pub fn parse_created_resources_plan(text: &str) -> Vec<ResourceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(caps) = plan_created_re().captures(rest) {
        let provider = &caps[1];
        let resource_kind = &caps[2];
        let name = &caps[3];
        let type_ = format!("{provider}_{resource_kind}");
        let key = (type_.clone(), name.to_string());
        let end = caps.get(0).unwrap().end();
        if seen.insert(key) {
            out.push(ResourceRef { type_, name: name.to_string(), identifier: None });
        }
        rest = &rest[end..];
    }
    out
}

fn apply_created_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+)_(\w+)\.(\w+)[^\n]*\screated").unwrap())
}
fn apply_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Apply complete!.*?(\d+)\s+(?:resources?\s+)?added").unwrap())
}
fn arn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"arn:[a-zA-Z0-9:/_.\-]+").unwrap())
}
fn id_name_arn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\b(?:id|name|arn)[=:]\"?([^"\s]+)"#).unwrap())
}

/// First of an `arn:...` token or an `id|name|arn[=:]"?(...)"?` capture on
/// the same line.
pub fn parse_resource_identifier(line: &str) -> Option<String> {
    if let Some(m) = arn_re().find(line) {
        return Some(m.as_str().to_string());
    }
    id_name_arn_re().captures(line).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

/// Per-line `<provider>_(\w+)\.(\w+) created`; if the terminal
/// `Apply complete! ... N resources added` summary names more resources than
/// were parsed from individual lines, pad with placeholder entries so the
/// count matches what Terraform reports.
pub fn parse_created_resources_apply(text: &str) -> Vec<ResourceRef> {
    let mut out = Vec::new();
    for line in text.lines() {
        if let Some(caps) = apply_created_line_re().captures(line) {
            let provider = &caps[1];
            let resource_kind = &caps[2];
            let name = &caps[3];
            out.push(ResourceRef {
                type_: format!("{provider}_{resource_kind}"),
                name: name.to_string(),
                identifier: parse_resource_identifier(line),
            });
        }
    }

    if let Some(caps) = apply_summary_re().captures(text) {
        if let Ok(reported) = caps[1].parse::<usize>() {
            while out.len() < reported {
                out.push(ResourceRef {
                    type_: "unknown".to_string(),
                    name: format!("placeholder_{}", out.len()),
                    identifier: None,
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_counts_default_to_zero_when_absent() {
        let counts = parse_change_counts("Plan: 0 to add");
        assert_eq!(counts, ChangeCounts { add: 0, change: 0, destroy: 0 });
    }

    #[test]
    fn change_counts_parse_all_three() {
        let counts = parse_change_counts("Plan: 2 to add, 1 to change, 3 to destroy.");
        assert_eq!(counts, ChangeCounts { add: 2, change: 1, destroy: 3 });
    }

    #[test]
    fn plan_created_resources_are_deduplicated_in_order() {
        let text = "# web will be created\naws_instance.web\n# data will be created\naws_s3_bucket.data\n";
        let resources = parse_created_resources_plan(text);
        let names: Vec<_> = resources.iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["web".to_string(), "data".to_string()]);
    }

    #[test]
    fn apply_created_lines_extract_identifier() {
        let text = "aws_instance.web created id=i-0123456789";
        let resources = parse_created_resources_apply(text);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].identifier.as_deref(), Some("i-0123456789"));
    }

    #[test]
    fn apply_summary_pads_to_reported_count() {
        let text = "aws_instance.web created\n\nApply complete! Resources: 3 resources added, 0 changed, 0 destroyed.";
        let resources = parse_created_resources_apply(text);
        assert_eq!(resources.len(), 3);
    }

    #[test]
    fn resource_identifier_prefers_arn() {
        let line = "bucket id=my-bucket arn:aws:s3:::my-bucket";
        assert_eq!(parse_resource_identifier(line).as_deref(), Some("arn:aws:s3:::my-bucket"));
    }
}
