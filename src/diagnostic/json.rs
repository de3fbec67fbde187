use super::{Diagnostic, Severity};
use crate::listing::SourceMap;

pub fn render(d: &Diagnostic) -> String {
    let severity = match d.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };

    let source_map = d.source.as_deref().map(SourceMap::new);

    let labels: Vec<serde_json::Value> = d
        .labels
        .iter()
        .map(|l| {
            let mut obj = serde_json::json!({
                "start": l.span.start,
                "end": l.span.end,
                "message": l.message,
                "primary": l.is_primary,
            });
            if let Some(map) = &source_map {
                let (line, col) = map.lookup(l.span.start);
                obj["line"] = serde_json::Value::from(line);
                obj["col"] = serde_json::Value::from(col);
            }
            obj
        })
        .collect();

    let mut obj = serde_json::json!({
        "severity": severity,
        "message": d.message,
        "labels": labels,
        "notes": d.notes,
        "internal": d.is_internal(),
    });

    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj).unwrap_or_else(|_| {
        r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let v = parse_json(&render(&Diagnostic::error("stack underflow").with_code("ZOE-R001")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "stack underflow");
        assert_eq!(v["code"], "ZOE-R001");
        assert_eq!(v["internal"], false);
        assert!(v["labels"].as_array().unwrap().is_empty());
    }

    #[test]
    fn render_with_span_and_source() {
        let d = Diagnostic::error("unknown mnemonic 'FROB'")
            .with_span(Span { start: 5, end: 9 }, "here")
            .with_source("PNIL\nFROB 1");
        let v = parse_json(&render(&d));
        let label = &v["labels"][0];
        assert_eq!(label["start"], 5);
        assert_eq!(label["end"], 9);
        assert_eq!(label["primary"], true);
        assert_eq!(label["line"], 2);
        assert_eq!(label["col"], 1);
    }

    #[test]
    fn render_optional_fields() {
        let v = parse_json(&render(&Diagnostic::error("bad")));
        assert!(v.get("suggestion").is_none());
        assert!(v.get("code").is_none());

        let d = Diagnostic::error("bad").with_suggestion("try this").with_note("a").with_note("b");
        let v = parse_json(&render(&d));
        assert_eq!(v["suggestion"], "try this");
        assert_eq!(v["notes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn render_label_without_source_no_line_col() {
        let d = Diagnostic::error("bad").with_span(Span { start: 5, end: 8 }, "here");
        let v = parse_json(&render(&d));
        assert!(v["labels"][0].get("line").is_none());
    }

    #[test]
    fn render_secondary_and_internal() {
        let d = Diagnostic::error("label handle from another assembler")
            .with_code("ZOE-I002")
            .with_span(Span { start: 0, end: 2 }, "first")
            .with_secondary_span(Span { start: 4, end: 6 }, "second")
            .with_source("a:\na:");
        let v = parse_json(&render(&d));
        assert_eq!(v["labels"][1]["primary"], false);
        assert_eq!(v["internal"], true);
    }

    #[test]
    fn render_warning_severity() {
        let v = parse_json(&render(&Diagnostic::warning("unused label")));
        assert_eq!(v["severity"], "warning");
    }
}
