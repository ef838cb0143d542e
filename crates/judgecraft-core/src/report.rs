use judgecraft_types::{BatchResult, EnrichedRow, RowSchema, Trace};

/// Self-contained HTML page with the batch summary, each row's verdicts and
/// its call traces.
pub fn generate_html_report(result: &BatchResult) -> String {
    let mut rows = String::new();
    for (idx, er) in result.rows.iter().enumerate() {
        rows.push_str(&render_row(idx, er, &result.schema));
    }

    let mut criteria_html = String::new();
    for c in &result.summary.criteria {
        criteria_html.push_str(&format!(
            r#"
            <div class="summary-item">
                <div class="summary-label">{}</div>
                <div class="summary-value {}">{:.1}%</div>
            </div>"#,
            html_escape(&c.criterion),
            rate_class(c.pass_rate),
            c.pass_rate * 100.0
        ));
    }
    let failed_runs: usize = result.summary.criteria.iter().map(|c| c.failed_runs).sum();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Judgecraft Report</title>
    <style>
        * {{ box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1400px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }}
        h1 {{
            margin: 0 0 10px 0;
            color: #333;
        }}
        .summary {{
            display: flex;
            gap: 20px;
            margin: 20px 0 30px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 6px;
        }}
        .summary-item {{
            flex: 1;
        }}
        .summary-label {{
            font-size: 12px;
            color: #666;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 5px;
        }}
        .summary-value {{
            font-size: 28px;
            font-weight: 600;
            color: #333;
        }}
        .summary-value.good {{ color: #28a745; }}
        .summary-value.warn {{ color: #ffc107; }}
        .summary-value.bad {{ color: #dc3545; }}
        table {{
            width: 100%;
            border-collapse: collapse;
            margin-top: 20px;
        }}
        th {{
            background: #343a40;
            color: white;
            padding: 12px;
            text-align: left;
            font-weight: 600;
            font-size: 13px;
            text-transform: uppercase;
            letter-spacing: 0.5px;
        }}
        td {{
            padding: 12px;
            border-bottom: 1px solid #dee2e6;
            vertical-align: top;
        }}
        tr.pass {{ background: #f0f9f4; }}
        tr.fail {{ background: #fef3f2; }}
        tr:hover {{ background: #e9ecef; }}
        .icon {{
            text-align: center;
            font-size: 18px;
            width: 50px;
        }}
        .avg-score {{
            font-weight: 600;
            color: #495057;
        }}
        pre {{
            margin: 0;
            padding: 8px;
            background: #f8f9fa;
            border-radius: 4px;
            font-size: 12px;
            max-height: 150px;
            overflow: auto;
            white-space: pre-wrap;
            word-break: break-word;
        }}
        .badge {{
            padding: 4px 8px;
            border-radius: 4px;
            font-size: 11px;
            font-weight: 600;
            white-space: nowrap;
        }}
        .badge.pass {{
            background: #d4edda;
            color: #155724;
        }}
        .badge.fail {{
            background: #f8d7da;
            color: #721c24;
        }}
        .verdict {{
            margin-bottom: 8px;
        }}
        .verdict .reason {{
            font-size: 12px;
            color: #495057;
            margin-top: 4px;
        }}
        .edges {{
            margin: 4px 0 0 0;
            padding-left: 18px;
            font-size: 11px;
            color: #6c757d;
        }}
        .timestamp {{
            color: #6c757d;
            font-size: 14px;
            margin-bottom: 20px;
        }}
        .trace-row {{
            border-bottom: none !important;
        }}
        .trace-row td {{
            padding: 0 12px 12px 12px !important;
            border-bottom: 1px solid #dee2e6;
        }}
        .trace-toggle {{
            background: #007bff;
            color: white;
            border: none;
            padding: 6px 12px;
            border-radius: 4px;
            cursor: pointer;
            font-size: 12px;
            font-weight: 600;
            transition: background 0.2s;
        }}
        .trace-toggle:hover {{
            background: #0056b3;
        }}
        .trace-container {{
            margin-top: 12px;
            padding: 12px;
            background: #f8f9fa;
            border-radius: 6px;
            border-left: 3px solid #007bff;
        }}
        .trace-item {{
            margin-bottom: 16px;
            padding: 12px;
            background: white;
            border-radius: 4px;
            border: 1px solid #e9ecef;
        }}
        .trace-item:last-child {{
            margin-bottom: 0;
        }}
        .trace-header {{
            display: flex;
            justify-content: space-between;
            align-items: center;
            margin-bottom: 8px;
            padding-bottom: 8px;
            border-bottom: 1px solid #e9ecef;
        }}
        .trace-meta {{
            font-size: 12px;
            color: #6c757d;
        }}
        .trace-usage {{
            font-size: 12px;
            color: #495057;
            margin-bottom: 12px;
            font-weight: 500;
        }}
        .trace-details {{
            display: grid;
            grid-template-columns: 1fr 1fr;
            gap: 12px;
        }}
        .trace-section {{
            background: #f8f9fa;
            padding: 8px;
            border-radius: 4px;
        }}
        .trace-section strong {{
            display: block;
            margin-bottom: 6px;
            font-size: 11px;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            color: #6c757d;
        }}
        .trace-section pre {{
            margin: 0;
            max-height: 200px;
            font-size: 11px;
        }}
    </style>
    <script>
        function toggleTraces(id) {{
            const element = document.getElementById(id);
            if (element.style.display === 'none') {{
                element.style.display = 'block';
            }} else {{
                element.style.display = 'none';
            }}
        }}
    </script>
</head>
<body>
    <div class="container">
        <h1>Judgecraft Report</h1>
        <div class="timestamp">Generated: {}</div>

        <div class="summary">
            <div class="summary-item">
                <div class="summary-label">Total Rows</div>
                <div class="summary-value">{}</div>
            </div>{}
            <div class="summary-item">
                <div class="summary-label">Failed Runs</div>
                <div class="summary-value {}">{}</div>
            </div>
        </div>

        <table>
            <thead>
                <tr>
                    <th>ID</th>
                    <th>Status</th>
                    <th>Avg Grade</th>
                    <th>Text</th>
                    <th>Verdicts</th>
                </tr>
            </thead>
            <tbody>
                {}
            </tbody>
        </table>
    </div>
</body>
</html>"#,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        result.summary.total_rows,
        criteria_html,
        if failed_runs == 0 { "good" } else { "bad" },
        failed_runs,
        rows
    )
}

fn rate_class(rate: f64) -> &'static str {
    if rate >= 0.8 {
        "good"
    } else if rate >= 0.5 {
        "warn"
    } else {
        "bad"
    }
}

fn render_row(idx: usize, er: &EnrichedRow, schema: &RowSchema) -> String {
    let id = er.row.id_label(schema);
    let all_passed = !er.evaluations.is_empty() && er.evaluations.values().all(|r| r.grade == 1);
    let passed_icon = if all_passed { "✓" } else { "✗" };
    let row_class = if all_passed { "pass" } else { "fail" };
    let avg = if er.evaluations.is_empty() {
        0.0
    } else {
        let sum: u32 = er.evaluations.values().map(|r| u32::from(r.grade)).sum();
        sum as f64 / er.evaluations.len() as f64
    };

    let mut verdicts_html = String::new();
    for (criterion, record) in &er.evaluations {
        let class = if record.grade == 1 { "pass" } else { "fail" };
        let edges: String = record
            .graph
            .edges
            .iter()
            .map(|e| {
                format!(
                    "<li>{} &rarr; {} <em>({})</em></li>",
                    html_escape(&e.source),
                    html_escape(&e.target),
                    html_escape(&e.relationship)
                )
            })
            .collect();
        let edges_html = if edges.is_empty() { String::new() } else { format!(r#"<ul class="edges">{edges}</ul>"#) };
        verdicts_html.push_str(&format!(
            r#"<div class="verdict"><span class="badge {}">{}: {}</span><div class="reason">{}</div>{}</div>"#,
            class,
            html_escape(criterion),
            record.grade,
            html_escape(&record.reason),
            edges_html
        ));
    }

    let traces: Vec<(&str, &Trace)> = er
        .traces
        .iter()
        .flat_map(|(criterion, ts)| ts.iter().map(move |t| (criterion.as_str(), t)))
        .collect();
    let traces_html = if traces.is_empty() {
        String::new()
    } else {
        let mut content = String::new();
        for (i, (criterion, trace)) in traces.iter().enumerate() {
            content.push_str(&render_trace(i, criterion, trace));
        }
        format!(
            r#"<button class="trace-toggle" onclick="toggleTraces('trace-{idx}')">{} trace(s)</button>
                <div id="trace-{idx}" class="trace-container" style="display: none;">{}</div>"#,
            traces.len(),
            content
        )
    };

    format!(
        r#"
            <tr class="{}">
                <td>{}</td>
                <td class="icon">{}</td>
                <td class="avg-score">{:.3}</td>
                <td><pre>{}</pre></td>
                <td>{}</td>
            </tr>
            <tr class="trace-row {}">
                <td colspan="5">{}</td>
            </tr>
            "#,
        row_class,
        html_escape(&id),
        passed_icon,
        avg,
        html_escape(&er.row.text(schema)),
        verdicts_html,
        row_class,
        traces_html
    )
}

fn render_trace(i: usize, criterion: &str, trace: &Trace) -> String {
    let duration = trace.duration_ms.map(|d| format!("{}ms", d)).unwrap_or_else(|| "-".to_string());
    let usage_str = match &trace.usage {
        Some(usage) => format!(
            "{} in / {} out / {} total tokens",
            usage.input_tokens, usage.output_tokens, usage.total_tokens
        ),
        None => String::new(),
    };
    let request = serde_json::to_string_pretty(&trace.request).unwrap_or_default();
    let response = match &trace.error {
        Some(error) => format!("error: {error}"),
        None => serde_json::to_string_pretty(&trace.response).unwrap_or_default(),
    };

    format!(
        r#"
                    <div class="trace-item">
                        <div class="trace-header">
                            <strong>#{} {} ({:?})</strong>
                            <span class="trace-meta">{} • {}</span>
                        </div>
                        <div class="trace-usage">{}</div>
                        <div class="trace-details">
                            <div class="trace-section">
                                <strong>Request:</strong>
                                <pre>{}</pre>
                            </div>
                            <div class="trace-section">
                                <strong>Response:</strong>
                                <pre>{}</pre>
                            </div>
                        </div>
                    </div>
                    "#,
        i + 1,
        html_escape(criterion),
        trace.kind,
        html_escape(&trace.model),
        duration,
        usage_str,
        html_escape(&request),
        html_escape(&response)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgecraft_types::{AgentRunRecord, CallKind, GraphEdge, Row};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn report_lists_verdicts_and_escapes_text() {
        let row = Row::from_value(json!({"id": "a<1>", "Answer": "x & y"})).unwrap();
        let mut record = AgentRunRecord::errored("timeout");
        record.graph.edges.push(GraphEdge {
            source: "sun".into(),
            target: "cold".into(),
            relationship: "IS".into(),
        });
        let mut evaluations = BTreeMap::new();
        evaluations.insert("Accuracy".to_string(), record);
        let mut traces = BTreeMap::new();
        traces.insert(
            "Accuracy".to_string(),
            vec![Trace::start(CallKind::Judgment, "judge-model").finish(json!({"p": 1}), json!("ok"), None)],
        );
        let rows = vec![EnrichedRow { row, evaluations, traces }];
        let summary = BatchResult::summarize(&rows, &["Accuracy".to_string()]);
        let result = BatchResult { schema: RowSchema::default(), rows, summary };

        let html = generate_html_report(&result);
        assert!(html.contains("a&lt;1&gt;"));
        assert!(html.contains("x &amp; y"));
        assert!(html.contains("Accuracy: 0"));
        assert!(html.contains("Error: timeout"));
        assert!(html.contains("sun &rarr; cold"));
        assert!(html.contains("1 trace(s)"));
        assert!(html.contains("judge-model"));
        assert!(html.contains("Failed Runs"));
    }

    #[test]
    fn stylesheet_only_styles_emitted_classes() {
        let row = Row::from_value(json!({"id": 1, "Answer": "a"})).unwrap();
        let mut record = AgentRunRecord::errored("timeout");
        record.graph.edges.push(GraphEdge {
            source: "a".into(),
            target: "b".into(),
            relationship: "IS".into(),
        });
        let evaluations = BTreeMap::from([("Accuracy".to_string(), record)]);
        let traces = BTreeMap::from([(
            "Accuracy".to_string(),
            vec![Trace::start(CallKind::Chat, "m").finish(json!({}), json!({}), None)],
        )]);
        let rows = vec![EnrichedRow { row, evaluations, traces }];
        let summary = BatchResult::summarize(&rows, &["Accuracy".to_string()]);
        let html = generate_html_report(&BatchResult { schema: RowSchema::default(), rows, summary });

        let (head, body) = html.split_once("</style>").unwrap();
        let style = head.split_once("<style>").unwrap().1;
        let selector = regex::Regex::new(r"\.([a-z][a-z-]*)").unwrap();
        // state modifiers are picked per row and per rate
        let modifiers = ["pass", "fail", "good", "warn", "bad"];
        for class in selector.captures_iter(style).map(|c| c[1].to_string()) {
            if modifiers.contains(&class.as_str()) {
                continue;
            }
            assert!(body.contains(&class), "unused selector .{class}");
        }
    }
}
