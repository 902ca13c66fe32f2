//! Caller-facing output built from a [`RunResult`].
use serde_json::{json, Value};

use crate::model::{OutputShape, RunResult};
use crate::reconcile::unique_strings;

/// Room kept for the truncation marker.
const MARKER_RESERVE: usize = 64;

/// Trace lines followed by an `[errors]` section, bounded to `max_chars`.
///
/// Over budget, the middle of the trace is cut; the error section is kept whole
/// when it fits, otherwise only the most recent errors survive.
pub fn render_log(result: &RunResult, max_chars: usize) -> String {
    let trace = result.log_lines.join("\n");
    let errors: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
    let tail = if errors.is_empty() {
        String::new()
    } else {
        format!("\n[errors]\n{}", errors.join("\n"))
    };

    let trace_len = trace.chars().count();
    let tail_len = tail.chars().count();
    if trace_len + tail_len <= max_chars {
        return format!("{}{}", trace, tail);
    }

    if tail_len + MARKER_RESERVE >= max_chars {
        return recent_errors(&errors, max_chars);
    }

    let available = max_chars - tail_len - MARKER_RESERVE;
    let head_len = available / 2;
    let end_len = available - head_len;
    let chars: Vec<char> = trace.chars().collect();
    let head: String = chars[..head_len].iter().collect();
    let end: String = chars[trace_len - end_len..].iter().collect();
    let dropped = trace_len - head_len - end_len;
    format!(
        "{}\n... [{} chars truncated] ...\n{}{}",
        head, dropped, end, tail
    )
}

fn recent_errors(errors: &[String], max_chars: usize) -> String {
    let budget = max_chars.saturating_sub(MARKER_RESERVE);
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0;
    for line in errors.iter().rev() {
        let len = line.chars().count() + 1;
        if used + len > budget {
            break;
        }
        used += len;
        kept.push(line);
    }
    kept.reverse();
    let dropped = errors.len() - kept.len();
    let mut out = String::from("[errors]");
    if dropped > 0 {
        out.push_str(&format!("\n... [{} earlier errors dropped] ...", dropped));
    }
    for line in kept {
        out.push('\n');
        out.push_str(line);
    }
    out
}

pub fn render_output(result: &RunResult, shape: OutputShape, max_chars: usize) -> Value {
    let log = render_log(result, max_chars);
    match shape {
        OutputShape::Legacy => {
            let photo_ids = unique_strings(result.updated_ids.iter().chain(result.created_ids.iter()));
            json!({
                "createdPhotoIds": result.created_ids,
                "updatedPhotoIds": result.updated_ids,
                "photoIds": photo_ids,
                "log": log,
            })
        }
        OutputShape::Toolbox => json!({
            "output1": log,
            "outputlist1": result.created_ids,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorKind, RunError};

    fn result_with(lines: usize, errors: usize) -> RunResult {
        let mut r = RunResult::new("run");
        for i in 0..lines {
            r.log_lines.push(format!("[item {}] some trace line with detail", i));
        }
        for i in 0..errors {
            r.errors.push(RunError {
                kind: ErrorKind::UploadError,
                item: Some(i),
                message: format!("failure number {}", i),
            });
        }
        r
    }

    #[test]
    fn short_log_is_untouched() {
        let r = result_with(2, 1);
        let log = render_log(&r, 10_000);
        assert!(log.starts_with("[item 0]"));
        assert!(log.ends_with("[UploadError] item 0: failure number 0"));
        assert!(!log.contains("truncated"));
    }

    #[test]
    fn long_trace_is_cut_in_the_middle_and_errors_survive() {
        let r = result_with(500, 3);
        let log = render_log(&r, 2_000);
        assert!(log.chars().count() <= 2_000);
        assert!(log.starts_with("[item 0]"));
        assert!(log.contains("chars truncated"));
        assert!(log.contains("[item 499]"));
        for i in 0..3 {
            assert!(log.contains(&format!("failure number {}", i)));
        }
    }

    #[test]
    fn oversized_error_list_keeps_most_recent() {
        let r = result_with(10, 200);
        let log = render_log(&r, 500);
        assert!(log.chars().count() <= 500);
        assert!(log.contains("failure number 199"));
        assert!(!log.contains("failure number 0\n"));
        assert!(log.contains("earlier errors dropped"));
    }

    #[test]
    fn legacy_shape_dedups_photo_ids() {
        let mut r = RunResult::new("run");
        r.created_ids = vec!["c1".into()];
        r.updated_ids = vec!["u1".into(), "c1".into()];
        let out = render_output(&r, OutputShape::Legacy, 1_000);
        assert_eq!(out["photoIds"], json!(["u1", "c1"]));
        assert_eq!(out["createdPhotoIds"], json!(["c1"]));
        assert!(out["log"].is_string());
    }

    #[test]
    fn toolbox_shape() {
        let mut r = RunResult::new("run");
        r.created_ids = vec!["c1".into(), "c2".into()];
        r.log_lines.push("[done]".into());
        let out = render_output(&r, OutputShape::Toolbox, 1_000);
        assert_eq!(out["outputlist1"], json!(["c1", "c2"]));
        assert_eq!(out["output1"], "[done]");
        assert!(out.get("log").is_none());
    }
}
