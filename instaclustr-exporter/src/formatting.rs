//! Helpers for rendering metrics in the Prometheus exposition format.

use crate::registry::LabelSet;

/// Writes a help (description) line in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_help_line(buffer: &mut String, name: &str, desc: &str) {
    buffer.push_str("# HELP ");
    buffer.push_str(name);
    buffer.push(' ');
    let desc = sanitize_description(desc);
    buffer.push_str(&desc);
    buffer.push('\n');
}

/// Writes a metric type line in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_type_line(buffer: &mut String, name: &str, metric_type: &str) {
    buffer.push_str("# TYPE ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a metric in the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn write_metric_line(buffer: &mut String, name: &str, labels: &LabelSet, value: f64) {
    buffer.push_str(name);

    if !labels.is_empty() {
        buffer.push('{');

        let mut first = true;
        for label in labels.to_strings() {
            if first {
                first = false;
            } else {
                buffer.push(',');
            }
            buffer.push_str(&label);
        }

        buffer.push('}');
    }

    buffer.push(' ');
    buffer.push_str(&format_value(value));
    buffer.push('\n');
}

/// Formats a sample value.
///
/// Finite values use the shortest representation that round-trips, so `1.0` is written as `1`
/// and `2.5884383` stays as is. Non-finite values use the spellings Prometheus expects.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

/// Sanitizes a label value to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_label_value(value: &str) -> String {
    sanitize_label_value_or_description(value, false)
}

/// Sanitizes a metric description to be valid under the Prometheus [exposition format].
///
/// [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
pub fn sanitize_description(value: &str) -> String {
    sanitize_label_value_or_description(value, true)
}

fn sanitize_label_value_or_description(value: &str, is_desc: bool) -> String {
    // All Unicode characters are valid, but backslashes, double quotes, and line feeds must be
    // escaped. Double quotes only need escaping inside label values.
    let mut sanitized = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '\n' => sanitized.push_str("\\n"),
            '"' if !is_desc => sanitized.push_str("\\\""),
            '\\' => sanitized.push_str("\\\\"),
            c => sanitized.push(c),
        }
    }

    sanitized
}
