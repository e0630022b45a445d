//! A pure "parse line → points" helper, demonstrating the interface a
//! real `/proc`-reading collector would build on top of file I/O it
//! performs itself. This function never touches the filesystem.

use model::{DataPoint, TagSet};

const FIELDS: &[&str] = &[
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal", "guest", "guest_nice",
];

/// Parses a single aggregate line from `/proc/stat` (the line beginning with
/// `cpu` followed by whitespace, not a per-core line like `cpu0`) into one
/// counter `DataPoint` per field, named `cpu.<field>`.
///
/// Lines that aren't the aggregate `cpu` line, or that don't parse as
/// whitespace-separated integers, yield an empty list rather than an error:
/// this mirrors the pipeline's "skip, don't crash" handling of malformed
/// collector input.
pub fn parse_proc_stat_line(line: &str, timestamp: i64) -> Vec<DataPoint> {
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some("cpu") => {}
        _ => return Vec::new(),
    }

    fields
        .zip(FIELDS.iter())
        .filter_map(|(value, name)| {
            let value: i64 = value.parse().ok()?;
            DataPoint::new(format!("cpu.{name}"), timestamp, value, TagSet::new()).ok()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_aggregate_cpu_line() {
        let points = parse_proc_stat_line("cpu  1000 200 300 400 50 0 0 0 0 0", 1_700_000_000);
        assert_eq!(points.len(), 10);
        assert_eq!(points[0].metric, "cpu.user");
        assert_eq!(points[0].value, model::Value::Int(1000));
        assert_eq!(points[3].metric, "cpu.idle");
        assert_eq!(points[3].value, model::Value::Int(400));
    }

    #[test]
    fn ignores_per_core_lines() {
        assert!(parse_proc_stat_line("cpu0 1000 200 300 400", 0).is_empty());
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert!(parse_proc_stat_line("intr 12345 0 0 0", 0).is_empty());
    }

    #[test]
    fn tolerates_short_lines() {
        let points = parse_proc_stat_line("cpu  1000 200", 0);
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn tolerates_malformed_fields() {
        let points = parse_proc_stat_line("cpu  1000 notanumber 300", 0);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].metric, "cpu.system");
    }
}
