//! Tenant datetime context injection (§4.1 "Datetime injection", §9
//! "Datetime context").
//!
//! A reusable helper that, given a tenant timezone and a pre-formatted
//! current datetime string, appends exactly one context block to a prompt —
//! idempotently, by checking for a marker substring first.

const MARKER: &str = "TENANT DATETIME CONTEXT";

/// Append a `TENANT DATETIME CONTEXT` block to `message` so a tool (most
/// commonly `datetime`) can resolve relative expressions like "this month"
/// against the tenant's own clock rather than the server's.
///
/// A no-op if `message` already contains the marker, so retrying or
/// re-planning never stacks the block twice.
pub fn inject_tenant_datetime(message: &str, timezone: &str, current_datetime: &str) -> String {
    if message.contains(MARKER) {
        return message.to_string();
    }
    format!(
        "{message}\n\n---\n{MARKER}\nTimezone: {timezone}\nCurrent datetime: {current_datetime}\n---"
    )
}

/// True if the named tool is the one §4.1 singles out for datetime context
/// injection.
pub fn tool_needs_datetime_context(tool_name: &str) -> bool {
    tool_name.eq_ignore_ascii_case("datetime")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_timezone_and_datetime_once() {
        let out = inject_tenant_datetime("What day is it this month?", "Asia/Ho_Chi_Minh", "2026-07-30T10:00:00+07:00");
        assert!(out.contains("TENANT DATETIME CONTEXT"));
        assert!(out.contains("Asia/Ho_Chi_Minh"));
        assert!(out.contains("2026-07-30T10:00:00+07:00"));
    }

    #[test]
    fn is_idempotent_when_marker_already_present() {
        let once = inject_tenant_datetime("q", "UTC", "now");
        let twice = inject_tenant_datetime(&once, "UTC", "now");
        assert_eq!(once, twice);
        assert_eq!(twice.matches("TENANT DATETIME CONTEXT").count(), 1);
    }

    #[test]
    fn datetime_tool_name_is_case_insensitive() {
        assert!(tool_needs_datetime_context("DateTime"));
        assert!(tool_needs_datetime_context("datetime"));
        assert!(!tool_needs_datetime_context("rag_tool"));
    }
}
