//! Built-in Tools
//!
//! Small arithmetic and calendar tools for demos and smoke tests. Each one is
//! described by [`HostMethod`] metadata and registered through the resolver
//! like any host tool.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::tool::{HostMethod, HostParameter, ToolArguments, ToolRegistry};

/// Register every built-in tool
pub fn register_all(registry: &mut ToolRegistry) -> Result<()> {
    register_math(registry)?;
    register_dates(registry)
}

// ============================================================================
// Math
// ============================================================================

fn binary(name: &str, description: &str) -> HostMethod {
    HostMethod::exposed(name, description)
        .param(HostParameter::new("a", "float", "The first number"))
        .param(HostParameter::new("b", "float", "The second number"))
}

/// `add`, `subtract`, `multiply` and `divide`
pub fn register_math(registry: &mut ToolRegistry) -> Result<()> {
    registry.register_method(&binary("add", "add two numbers together"), |args| {
        Ok(number(args.f64("a")? + args.f64("b")?))
    })?;
    registry.register_method(&binary("subtract", "subtract b from a"), |args| {
        Ok(number(args.f64("a")? - args.f64("b")?))
    })?;
    registry.register_method(&binary("multiply", "multiply two numbers"), |args| {
        Ok(number(args.f64("a")? * args.f64("b")?))
    })?;
    registry.register_method(&binary("divide", "divide a by b"), |args| {
        let divisor = args.f64("b")?;
        if divisor == 0.0 {
            return Err(AgentError::ToolExecution("Division by zero".into()));
        }
        Ok(number(args.f64("a")? / divisor))
    })?;
    Ok(())
}

/// Whole results render without a trailing `.0`
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ============================================================================
// Dates
// ============================================================================

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `current_date`, `compare_dates` and `date_falls_between_dates`
pub fn register_dates(registry: &mut ToolRegistry) -> Result<()> {
    let current = HostMethod::exposed("current_date", "Gets the current date").param(
        HostParameter::new(
            "time_zone_hours_offset",
            "int",
            "The number of hours to offset for the timezone",
        )
        .optional(),
    );
    registry.register_method(&current, |args| {
        let offset = match args.get("time_zone_hours_offset") {
            None | Some(Value::Null) => 0,
            Some(_) => args.i64("time_zone_hours_offset")?,
        };
        Ok(json!(current_date(Utc::now(), offset)?))
    })?;

    let compare = HostMethod::exposed(
        "compare_dates",
        "Compares the two datetimes and returns the result. 1 means the first date is bigger, 2 means the second date is bigger, 0 means equal",
    )
    .param(HostParameter::new("date1", "string", "The first date"))
    .param(HostParameter::new("date2", "string", "The second date"));
    registry.register_method(&compare, |args| {
        let first = parse_date(args, "date1")?;
        let second = parse_date(args, "date2")?;
        let result = match first.cmp(&second) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => 2,
            std::cmp::Ordering::Equal => 0,
        };
        Ok(json!(result))
    })?;

    let between = HostMethod::exposed(
        "date_falls_between_dates",
        "Checks if the given date falls between the two given dates",
    )
    .param(HostParameter::new("date_to_check", "string", "The date to check"))
    .param(HostParameter::new("first_date", "string", "The first date in the range"))
    .param(HostParameter::new("second_date", "string", "The second date in the range"));
    registry.register_method(&between, |args| {
        let date = parse_date(args, "date_to_check")?;
        let first = parse_date(args, "first_date")?;
        let second = parse_date(args, "second_date")?;
        Ok(json!(date > first && date < second))
    })?;

    Ok(())
}

fn current_date(now: DateTime<Utc>, offset_hours: i64) -> Result<String> {
    let shifted = Duration::try_hours(offset_hours)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| AgentError::ToolValidation(format!("offset of {offset_hours} hours is out of range")))?;
    Ok(shifted.format(DATE_FORMAT).to_string())
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD`
fn parse_date(args: &ToolArguments, name: &str) -> Result<NaiveDateTime> {
    let raw = args.str(name)?.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    for format in [DATE_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AgentError::ToolValidation(format!("'{name}' is not a recognizable date: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_registers_in_declaration_order() {
        assert_eq!(
            registry().names(),
            vec![
                "add",
                "subtract",
                "multiply",
                "divide",
                "current_date",
                "compare_dates",
                "date_falls_between_dates"
            ]
        );
    }

    #[tokio::test]
    async fn test_math() {
        let registry = registry();
        let (_, value) = registry.invoke("add", &json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(value, json!(5));

        let (_, value) = registry.invoke("divide", &json!({"a": 1, "b": 4})).await.unwrap();
        assert_eq!(value, json!(0.25));

        let err = registry.invoke("divide", &json!({"a": 1, "b": 0})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution(msg) if msg == "Division by zero"));
    }

    #[tokio::test]
    async fn test_compare_dates() {
        let registry = registry();
        let (_, value) = registry
            .invoke("compare_dates", &json!({"date1": "2024-03-01", "date2": "2024-02-28 23:59:59"}))
            .await
            .unwrap();
        assert_eq!(value, json!(1));

        let (_, value) = registry
            .invoke("compare_dates", &json!({"date1": "2024-01-01T00:00:00Z", "date2": "2024-01-01"}))
            .await
            .unwrap();
        assert_eq!(value, json!(0));

        let err = registry
            .invoke("compare_dates", &json!({"date1": "yesterday", "date2": "2024-01-01"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn test_date_between() {
        let registry = registry();
        let payload = json!({
            "date_to_check": "2024-06-15",
            "first_date": "2024-06-01",
            "second_date": "2024-07-01",
        });
        let (_, value) = registry.invoke("date_falls_between_dates", &payload).await.unwrap();
        assert_eq!(value, json!(true));
    }

    #[test]
    fn test_current_date_offset() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 22, 30, 0).unwrap();
        assert_eq!(current_date(now, 0).unwrap(), "2024-01-01 22:30:00");
        assert_eq!(current_date(now, 3).unwrap(), "2024-01-02 01:30:00");
        assert_eq!(current_date(now, -23).unwrap(), "2023-12-31 23:30:00");
    }
}
