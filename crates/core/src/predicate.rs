use chrono::DateTime;

use crate::domain::context::{FieldValue, ResolvedContext};
use crate::domain::strategy::{CompareOp, Condition};

/// Evaluates one structured condition against a context snapshot.
///
/// A condition over a field the context cannot produce does not hold; it is
/// never an error. Time windows are measured against `captured_at`, so the
/// same snapshot always evaluates the same way.
#[derive(Clone, Copy, Debug, Default)]
pub struct PredicateEvaluator;

impl PredicateEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn holds(&self, condition: &Condition, context: &ResolvedContext) -> bool {
        let Some(actual) = context.field(condition.field()) else {
            return false;
        };

        match condition {
            Condition::FieldEquals { value, .. } => text_equals(&actual, value),
            Condition::FieldInSet { values, .. } => {
                values.iter().any(|candidate| text_equals(&actual, candidate))
            }
            Condition::NumericThreshold { op, value, .. } => {
                numeric(&actual).is_some_and(|number| compare(*op, number, *value))
            }
            Condition::TimeWindow { max_age_hours, .. } => {
                age_hours(&actual, context).is_some_and(|age| {
                    age >= 0.0 && age <= *max_age_hours
                })
            }
        }
    }

    /// Conjunction over a strategy's ordered condition list.
    pub fn all_hold(&self, conditions: &[Condition], context: &ResolvedContext) -> bool {
        conditions.iter().all(|condition| self.holds(condition, context))
    }
}

fn text_equals(actual: &FieldValue, expected: &str) -> bool {
    match actual {
        FieldValue::Text(text) => text.eq_ignore_ascii_case(expected),
        FieldValue::Flag(flag) => {
            expected.eq_ignore_ascii_case(if *flag { "true" } else { "false" })
        }
        FieldValue::Number(number) => {
            expected.parse::<f64>().is_ok_and(|parsed| (parsed - number).abs() < f64::EPSILON)
        }
        FieldValue::Timestamp(_) => false,
    }
}

fn numeric(actual: &FieldValue) -> Option<f64> {
    match actual {
        FieldValue::Number(number) => Some(*number),
        FieldValue::Text(text) => text.parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(op: CompareOp, actual: f64, threshold: f64) -> bool {
    match op {
        CompareOp::Lt => actual < threshold,
        CompareOp::Le => actual <= threshold,
        CompareOp::Gt => actual > threshold,
        CompareOp::Ge => actual >= threshold,
    }
}

/// Age of a timestamp-valued field relative to the snapshot capture instant.
/// Numeric fields are taken as hours directly (e.g. `order.age_hours`), and
/// text fields are accepted when they parse as RFC 3339.
fn age_hours(actual: &FieldValue, context: &ResolvedContext) -> Option<f64> {
    let instant = match actual {
        FieldValue::Number(hours) => return Some(*hours),
        FieldValue::Timestamp(instant) => *instant,
        FieldValue::Text(text) => {
            DateTime::parse_from_rfc3339(text).ok()?.with_timezone(&chrono::Utc)
        }
        FieldValue::Flag(_) => return None,
    };
    let elapsed = context.captured_at.signed_duration_since(instant);
    Some(elapsed.num_seconds() as f64 / 3600.0)
}
