//! `activities` row mapping.

use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};

use shopledger_activity::{Activity, ActivityDelta, ActivityStatus, ActivityType, RelatedEntity};
use shopledger_core::{DomainError, DomainResult, Identifier};

use crate::store::{Row, RowExt};

pub use shopledger_activity::compensation::ACTIVITIES_TABLE;

pub fn activities_table() -> DomainResult<Identifier> {
    Identifier::parse(ACTIVITIES_TABLE)
}

pub fn to_row(activity: &Activity) -> DomainResult<Row> {
    let (kind, delta) = activity.delta.to_parts()?;
    let value = json!({
        "id": activity.id.to_string(),
        "type": kind.as_str(),
        "title": activity.title,
        "description": activity.description,
        "status": activity.status.as_str(),
        "branch_id": activity.branch_id.map(|b| b.to_string()),
        "user_id": activity.user_id.map(|u| u.to_string()),
        "related_entity_type": activity.related_entity.as_ref().map(|r| r.entity_type.clone()),
        "related_entity_id": activity.related_entity.as_ref().map(|r| r.entity_id.clone()),
        "delta": delta,
        "metadata": activity.metadata,
        "parent_activity_id": activity.parent_activity_id.map(|p| p.to_string()),
        "created_at": activity.created_at.to_rfc3339(),
    });
    match value {
        JsonValue::Object(row) => Ok(row),
        _ => Err(DomainError::invariant("activity row must be an object")),
    }
}

pub fn from_row(row: &Row) -> DomainResult<Activity> {
    let required = |column: &str| {
        row.text(column)
            .ok_or_else(|| DomainError::validation(format!("activity row is missing '{column}'")))
    };

    let kind: ActivityType = required("type")?.parse()?;
    let payload = row.get("delta").cloned().unwrap_or(JsonValue::Null);
    // Some drivers hand jsonb back as text.
    let payload = match payload {
        JsonValue::String(s) => serde_json::from_str(&s)
            .map_err(|e| DomainError::validation(format!("activity delta is not JSON: {e}")))?,
        other => other,
    };

    let related_entity = match (row.text("related_entity_type"), row.text("related_entity_id")) {
        (Some(entity_type), Some(entity_id)) => Some(RelatedEntity { entity_type, entity_id }),
        _ => None,
    };

    let created_at: DateTime<Utc> = serde_json::from_value(row.get("created_at").cloned().unwrap_or_default())
        .map_err(|e| DomainError::validation(format!("activity created_at is malformed: {e}")))?;

    Ok(Activity {
        id: required("id")?.parse()?,
        title: required("title")?,
        description: row.text("description"),
        status: required("status")?.parse::<ActivityStatus>()?,
        branch_id: row.text("branch_id").map(|b| b.parse()).transpose()?,
        user_id: row.text("user_id").map(|u| u.parse()).transpose()?,
        related_entity,
        delta: ActivityDelta::from_parts(kind, payload)?,
        metadata: match row.get("metadata") {
            Some(m @ JsonValue::Object(_)) => m.clone(),
            _ => JsonValue::Object(Default::default()),
        },
        parent_activity_id: row.text("parent_activity_id").map(|p| p.parse()).transpose()?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopledger_activity::{ExpenseDelta, NewActivity};
    use shopledger_core::{ActivityId, BranchId, ExpenseId, UserId};

    #[test]
    fn row_mapping_roundtrips_every_column() {
        let expense = ExpenseId::new();
        let activity = NewActivity::new(ActivityDelta::ExpenseAdd(ExpenseDelta {
            expense_id: Some(expense),
            amount: 500,
            category: "utilities".to_string(),
        }))
        .branch(BranchId::new())
        .related("expenses", expense)
        .metadata(json!({"source": "till"}))
        .into_activity(ActivityId::new(), Some(UserId::new()), Utc::now())
        .unwrap();

        let row = to_row(&activity).unwrap();
        assert_eq!(row.get("type"), Some(&json!("expense_add")));
        assert_eq!(row.get("status"), Some(&json!("completed")));
        assert_eq!(row.get("delta").and_then(|d| d.get("amount")), Some(&json!(500)));

        assert_eq!(from_row(&row).unwrap(), activity);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut row = to_row(
            &NewActivity::new(ActivityDelta::ExpenseAdd(ExpenseDelta {
                expense_id: None,
                amount: 1,
                category: "misc".to_string(),
            }))
            .into_activity(ActivityId::new(), None, Utc::now())
            .unwrap(),
        )
        .unwrap();
        row.insert("type".to_string(), json!("layaway"));

        assert!(matches!(from_row(&row), Err(DomainError::Validation(_))));
    }
}
