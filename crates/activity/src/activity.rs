use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_core::{ActivityId, BranchId, DomainError, DomainResult, UserId};

use crate::delta::{ActivityDelta, RestoreDelta};

/// Kind of business mutation an activity records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Sell,
    StockAdd,
    StockReduce,
    ProductCreate,
    ProductUpdate,
    ExpenseAdd,
    Transfer,
    Refund,
    Restore,
    EditCorrection,
}

impl ActivityType {
    pub const ALL: [ActivityType; 10] = [
        ActivityType::Sell,
        ActivityType::StockAdd,
        ActivityType::StockReduce,
        ActivityType::ProductCreate,
        ActivityType::ProductUpdate,
        ActivityType::ExpenseAdd,
        ActivityType::Transfer,
        ActivityType::Refund,
        ActivityType::Restore,
        ActivityType::EditCorrection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Sell => "sell",
            ActivityType::StockAdd => "stock_add",
            ActivityType::StockReduce => "stock_reduce",
            ActivityType::ProductCreate => "product_create",
            ActivityType::ProductUpdate => "product_update",
            ActivityType::ExpenseAdd => "expense_add",
            ActivityType::Transfer => "transfer",
            ActivityType::Refund => "refund",
            ActivityType::Restore => "restore",
            ActivityType::EditCorrection => "edit_correction",
        }
    }

    /// Terminal activities have no compensation rule of their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivityType::Refund | ActivityType::Restore)
    }

    fn default_title(&self) -> &'static str {
        match self {
            ActivityType::Sell => "Sale recorded",
            ActivityType::StockAdd => "Stock added",
            ActivityType::StockReduce => "Stock reduced",
            ActivityType::ProductCreate => "Product created",
            ActivityType::ProductUpdate => "Product updated",
            ActivityType::ExpenseAdd => "Expense added",
            ActivityType::Transfer => "Stock transferred",
            ActivityType::Refund => "Refund issued",
            ActivityType::Restore => "Activity restored",
            ActivityType::EditCorrection => "Record corrected",
        }
    }
}

impl core::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ActivityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown activity type '{s}'")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Completed,
    Reversed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Completed => "completed",
            ActivityStatus::Reversed => "reversed",
        }
    }
}

impl core::str::FromStr for ActivityStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(ActivityStatus::Completed),
            "reversed" => Ok(ActivityStatus::Reversed),
            other => Err(DomainError::validation(format!("unknown activity status '{other}'"))),
        }
    }
}

/// Polymorphic reference to the row an activity affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_type: String,
    pub entity_id: String,
}

/// A recorded business mutation.
///
/// Created once; the only later change is `status` flipping to `Reversed`
/// when a restore commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub title: String,
    pub description: Option<String>,
    pub status: ActivityStatus,
    pub branch_id: Option<BranchId>,
    pub user_id: Option<UserId>,
    pub related_entity: Option<RelatedEntity>,
    pub delta: ActivityDelta,
    pub metadata: JsonValue,
    pub parent_activity_id: Option<ActivityId>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn activity_type(&self) -> ActivityType {
        self.delta.activity_type()
    }

    /// Check that a restore may be attempted against the current state.
    pub fn ensure_restorable(&self) -> DomainResult<()> {
        if self.status != ActivityStatus::Completed {
            return Err(DomainError::conflict(format!(
                "activity {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        let kind = self.activity_type();
        if kind.is_terminal() {
            return Err(DomainError::invariant(format!(
                "{kind} activities are terminal and cannot be restored"
            )));
        }
        Ok(())
    }

    /// Build the child `restore` activity that records the reversal of `self`.
    pub fn restore_record(
        &self,
        id: ActivityId,
        reason: &str,
        effect: JsonValue,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Activity {
        Activity {
            id,
            title: format!("Restored: {}", self.title),
            description: Some(reason.to_string()),
            status: ActivityStatus::Completed,
            branch_id: self.branch_id,
            user_id,
            related_entity: Some(RelatedEntity {
                entity_type: "activities".to_string(),
                entity_id: self.id.to_string(),
            }),
            delta: ActivityDelta::Restore(RestoreDelta {
                reversed_activity_id: self.id,
                reversed_type: self.activity_type(),
                reason: reason.to_string(),
                effect,
            }),
            metadata: JsonValue::Object(Default::default()),
            parent_activity_id: Some(self.id),
            created_at: now,
        }
    }
}

/// Input to the activity recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub delta: ActivityDelta,
    pub branch_id: Option<BranchId>,
    pub related_entity: Option<RelatedEntity>,
    pub metadata: JsonValue,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl NewActivity {
    pub fn new(delta: ActivityDelta) -> Self {
        Self {
            delta,
            branch_id: None,
            related_entity: None,
            metadata: JsonValue::Null,
            title: None,
            description: None,
        }
    }

    pub fn branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn related(mut self, entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        self.related_entity = Some(RelatedEntity {
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
        });
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate and materialize into a `completed` activity.
    ///
    /// Restore activities can only be produced by [`Activity::restore_record`].
    pub fn into_activity(
        self,
        id: ActivityId,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Activity> {
        let kind = self.delta.activity_type();
        if kind == ActivityType::Restore {
            return Err(DomainError::validation(
                "restore activities are created by the restore engine only",
            ));
        }
        self.delta.validate()?;

        let metadata = match self.metadata {
            JsonValue::Null => JsonValue::Object(Default::default()),
            obj @ JsonValue::Object(_) => obj,
            _ => return Err(DomainError::validation("metadata must be a JSON object")),
        };

        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| kind.default_title().to_string());

        Ok(Activity {
            id,
            title,
            description: self.description,
            status: ActivityStatus::Completed,
            branch_id: self.branch_id,
            user_id,
            related_entity: self.related_entity,
            delta: self.delta,
            metadata,
            parent_activity_id: None,
            created_at: now,
        })
    }
}
