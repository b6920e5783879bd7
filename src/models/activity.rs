// src/models/activity.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DedupeError;

pub type ActivityId = i64;

/// One row of the `activities` table as the duplicate pipeline sees it.
/// Text columns are nullable in the store; readers substitute "".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub title: Option<String>,
    pub activity_type: Option<String>,
    pub description: Option<String>,
    pub supplies: Option<String>,
    pub instructions: Option<String>,
    pub related_ids: Option<String>,
}

impl Activity {
    pub fn new(id: ActivityId, title: &str) -> Self {
        Self {
            id,
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    /// Raw value of a text field, empty when the column is NULL.
    pub fn field(&self, field: ActivityField) -> &str {
        let value = match field {
            ActivityField::Title => &self.title,
            ActivityField::Description => &self.description,
            ActivityField::Supplies => &self.supplies,
            ActivityField::Instructions => &self.instructions,
        };
        value.as_deref().unwrap_or("")
    }
}

/// The free-text columns that can take part in a comparison.
/// Declaration order is the order scores and report columns appear in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActivityField {
    Title,
    Description,
    Supplies,
    Instructions,
}

impl ActivityField {
    pub const ALL: [ActivityField; 4] = [
        ActivityField::Title,
        ActivityField::Description,
        ActivityField::Supplies,
        ActivityField::Instructions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityField::Title => "title",
            ActivityField::Description => "description",
            ActivityField::Supplies => "supplies",
            ActivityField::Instructions => "instructions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActivityField::Title => "Title",
            ActivityField::Description => "Description",
            ActivityField::Supplies => "Supplies",
            ActivityField::Instructions => "Instructions",
        }
    }
}

impl fmt::Display for ActivityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityField {
    type Err = DedupeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "title" => Ok(ActivityField::Title),
            "description" => Ok(ActivityField::Description),
            "supplies" => Ok(ActivityField::Supplies),
            "instructions" => Ok(ActivityField::Instructions),
            other => Err(DedupeError::InvalidConfig(format!(
                "unknown activity field '{}' (expected title, description, supplies or instructions)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_read_as_empty() {
        let activity = Activity::new(3, "Volcano Science Experiment");
        assert_eq!(activity.field(ActivityField::Title), "Volcano Science Experiment");
        assert_eq!(activity.field(ActivityField::Supplies), "");
    }

    #[test]
    fn test_field_parsing() {
        assert_eq!(" Title ".parse::<ActivityField>().unwrap(), ActivityField::Title);
        assert_eq!("SUPPLIES".parse::<ActivityField>().unwrap(), ActivityField::Supplies);
        assert!("materials".parse::<ActivityField>().is_err());
    }

    #[test]
    fn test_field_order_follows_report_columns() {
        let mut fields = vec![
            ActivityField::Instructions,
            ActivityField::Title,
            ActivityField::Supplies,
            ActivityField::Description,
        ];
        fields.sort();
        assert_eq!(fields, ActivityField::ALL.to_vec());
    }
}
