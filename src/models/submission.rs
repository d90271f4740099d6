use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery status of a submission. Serialized in lowercase on the queue wire
/// and in the status store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Completed,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "completed" => Ok(SubmissionStatus::Completed),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(format!("unknown submission status '{other}'")),
        }
    }
}

/// Caller-supplied business fields. Opaque to the pipeline.
///
/// Unknown keys are ignored and missing keys default to an empty string.
/// Numbers and booleans are kept in their text form; nested values are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubmissionFields {
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub time: String,
    #[serde(deserialize_with = "lenient_string")]
    pub department: String,
    #[serde(deserialize_with = "lenient_string")]
    pub event_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub responsible_teacher_contact: String,
    #[serde(deserialize_with = "lenient_string")]
    pub schedule_coordinator_contact: String,
    #[serde(deserialize_with = "lenient_string")]
    pub comments: String,
    #[serde(deserialize_with = "lenient_string")]
    pub group: String,
    #[serde(deserialize_with = "lenient_string")]
    pub student_category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub required_equipment_list: String,
    #[serde(deserialize_with = "lenient_string")]
    pub discipline: String,
    #[serde(deserialize_with = "lenient_string")]
    pub practical_skills: String,
    #[serde(deserialize_with = "lenient_string")]
    pub specialty: String,
    #[serde(deserialize_with = "lenient_string")]
    pub stations: String,
}

impl SubmissionFields {
    /// Field values in wire order.
    pub fn values(&self) -> [&str; 14] {
        [
            &self.date,
            &self.time,
            &self.department,
            &self.event_type,
            &self.responsible_teacher_contact,
            &self.schedule_coordinator_contact,
            &self.comments,
            &self.group,
            &self.student_category,
            &self.required_equipment_list,
            &self.discipline,
            &self.practical_skills,
            &self.specialty,
            &self.stations,
        ]
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(_) | Value::Object(_) => Err(serde::de::Error::custom(
            "expected a string, number or boolean",
        )),
    }
}

/// One form record moving through the pipeline.
///
/// `id` and `creation_date` are assigned once by [`Submission::accept`] and
/// have no setters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    id: Uuid,
    creation_date: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: SubmissionFields,
    pub status: SubmissionStatus,
}

impl Submission {
    /// Stamp a fresh identity and creation time onto caller fields.
    pub fn accept(fields: SubmissionFields) -> Self {
        Self {
            id: Uuid::new_v4(),
            creation_date: Utc::now(),
            fields,
            status: SubmissionStatus::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    /// The row appended to spreadsheet-like sinks: id, creation date, then the
    /// business fields in wire order.
    pub fn row(&self) -> Vec<Value> {
        let mut row = Vec::with_capacity(16);
        row.push(Value::String(self.id.to_string()));
        row.push(Value::String(self.creation_date.to_rfc3339()));
        row.extend(
            self.fields
                .values()
                .iter()
                .map(|v| Value::String((*v).to_string())),
        );
        row
    }
}
