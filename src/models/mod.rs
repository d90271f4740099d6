pub mod submission;

pub use submission::{Submission, SubmissionFields, SubmissionStatus};
