pub(crate) mod answer_key;
pub(crate) mod grading;
pub(crate) mod report;
