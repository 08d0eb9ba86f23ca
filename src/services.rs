pub(crate) mod extraction;
pub(crate) mod grading;
pub(crate) mod inputs;
pub(crate) mod marking;
pub(crate) mod model_client;
pub(crate) mod prompts;
pub(crate) mod report_aggregator;
pub(crate) mod result_validator;
pub(crate) mod retry;
pub(crate) mod review_router;
pub(crate) mod single_shot;
pub(crate) mod storage;
