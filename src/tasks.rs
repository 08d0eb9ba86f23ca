pub(crate) mod pipeline;
pub(crate) mod scheduler;
pub(crate) mod strategy;
