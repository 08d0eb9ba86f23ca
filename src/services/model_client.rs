mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::services::result_validator::{self, OutputContract, ValidationError};
use crate::services::retry::{Attempted, RetryPolicy, Sleeper};

pub(crate) use openai::OpenAiTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ModelTask {
    Extraction,
    Grading,
    SingleShot,
}

impl ModelTask {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Grading => "grading",
            Self::SingleShot => "single_shot",
        }
    }
}

/// One call to the upstream model. The same client serves every task; only the shape differs.
#[derive(Debug, Clone)]
pub(crate) struct ModelRequest {
    pub(crate) task: ModelTask,
    pub(crate) submission_id: String,
    pub(crate) system_prompt: String,
    pub(crate) user_prompt: String,
    pub(crate) schema_name: &'static str,
    pub(crate) json_schema: Value,
    pub(crate) max_output_tokens: u32,
    /// Description of the previous reply's violation, present on validation re-invocations.
    pub(crate) correction: Option<String>,
}

impl ModelRequest {
    pub(crate) fn for_contract<C: OutputContract + ?Sized>(
        task: ModelTask,
        submission_id: &str,
        system_prompt: String,
        user_prompt: String,
        contract: &C,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            task,
            submission_id: submission_id.to_string(),
            system_prompt,
            user_prompt,
            schema_name: contract.name(),
            json_schema: contract.json_schema(),
            max_output_tokens,
            correction: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum TransportError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ModelError {
    #[error("model service still failing after {attempts} attempts: {last_error}")]
    TransientExhausted { attempts: u32, last_error: String },
    #[error("model service rejected the request: {message}")]
    Fatal { message: String, attempts: u32 },
}

impl ModelError {
    pub(crate) fn attempts(&self) -> u32 {
        match self {
            Self::TransientExhausted { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
        }
    }
}

/// A single network round-trip returning the model's raw text.
#[async_trait]
pub(crate) trait ModelTransport: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<String, TransportError>;
}

#[derive(Clone)]
pub(crate) struct ModelClient {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

/// Failure of a validated call: either the service gave up or its replies never conformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub(crate) enum InvocationError {
    #[error(transparent)]
    Model(ModelError),
    #[error("output rejected after {validation_attempts} attempts: {last}")]
    Invalid { last: ValidationError, validation_attempts: u32, model_attempts: u32 },
}

impl InvocationError {
    pub(crate) fn model_attempts(&self) -> u32 {
        match self {
            Self::Model(err) => err.attempts(),
            Self::Invalid { model_attempts, .. } => *model_attempts,
        }
    }
}

impl ModelClient {
    pub(crate) fn new(
        transport: Arc<dyn ModelTransport>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self { transport, policy, sleeper }
    }

    /// Raw reply, retrying transient failures under the policy. Conformance is not checked here.
    pub(crate) async fn invoke(
        &self,
        request: &ModelRequest,
    ) -> Result<Attempted<String>, ModelError> {
        let task = request.task.as_str();
        tracing::debug!(
            submission_id = %request.submission_id,
            task,
            schema = request.schema_name,
            "Sending model request"
        );

        let result = self
            .policy
            .run(self.sleeper.as_ref(), task, |attempt| {
                let transport = Arc::clone(&self.transport);
                async move {
                    let outcome = transport.complete(request).await;
                    let label = match &outcome {
                        Ok(_) => "ok",
                        Err(TransportError::Transient(_)) => "transient",
                        Err(TransportError::Fatal(_)) => "fatal",
                    };
                    metrics::counter!(
                        "model_requests_total",
                        "task" => task.to_string(),
                        "outcome" => label.to_string()
                    )
                    .increment(1);
                    tracing::debug!(
                        submission_id = %request.submission_id,
                        task,
                        attempt,
                        outcome = label,
                        "Model call finished"
                    );
                    outcome
                }
            })
            .await;

        if let Err(err) = &result {
            tracing::warn!(
                submission_id = %request.submission_id,
                task,
                error = %err,
                "Model request failed"
            );
        }
        result
    }

    /// Invokes and validates, re-asking with a note of the violation up to `validation_retries`
    /// more times.
    pub(crate) async fn invoke_validated<C>(
        &self,
        mut request: ModelRequest,
        contract: &C,
        validation_retries: u32,
    ) -> Result<Attempted<C::Parsed>, InvocationError>
    where
        C: OutputContract + ?Sized,
    {
        let mut model_attempts = 0;
        let mut validation_attempts = 0;

        loop {
            let reply = self.invoke(&request).await.map_err(|err| {
                InvocationError::Model(match err {
                    ModelError::TransientExhausted { attempts, last_error } => {
                        ModelError::TransientExhausted {
                            attempts: model_attempts + attempts,
                            last_error,
                        }
                    }
                    ModelError::Fatal { message, attempts } => {
                        ModelError::Fatal { message, attempts: model_attempts + attempts }
                    }
                })
            })?;
            model_attempts += reply.attempts;
            validation_attempts += 1;

            match result_validator::validate(&reply.value, contract) {
                Ok(parsed) => return Ok(Attempted { value: parsed, attempts: model_attempts }),
                Err(violation) => {
                    metrics::counter!(
                        "validation_failures_total",
                        "task" => request.task.as_str().to_string(),
                        "kind" => violation.kind.as_str().to_string()
                    )
                    .increment(1);
                    tracing::warn!(
                        submission_id = %request.submission_id,
                        task = request.task.as_str(),
                        validation_attempt = validation_attempts,
                        field = %violation.field,
                        constraint = %violation.constraint,
                        "Model output failed validation"
                    );

                    if validation_attempts > validation_retries {
                        return Err(InvocationError::Invalid {
                            last: violation,
                            validation_attempts,
                            model_attempts,
                        });
                    }
                    request.correction = Some(violation.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
