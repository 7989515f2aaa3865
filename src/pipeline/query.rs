//! Query orchestrator: embed a question, retrieve the closest moments, and
//! stream an answer interpreted from their descriptions.

use anyhow::{Context, Result};
use chrono::Local;

use super::RecallContext;
use crate::model::{generate_embedding, GenerateRequest, TextStream};
use crate::store::Match;
use crate::types::timestamped;

/// Returned in place of an answer when nothing was retrieved.
pub const NO_RESULTS_MESSAGE: &str = "I couldn't find any relevant information related to that query.";

pub const QUERY_EXPANSION_SYSTEM_PROMPT: &str = "\
You are a helpful assistant that expands a user query into sub-queries.
The sub-queries should be mutually exclusive and collectively exhaustive.";

/// Interpretation prompt for `question` over retrieved `descriptions`.
pub fn interpreter_prompt(question: &str, descriptions: &[&str]) -> String {
    let listed: String = descriptions
        .iter()
        .map(|d| format!("\t\t- {d}\n"))
        .collect();
    format!(
        "You are responsible with interpreting some descriptions such that they answer to a given question.
Those descriptions are text representations of something the user was doing on their computer in the past (e.g. browsing the web, writing code, listening to music, etc...).
Interpret those description and formulate your answers as if you were an assistant that tries to describe what the user did previously.
Only include details relevant to the question and address the user directly as if you were presenting them to the user.

Question: {question}
Descriptions:
{listed}"
    )
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Rewrite the prompt with the interpreter model before embedding it.
    pub expand: bool,
    pub max_results: usize,
}

pub enum QueryOutcome {
    /// Retrieved documents, closest first, and the streamed answer.
    Answer { matches: Vec<Match>, stream: TextStream },
    /// Nothing matched; carries [`NO_RESULTS_MESSAGE`].
    NoResults(&'static str),
}

impl QueryOutcome {
    pub fn is_no_results(&self) -> bool {
        matches!(self, Self::NoResults(_))
    }
}

/// Answer a free-text question from stored descriptions.
pub async fn query(ctx: &RecallContext, prompt: &str, options: &QueryOptions) -> Result<QueryOutcome> {
    let models = ctx.models.as_ref();
    let model_names = &ctx.config.models;
    let collection = ctx.collection().await?;

    tracing::info!(prompt, "answering query");

    let search_text = if options.expand {
        let expanded = models
            .generate(
                GenerateRequest::new(&model_names.interpreter_model, prompt)
                    .with_system(QUERY_EXPANSION_SYSTEM_PROMPT),
            )
            .await
            .context("query expansion failed")?;
        tracing::debug!(expanded = %expanded, "expanded query");
        expanded
    } else {
        prompt.to_string()
    };

    let embedding = generate_embedding(
        models,
        &model_names.embedding_model,
        &timestamped(&Local::now(), &search_text),
    )
    .await?;
    let matches = collection.query(&embedding, options.max_results).await?;

    if matches.is_empty() {
        tracing::info!("no documents matched");
        return Ok(QueryOutcome::NoResults(NO_RESULTS_MESSAGE));
    }
    tracing::debug!(ids = ?matches.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), "retrieved documents");

    let descriptions: Vec<&str> = matches.iter().map(|m| m.payload.description.as_str()).collect();
    let stream = models
        .generate_stream(GenerateRequest::new(
            &model_names.interpreter_model,
            interpreter_prompt(prompt, &descriptions),
        ))
        .await
        .context("interpretation request failed")?;

    Ok(QueryOutcome::Answer { matches, stream })
}
