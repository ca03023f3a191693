mod client;
mod frames;
mod prompt;

pub(crate) use client::{AnalysisClient, AnalysisStream};
pub(crate) use prompt::SystemPrompt;
