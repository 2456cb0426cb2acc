//! Grounded answer synthesis.
//!
//! Renders the retrieved passages and the question into a prompt, asks the
//! configured [`AnswerGenerator`] for an answer, and attaches one
//! [`Citation`] per passage. With nothing retrieved the generator is never
//! called: the answer is a fixed "no relevant information" message, so the
//! model cannot invent content.

use std::sync::Arc;

use crate::error::{with_timeout, Result};
use crate::generate::{AnswerGenerator, GenerationRequest};
use crate::models::{AnswerResult, Citation, RetrievedChunk};

pub const NO_RELEVANT_INFORMATION: &str =
    "I could not find relevant information in the uploaded documents to answer this question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    Default,
    Concise,
}

impl PromptTemplate {
    /// Unknown names fall back to [`PromptTemplate::Default`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "concise" => Self::Concise,
            _ => Self::Default,
        }
    }

    pub fn render(&self, contexts: &str, question: &str) -> String {
        match self {
            Self::Default => format!(
                "You are an assistant that answers questions from the documents provided.\n\
                 Use only the information in the contexts below to answer the question.\n\
                 If the answer is not in the contexts, say that you do not have enough information.\n\
                 Do not invent or assume anything that is not stated in the contexts.\n\
                 Cite the file names of the documents you used.\n\
                 \n\
                 Contexts:\n{contexts}\n\
                 \n\
                 Question: {question}\n\
                 \n\
                 Answer:"
            ),
            Self::Concise => format!(
                "Answer the question concisely using only the contexts provided.\n\
                 Contexts: {contexts}\n\
                 Question: {question}\n\
                 Answer (cite the sources):"
            ),
        }
    }
}

pub struct Synthesizer {
    generator: Arc<dyn AnswerGenerator>,
    template: PromptTemplate,
    timeout_secs: u64,
}

impl Synthesizer {
    pub fn new(
        generator: Arc<dyn AnswerGenerator>,
        template: PromptTemplate,
        timeout_secs: u64,
    ) -> Self {
        Self {
            generator,
            template,
            timeout_secs,
        }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<AnswerResult> {
        if chunks.is_empty() {
            return Ok(AnswerResult::without_sources(NO_RELEVANT_INFORMATION));
        }

        let contexts: Vec<String> = chunks
            .iter()
            .map(|c| c.chunk.text.trim().to_string())
            .collect();
        let rendered = chunks
            .iter()
            .zip(&contexts)
            .enumerate()
            .map(|(i, (hit, text))| format!("[Document {} | {}] {}", i + 1, hit.file_name, text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = GenerationRequest {
            question: question.to_string(),
            prompt: self.template.render(&rendered, question),
            contexts,
        };

        let answer = with_timeout(
            "generation",
            self.timeout_secs,
            self.generator.generate(&request),
        )
        .await?;

        Ok(AnswerResult {
            answer,
            sources: chunks.iter().map(Citation::from_retrieved).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, GenerationError};
    use crate::generate::ExtractiveGenerator;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator(AtomicUsize);

    #[async_trait]
    impl AnswerGenerator for CountingGenerator {
        fn name(&self) -> &str {
            "counting"
        }
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> std::result::Result<String, GenerationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(request.prompt.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        fn name(&self) -> &str {
            "failing"
        }
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> std::result::Result<String, GenerationError> {
            Err(GenerationError::Request("model offline".to_string()))
        }
    }

    fn hit(file_name: &str, index: i64, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: format!("c{}", index),
                document_id: "d1".to_string(),
                chunk_index: index,
                text: text.to_string(),
                start_char: 0,
                end_char: text.chars().count(),
                hash: String::new(),
            },
            file_name: file_name.to_string(),
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn no_chunks_never_calls_generator() {
        let generator = Arc::new(CountingGenerator(AtomicUsize::new(0)));
        let synth = Synthesizer::new(generator.clone(), PromptTemplate::Default, 5);
        let result = synth.synthesize("anything?", &[]).await.unwrap();
        assert_eq!(result.answer, NO_RELEVANT_INFORMATION);
        assert!(result.sources.is_empty());
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn prompt_grounds_question_and_cites_every_chunk() {
        let generator = Arc::new(CountingGenerator(AtomicUsize::new(0)));
        let synth = Synthesizer::new(generator, PromptTemplate::Default, 5);
        let hits = [hit("a.txt", 0, "Alpha text."), hit("b.pdf", 3, "Beta text.")];
        let result = synth.synthesize("What is alpha?", &hits).await.unwrap();

        assert!(result.answer.contains("[Document 1 | a.txt] Alpha text."));
        assert!(result.answer.contains("[Document 2 | b.pdf] Beta text."));
        assert!(result.answer.contains("Question: What is alpha?"));
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[1].file_name, "b.pdf");
        assert_eq!(result.sources[1].chunk_index, 3);
    }

    #[tokio::test]
    async fn generator_failure_propagates() {
        let synth = Synthesizer::new(Arc::new(FailingGenerator), PromptTemplate::Concise, 5);
        let err = synth
            .synthesize("q", &[hit("a.txt", 0, "text")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::Request(_))));
    }

    #[tokio::test]
    async fn extractive_answer_uses_retrieved_text() {
        let synth = Synthesizer::new(Arc::new(ExtractiveGenerator), PromptTemplate::Default, 5);
        let hits = [hit("geo.txt", 0, "The capital of France is Paris.")];
        let result = synth
            .synthesize("What is the capital of France?", &hits)
            .await
            .unwrap();
        assert!(result.answer.contains("Paris"));
        assert_eq!(result.sources[0].file_name, "geo.txt");
    }

    #[test]
    fn template_names() {
        assert_eq!(PromptTemplate::from_name("concise"), PromptTemplate::Concise);
        assert_eq!(PromptTemplate::from_name("default"), PromptTemplate::Default);
    }
}
